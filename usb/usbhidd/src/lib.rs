//! USB host HID class driver.
//!
//! Claims HID-class interfaces, plus several vendor-specific game-controller
//! families that present themselves as HID-like input devices, during
//! enumeration. Bound devices are tracked in a fixed-capacity registry for
//! the lifetime of the connection and torn down cleanly on disconnect,
//! including any transfers still in flight.
//!
//! The driver holds no global state: everything lives in a [`HidDriver`]
//! context, which implements the host stack's [`ClassDriver`] entry points.

pub mod class;
mod init;
pub mod registry;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::atomic::Ordering;

use driver_usb_host::{ClassDriver, DriverError, IfaceId, Result, UsbHostStack, UsbIface};

pub use crate::class::HidType;
pub use crate::registry::{HidDevice, CONFIG_HID_DEV_MAX_PIPE, CONFIG_HID_MAX_DEV};

use crate::registry::{DeviceRegistry, XFER_ABORTED};

/// Connect/disconnect notification. The second parameter is reserved and
/// currently always zero.
pub type ConnCallback = Box<dyn FnMut(&HidDevice, u32) + Send>;

/// HID class driver context: the device registry plus the upward
/// notification callbacks.
pub struct HidDriver {
    registry: DeviceRegistry,
    conn_func: Option<ConnCallback>,
    disconn_func: Option<ConnCallback>,
}

impl HidDriver {
    pub fn new() -> Self {
        Self {
            registry: DeviceRegistry::new(),
            conn_func: None,
            disconn_func: None,
        }
    }

    /// Install device connect and disconnect callback functions.
    pub fn install_callbacks(&mut self, conn_func: ConnCallback, disconn_func: ConnCallback) {
        self.conn_func = Some(conn_func);
        self.disconn_func = Some(disconn_func);
    }

    /// Currently connected HID devices, in connection order.
    pub fn devices(&self) -> impl Iterator<Item = &HidDevice> {
        self.registry.iter()
    }

    /// Mutable access to a bound device, e.g. to attach consumer data to its
    /// `user_data` slot.
    pub fn device_mut(&mut self, iface: IfaceId) -> Option<&mut HidDevice> {
        let idx = self.registry.find(iface)?;
        self.registry.get_mut(idx)
    }
}

impl Default for HidDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassDriver for HidDriver {
    /// Classify the interface and, if it is ours, bind it: allocate a
    /// registry record, run the variant activation sequence, link the record
    /// and fire the connect notification. Rejection before allocation has no
    /// side effects.
    fn probe(&mut self, host: &mut dyn UsbHostStack, iface: &UsbIface) -> Result<()> {
        let ty = class::classify(host, iface)?;

        // A HID-family device without an interrupt endpoint is not usable
        // and must not consume a registry slot.
        if class::interrupt_endpoint(&iface.desc).is_none() {
            return Err(DriverError::NotMatched);
        }

        let idx = self.registry.allocate()?;
        let Some(rec) = self.registry.get_mut(idx) else {
            return Err(DriverError::ConsistencyViolation);
        };
        rec.iface = Some(iface.id);
        rec.vendor = iface.vendor;
        rec.product = iface.product;
        rec.sub_class = iface.desc.sub_class;
        rec.protocol = iface.desc.protocol;
        rec.ty = ty;

        init::activate(host, rec, iface);

        self.registry.link(idx);
        log::debug!(
            "usbhidd: probe ok, device {:04x}:{:04x} ({:?}) on {}",
            iface.vendor,
            iface.product,
            ty,
            iface.id
        );

        if let Some(conn_func) = self.conn_func.as_mut() {
            if let Some(rec) = self.registry.get(idx) {
                conn_func(rec, 0);
            }
        }
        Ok(())
    }

    /// Unwind a bound interface: stop endpoint activity, drain every pending
    /// transfer slot, unlink the record, fire the disconnect notification and
    /// return the record to the pool.
    fn disconnect(&mut self, host: &mut dyn UsbHostStack, iface: &UsbIface) -> Result<()> {
        for ep_index in 0..iface.desc.endpoints.len() {
            host.quit_endpoint(iface.id, ep_index);
        }

        // Locate by back-reference rather than any cached pointer; the pool
        // slot identity may have been reused since binding.
        let Some(idx) = self.registry.find(iface.id) else {
            log::error!(
                "usbhidd: disconnect for {} found no bound device record",
                iface.id
            );
            return Err(DriverError::ConsistencyViolation);
        };

        if let Some(rec) = self.registry.get_mut(idx) {
            log::debug!(
                "usbhidd: disconnect device {:04x}:{:04x} on {}",
                rec.vendor,
                rec.product,
                iface.id
            );
            for slot in rec.transfers.iter_mut() {
                if let Some(pending) = slot.take() {
                    // Mark first, so a completion racing with us no-ops.
                    pending.state.store(XFER_ABORTED, Ordering::Release);
                    host.abort_transfer(pending.transfer);
                    host.free_buffer(pending.buffer);
                }
            }
        }

        self.registry.unlink(idx);
        if let Some(disconn_func) = self.disconn_func.as_mut() {
            if let Some(rec) = self.registry.get(idx) {
                disconn_func(rec, 0);
            }
        }
        self.registry.release(idx);
        Ok(())
    }

    fn suspend(&mut self, iface: &UsbIface) {
        log::trace!("usbhidd: suspend {} (not implemented)", iface.id);
    }

    fn resume(&mut self, iface: &UsbIface) {
        log::trace!("usbhidd: resume {} (not implemented)", iface.id);
    }
}
