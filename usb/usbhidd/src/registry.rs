//! Fixed-capacity device pool and the list of currently bound devices.

use std::any::Any;
use std::array;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;

use driver_usb_host::{BufferId, DriverError, IfaceId, TransferId};

use crate::class::HidType;

/// Maximum number of concurrently bound HID devices.
pub const CONFIG_HID_MAX_DEV: usize = 4;
/// Maximum number of outstanding transfer requests per device.
pub const CONFIG_HID_DEV_MAX_PIPE: usize = 2;

/// Pending-transfer lifecycle values, shared with the completion callback.
pub(crate) const XFER_IN_FLIGHT: u8 = 0;
pub(crate) const XFER_COMPLETED: u8 = 1;
pub(crate) const XFER_ABORTED: u8 = 2;

/// One outstanding transfer request and the buffer it owns. Both are released
/// together by the disconnect path.
pub(crate) struct PendingTransfer {
    pub transfer: TransferId,
    pub buffer: BufferId,
    /// Shared with the completion callback; disconnect stores
    /// [`XFER_ABORTED`] before reclaiming anything, so a late callback
    /// observes the abort and returns without touching the record.
    pub state: Arc<AtomicU8>,
}

/// One bound HID interface.
pub struct HidDevice {
    /// Stamped at allocation; disambiguates reused pool slots.
    pub uid: u64,
    pub vendor: u16,
    pub product: u16,
    pub sub_class: u8,
    pub protocol: u8,
    pub ty: HidType,
    /// Owned entirely by upward consumers.
    pub user_data: Option<Box<dyn Any + Send>>,
    pub(crate) iface: Option<IfaceId>,
    pub(crate) transfers: [Option<PendingTransfer>; CONFIG_HID_DEV_MAX_PIPE],
    pub(crate) next: Option<usize>,
}

impl HidDevice {
    fn empty(uid: u64) -> Self {
        Self {
            uid,
            vendor: 0,
            product: 0,
            sub_class: 0,
            protocol: 0,
            ty: HidType::default(),
            user_data: None,
            iface: None,
            transfers: array::from_fn(|_| None),
            next: None,
        }
    }

    /// The interface this record is bound to.
    pub fn iface(&self) -> Option<IfaceId> {
        self.iface
    }
}

/// Fixed pool of device records plus the singly linked list of bound devices,
/// in connection order.
pub struct DeviceRegistry {
    slots: [Option<HidDevice>; CONFIG_HID_MAX_DEV],
    head: Option<usize>,
    tail: Option<usize>,
    next_uid: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
            head: None,
            tail: None,
            next_uid: 0,
        }
    }

    /// Claim a free pool slot and stamp it with a fresh unique id. The record
    /// starts unpopulated and unlinked.
    pub fn allocate(&mut self) -> Result<usize, DriverError> {
        let idx = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(DriverError::OutOfResources)?;
        self.next_uid += 1;
        self.slots[idx] = Some(HidDevice::empty(self.next_uid));
        log::trace!("hid registry: allocated slot {} (uid {})", idx, self.next_uid);
        Ok(idx)
    }

    /// Return a record to the pool. Must only be called once every pending
    /// transfer slot has been drained.
    pub fn release(&mut self, idx: usize) {
        if let Some(rec) = self.slots[idx].as_ref() {
            debug_assert!(
                rec.transfers.iter().all(|slot| slot.is_none()),
                "released a record with outstanding transfers"
            );
            log::trace!("hid registry: released slot {} (uid {})", idx, rec.uid);
        }
        self.slots[idx] = None;
    }

    pub fn get(&self, idx: usize) -> Option<&HidDevice> {
        self.slots.get(idx)?.as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut HidDevice> {
        self.slots.get_mut(idx)?.as_mut()
    }

    /// Locate a record by its interface back-reference.
    pub fn find(&self, iface: IfaceId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|rec| rec.iface == Some(iface)))
    }

    /// Append to the tail of the bound-device list.
    pub fn link(&mut self, idx: usize) {
        if let Some(rec) = self.slots[idx].as_mut() {
            rec.next = None;
        }
        match self.tail {
            Some(tail) => {
                if let Some(rec) = self.slots[tail].as_mut() {
                    rec.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Remove from the bound-device list. No-op if the record is not linked.
    pub fn unlink(&mut self, idx: usize) {
        let Some(next) = self.slots[idx].as_ref().map(|rec| rec.next) else {
            return;
        };

        if self.head == Some(idx) {
            self.head = next;
            if self.tail == Some(idx) {
                self.tail = None;
            }
        } else {
            let mut prev = self.head;
            while let Some(p) = prev {
                let p_next = self.slots[p].as_ref().and_then(|rec| rec.next);
                if p_next == Some(idx) {
                    break;
                }
                prev = p_next;
            }
            let Some(p) = prev else {
                return;
            };
            if let Some(rec) = self.slots[p].as_mut() {
                rec.next = next;
            }
            if self.tail == Some(idx) {
                self.tail = Some(p);
            }
        }

        if let Some(rec) = self.slots[idx].as_mut() {
            rec.next = None;
        }
    }

    /// Bound devices in connection order.
    pub fn iter(&self) -> impl Iterator<Item = &HidDevice> {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let idx = cur?;
            let rec = self.slots[idx].as_ref()?;
            cur = rec.next;
            Some(rec)
        })
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
