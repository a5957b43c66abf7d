//! Contract between a USB host stack and its class drivers.
//!
//! The host stack enumerates devices and runs the transfer schedulers; class
//! drivers inspect interface descriptors, claim interfaces and exchange data
//! through the [`UsbHostStack`] operations. Drivers register themselves by
//! implementing [`ClassDriver`].

pub extern crate smallvec;

use std::time::Duration;
use std::{fmt, result};

use smallvec::SmallVec;
use thiserror::Error;

/// Identifies a root hub port, possibly behind a chain of hubs.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PortId {
    pub root_hub_port_num: u8,
    pub route_string: u32,
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root_hub_port_num)?;
        // Route string components are 4 bits per traversed hub.
        let mut route_string = self.route_string;
        while route_string != 0 {
            write!(f, ".{}", route_string & 0xF)?;
            route_string >>= 4;
        }
        Ok(())
    }
}

/// Identifies one interface of a configured device.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct IfaceId {
    pub port: PortId,
    pub number: u8,
}

impl fmt::Display for IfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.number)
    }
}

pub const ENDP_ATTR_TY_MASK: u8 = 0x03;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EndpointTy {
    Ctrl,
    Isoch,
    Bulk,
    Interrupt,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EndpDirection {
    Out,
    In,
    Bidirectional,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EndpDesc {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpDesc {
    pub fn ty(self) -> EndpointTy {
        match self.attributes & ENDP_ATTR_TY_MASK {
            0 => EndpointTy::Ctrl,
            1 => EndpointTy::Isoch,
            2 => EndpointTy::Bulk,
            3 => EndpointTy::Interrupt,
            _ => unreachable!(),
        }
    }
    pub fn is_control(&self) -> bool {
        self.ty() == EndpointTy::Ctrl
    }
    pub fn is_interrupt(&self) -> bool {
        self.ty() == EndpointTy::Interrupt
    }
    pub fn direction(&self) -> EndpDirection {
        if self.is_control() {
            return EndpDirection::Bidirectional;
        }
        if self.address & 0x80 != 0 {
            EndpDirection::In
        } else {
            EndpDirection::Out
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct IfDesc {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub endpoints: SmallVec<[EndpDesc; 4]>,
}

/// A candidate interface handed to [`ClassDriver::probe`], together with the
/// identity of the device that owns it.
#[derive(Clone, Debug)]
pub struct UsbIface {
    pub id: IfaceId,
    pub vendor: u16,
    pub product: u16,
    pub desc: IfDesc,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PortReqTy {
    Standard,
    Class,
    Vendor,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PortReqRecipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PortReqDirection {
    HostToDevice,
    DeviceToHost,
}

/// Standard setup request codes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetupReq {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
}

/// Handle to a transfer-visible buffer owned by the host stack.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Handle to an in-flight transfer request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xfer{}", self.0)
    }
}

/// Data stage of a control transfer. The direction is derived from the
/// variant, so a request cannot disagree with its own data stage.
#[derive(Clone, Copy, Debug)]
pub enum ControlData {
    In { buffer: BufferId, len: u16 },
    Out { buffer: BufferId, len: u16 },
    NoData,
}

impl ControlData {
    pub fn len(&self) -> u16 {
        match *self {
            Self::In { len, .. } => len,
            Self::Out { len, .. } => len,
            Self::NoData => 0,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn direction(&self) -> PortReqDirection {
        match self {
            Self::In { .. } => PortReqDirection::DeviceToHost,
            Self::Out { .. } => PortReqDirection::HostToDevice,
            Self::NoData => PortReqDirection::HostToDevice,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TransferStatus {
    pub kind: TransferStatusKind,
    pub bytes_transferred: u32,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransferStatusKind {
    Success,
    ShortPacket,
    Stalled,
    Unknown,
}

impl Default for TransferStatusKind {
    fn default() -> Self {
        Self::Success
    }
}

/// Completion callback for asynchronous transfers. May be invoked from a
/// completion-polling or interrupt context, concurrently with driver entry
/// points.
pub type IntrCallback = Box<dyn FnOnce(TransferId, TransferStatus) + Send>;

/// Transport-level transfer failure.
#[derive(Debug, Error)]
pub enum UsbError {
    #[error("transfer timed out")]
    TimedOut,

    #[error("endpoint stalled")]
    Stalled,

    #[error("no transfer memory")]
    NoMemory,

    #[error("device no longer present")]
    NoDevice,

    #[error("invalid request: {0}")]
    Invalid(&'static str),
}

/// Outcome of a class-driver lifecycle operation, as seen by the host stack.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Not an error: the interface does not belong to the probed driver, and
    /// the host stack should offer it to the next driver in its table.
    #[error("interface not matched")]
    NotMatched,

    /// The driver's device pool is exhausted.
    #[error("out of device records")]
    OutOfResources,

    /// A transfer required to complete the operation failed. During probing
    /// the host stack treats this like [`DriverError::NotMatched`].
    #[error("required transfer failed: {0}")]
    Transfer(#[from] UsbError),

    /// Disconnect could not locate the record it was asked to release. This
    /// indicates registry corruption and is not locally recoverable.
    #[error("no device record bound to the interface")]
    ConsistencyViolation,
}

pub type Result<T, E = DriverError> = result::Result<T, E>;

/// Operations a class driver consumes from the host stack.
///
/// Contract notes:
/// - `abort_transfer` also reclaims the underlying transfer descriptor;
///   aborting a transfer that has already completed is a no-op. The data
///   buffer is always released separately with `free_buffer`.
/// - `control_transfer` is synchronous and bounded by `timeout`.
/// - `submit_interrupt` snapshots the buffer contents at submission time and
///   completes through the supplied callback.
pub trait UsbHostStack {
    fn alloc_buffer(&mut self, len: usize) -> Result<BufferId, UsbError>;
    fn free_buffer(&mut self, buffer: BufferId);
    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]);
    fn read_buffer(&self, buffer: BufferId, out: &mut [u8]) -> usize;

    #[allow(clippy::too_many_arguments)]
    fn control_transfer(
        &mut self,
        iface: IfaceId,
        req_ty: PortReqTy,
        recipient: PortReqRecipient,
        request: u8,
        value: u16,
        index: u16,
        data: ControlData,
        timeout: Duration,
    ) -> Result<u32, UsbError>;

    fn submit_interrupt(
        &mut self,
        iface: IfaceId,
        ep_index: usize,
        buffer: BufferId,
        len: usize,
        completion: IntrCallback,
    ) -> Result<TransferId, UsbError>;

    fn abort_transfer(&mut self, transfer: TransferId);

    /// Stop all transfer activity on one endpoint of the interface.
    fn quit_endpoint(&mut self, iface: IfaceId, ep_index: usize);
}

/// Entry points a class driver registers with the host stack's driver table.
///
/// The host stack serializes `probe` and `disconnect` for a given interface:
/// `probe` is called once per candidate interface during enumeration, and
/// `disconnect` exactly once when a claimed interface is removed.
pub trait ClassDriver {
    fn probe(&mut self, host: &mut dyn UsbHostStack, iface: &UsbIface) -> Result<()>;
    fn disconnect(&mut self, host: &mut dyn UsbHostStack, iface: &UsbIface) -> Result<()>;
    fn suspend(&mut self, iface: &UsbIface);
    fn resume(&mut self, iface: &UsbIface);
}

#[cfg(test)]
mod test {
    use super::*;

    fn endp(address: u8, attributes: u8) -> EndpDesc {
        EndpDesc {
            address,
            attributes,
            max_packet_size: 32,
            interval: 4,
        }
    }

    #[test]
    fn endpoint_ty_from_attributes() {
        assert_eq!(endp(0x81, 0x00).ty(), EndpointTy::Ctrl);
        assert_eq!(endp(0x81, 0x01).ty(), EndpointTy::Isoch);
        assert_eq!(endp(0x81, 0x02).ty(), EndpointTy::Bulk);
        assert_eq!(endp(0x81, 0x03).ty(), EndpointTy::Interrupt);
        // Upper attribute bits do not affect the transfer type.
        assert_eq!(endp(0x81, 0x0F).ty(), EndpointTy::Interrupt);
    }

    #[test]
    fn endpoint_direction_from_address() {
        assert_eq!(endp(0x81, 0x03).direction(), EndpDirection::In);
        assert_eq!(endp(0x01, 0x03).direction(), EndpDirection::Out);
        assert_eq!(endp(0x00, 0x00).direction(), EndpDirection::Bidirectional);
    }

    #[test]
    fn control_data_direction() {
        let buffer = BufferId(1);
        assert_eq!(
            ControlData::In { buffer, len: 32 }.direction(),
            PortReqDirection::DeviceToHost
        );
        assert_eq!(
            ControlData::Out { buffer, len: 8 }.direction(),
            PortReqDirection::HostToDevice
        );
        assert_eq!(ControlData::NoData.direction(), PortReqDirection::HostToDevice);
        assert_eq!(ControlData::NoData.len(), 0);
        assert!(ControlData::NoData.is_empty());
    }

    #[test]
    fn port_id_display() {
        let root = PortId {
            root_hub_port_num: 2,
            route_string: 0,
        };
        assert_eq!(root.to_string(), "2");

        let routed = PortId {
            root_hub_port_num: 1,
            route_string: 0x43,
        };
        assert_eq!(routed.to_string(), "1.3.4");
        assert_eq!(
            IfaceId {
                port: routed,
                number: 2
            }
            .to_string(),
            "1.3.4/2"
        );
    }
}
