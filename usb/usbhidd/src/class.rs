//! Interface classification: decides whether a candidate interface is a HID
//! or HID-like device, and which protocol family it speaks.

use std::time::Duration;

use driver_usb_host::{
    ControlData, DriverError, IfDesc, PortReqRecipient, PortReqTy, SetupReq, UsbHostStack, UsbIface,
};

/// Standard HID interface class.
const USB_CLASS_HID: u8 = 0x03;

/// Xbox 360 vendor-specific signature; wired and wireless receivers share the
/// sub-class and differ in the protocol byte.
const XBOX360_SUBCLASS: u8 = 0x5D;
const XBOX360_WIRED_PROTOCOL: u8 = 0x01;
const XBOX360_WIRELESS_PROTOCOL: u8 = 0x81;

/// Xbox One / Series signature. These controllers expose several interfaces
/// with the same class; only the actual control channel polls both of its
/// first two endpoints at 4 ms.
const XBOXONE_SUBCLASS: u8 = 0x47;
const XBOXONE_PROTOCOL: u8 = 0xD0;
const XBOXONE_CONTROL_INTERVAL: u8 = 0x04;

/// Original Xbox (XID) peripherals use a legacy vendor class. The concrete
/// peripheral type is only discoverable through the XID descriptor.
/// Ref <https://xboxdevwiki.net/Xbox_Input_Devices>
const XID_CLASS: u8 = 0x58;
const XID_SUBCLASS: u8 = 0x42;
const XID_DESC_VALUE: u16 = 0x4200;
const XID_DESC_LEN: usize = 32;
const XID_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// XID descriptor device kinds.
const XID_KIND_GAMEPAD: u8 = 0x01; // Duke, S, wheels, arcade sticks
const XID_KIND_IR_DONGLE: u8 = 0x03; // DVD movie playback IR dongle
const XID_KIND_STEEL_BATTALION: u8 = 0x80;

/// Protocol family a bound device is classified as.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum HidType {
    #[default]
    Generic,
    Xbox360Wired,
    Xbox360Wireless,
    XboxOne,
    XidGamepad,
    XidIrDongle,
    XidSteelBattalion,
}

/// XID descriptor returned by original Xbox peripherals.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XidDescriptor {
    pub length: u8,
    pub kind: u8,
    pub xid_release: u16,
    pub device_kind: u8,
    pub device_sub_kind: u8,
    pub max_input_len: u8,
    pub max_output_len: u8,
}

unsafe impl plain::Plain for XidDescriptor {}

/// Classification decision table, first match wins.
///
/// Interfaces that match no row are rejected with
/// [`DriverError::NotMatched`]; a failed XID disambiguation probe yields
/// [`DriverError::Transfer`], which the host stack treats the same way.
pub fn classify(host: &mut dyn UsbHostStack, iface: &UsbIface) -> Result<HidType, DriverError> {
    let desc = &iface.desc;
    match (desc.class, desc.sub_class, desc.protocol) {
        (USB_CLASS_HID, _, _) => Ok(HidType::Generic),
        (_, XBOX360_SUBCLASS, XBOX360_WIRED_PROTOCOL) => Ok(HidType::Xbox360Wired),
        (_, XBOX360_SUBCLASS, XBOX360_WIRELESS_PROTOCOL) => Ok(HidType::Xbox360Wireless),
        (_, XBOXONE_SUBCLASS, XBOXONE_PROTOCOL) if has_control_intervals(desc) => {
            Ok(HidType::XboxOne)
        }
        (XID_CLASS, XID_SUBCLASS, _) => classify_xid(host, iface),
        _ => Err(DriverError::NotMatched),
    }
}

/// First interrupt endpoint of the interface, in descriptor order.
pub fn interrupt_endpoint(desc: &IfDesc) -> Option<usize> {
    desc.endpoints.iter().position(|ep| ep.is_interrupt())
}

fn has_control_intervals(desc: &IfDesc) -> bool {
    matches!(
        desc.endpoints.as_slice(),
        [first, second, ..]
            if first.interval == XBOXONE_CONTROL_INTERVAL
                && second.interval == XBOXONE_CONTROL_INTERVAL
    )
}

/// Fetch the XID descriptor and dispatch on its device kind. The probe buffer
/// never outlives this call.
fn classify_xid(host: &mut dyn UsbHostStack, iface: &UsbIface) -> Result<HidType, DriverError> {
    let buffer = host.alloc_buffer(XID_DESC_LEN).map_err(DriverError::Transfer)?;
    let res = host.control_transfer(
        iface.id,
        PortReqTy::Vendor,
        PortReqRecipient::Interface,
        SetupReq::GetDescriptor as u8,
        XID_DESC_VALUE,
        iface.desc.number.into(),
        ControlData::In {
            buffer,
            len: XID_DESC_LEN as u16,
        },
        XID_PROBE_TIMEOUT,
    );
    let mut raw = [0u8; XID_DESC_LEN];
    host.read_buffer(buffer, &mut raw);
    host.free_buffer(buffer);
    res?;

    let desc = plain::from_bytes::<XidDescriptor>(&raw)
        .map_err(|_| DriverError::NotMatched)?;
    match desc.device_kind {
        XID_KIND_GAMEPAD => Ok(HidType::XidGamepad),
        XID_KIND_IR_DONGLE => Ok(HidType::XidIrDongle),
        XID_KIND_STEEL_BATTALION => Ok(HidType::XidSteelBattalion),
        other => {
            log::debug!(
                "usbhidd: unknown XID peripheral kind {:#04x} on {}",
                other,
                iface.id
            );
            Err(DriverError::NotMatched)
        }
    }
}
