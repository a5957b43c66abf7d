//! Variant-specific activation packets. Some controller families will not
//! stream input reports until they have been woken over their interrupt OUT
//! endpoint.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use driver_usb_host::{IntrCallback, UsbHostStack, UsbIface};

use crate::class::HidType;
use crate::registry::{HidDevice, PendingTransfer, XFER_COMPLETED, XFER_IN_FLIGHT};

/// Activation packets always go out over the first endpoint.
const INIT_EP_INDEX: usize = 0;

const XBOXONE_START_INPUT: [u8; 5] = [0x05, 0x20, 0x00, 0x01, 0x00];
const XBOXONE_S_INIT: [u8; 5] = [0x05, 0x20, 0x00, 0x0F, 0x06];

const XBOX360W_SET_LED: [u8; 4] = [0x00, 0x00, 0x08, 0x40];
const XBOX360W_INQUIRE_PRESENT: [u8; 12] =
    [0x08, 0x00, 0x0F, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Xbox 360 front panel quadrants are numbered 3,4,1,2 relative to the
/// physical root hub ports.
fn remap_port(port: u8) -> u8 {
    if port <= 2 {
        port + 2
    } else {
        port - 2
    }
}

/// Send whatever activation sequence the variant needs. Best-effort: the
/// device may still function (or retry on its own) if a packet is lost, so
/// nothing here can fail the probe.
pub(crate) fn activate(host: &mut dyn UsbHostStack, rec: &mut HidDevice, iface: &UsbIface) {
    match rec.ty {
        HidType::XboxOne => {
            write_packet(host, rec, iface, &XBOXONE_START_INPUT);
            write_packet(host, rec, iface, &XBOXONE_S_INIT);
        }
        HidType::Xbox360Wired => {
            let led = remap_port(iface.id.port.root_hub_port_num) + 1;
            write_packet(host, rec, iface, &[0x01, 0x03, led]);
        }
        HidType::Xbox360Wireless => {
            write_packet(host, rec, iface, &XBOX360W_SET_LED);
            write_packet(host, rec, iface, &XBOX360W_INQUIRE_PRESENT);
        }
        _ => {}
    }
}

/// Fire-and-forget interrupt OUT write, tracked in one of the record's
/// pending-transfer slots until disconnect reclaims it.
fn write_packet(
    host: &mut dyn UsbHostStack,
    rec: &mut HidDevice,
    iface: &UsbIface,
    payload: &[u8],
) {
    let Some(slot) = rec.transfers.iter_mut().find(|slot| slot.is_none()) else {
        log::warn!("usbhidd: no free transfer slot for init packet on {}", iface.id);
        return;
    };

    let buffer = match host.alloc_buffer(payload.len()) {
        Ok(buffer) => buffer,
        Err(err) => {
            log::warn!("usbhidd: init packet allocation failed on {}: {}", iface.id, err);
            return;
        }
    };
    host.write_buffer(buffer, payload);

    let state = Arc::new(AtomicU8::new(XFER_IN_FLIGHT));
    let completion_state = Arc::clone(&state);
    let completion: IntrCallback = Box::new(move |transfer, status| {
        // A concurrent disconnect may already have aborted this transfer; in
        // that case the record is gone and there is nothing left to do.
        if completion_state
            .compare_exchange(XFER_IN_FLIGHT, XFER_COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            log::trace!("usbhidd: interrupt write {} complete ({:?})", transfer, status.kind);
        }
    });

    match host.submit_interrupt(iface.id, INIT_EP_INDEX, buffer, payload.len(), completion) {
        Ok(transfer) => {
            *slot = Some(PendingTransfer {
                transfer,
                buffer,
                state,
            })
        }
        Err(err) => {
            host.free_buffer(buffer);
            log::warn!("usbhidd: init packet submission failed on {}: {}", iface.id, err);
        }
    }
}
