//! Scripted host-stack collaborator for tests.

use std::collections::HashMap;
use std::time::Duration;

use driver_usb_host::{
    BufferId, ControlData, EndpDesc, IfDesc, IfaceId, IntrCallback, PortId, PortReqRecipient,
    PortReqTy, TransferId, TransferStatus, UsbError, UsbHostStack, UsbIface,
};

/// Build a synthetic interface on root hub port 1, with endpoints given as
/// `(address, attributes, interval)` triples.
pub fn iface(class: u8, sub_class: u8, protocol: u8, endpoints: &[(u8, u8, u8)]) -> UsbIface {
    iface_at_port(1, class, sub_class, protocol, endpoints)
}

pub fn iface_at_port(
    port: u8,
    class: u8,
    sub_class: u8,
    protocol: u8,
    endpoints: &[(u8, u8, u8)],
) -> UsbIface {
    UsbIface {
        id: IfaceId {
            port: PortId {
                root_hub_port_num: port,
                route_string: 0,
            },
            number: 0,
        },
        vendor: 0x045E,
        product: 0x028E,
        desc: IfDesc {
            number: 0,
            alternate_setting: 0,
            class,
            sub_class,
            protocol,
            endpoints: endpoints
                .iter()
                .map(|&(address, attributes, interval)| EndpDesc {
                    address,
                    attributes,
                    max_packet_size: 32,
                    interval,
                })
                .collect(),
        },
    }
}

pub struct ControlReqRecord {
    pub req_ty: PortReqTy,
    pub recipient: PortReqRecipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub len: u16,
}

pub struct SubmittedXfer {
    pub transfer: TransferId,
    pub iface: IfaceId,
    pub ep_index: usize,
    pub payload: Vec<u8>,
}

pub struct MockHost {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    callbacks: HashMap<u64, IntrCallback>,
    pub allocated: usize,
    pub freed: usize,
    pub control_reqs: Vec<ControlReqRecord>,
    pub control_response: Vec<u8>,
    pub control_result: Option<UsbError>,
    pub fail_submit: bool,
    pub submitted: Vec<SubmittedXfer>,
    pub aborted: Vec<TransferId>,
    pub quit_endpoints: Vec<(IfaceId, usize)>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            buffers: HashMap::new(),
            callbacks: HashMap::new(),
            allocated: 0,
            freed: 0,
            control_reqs: Vec::new(),
            control_response: Vec::new(),
            control_result: None,
            fail_submit: false,
            submitted: Vec::new(),
            aborted: Vec::new(),
            quit_endpoints: Vec::new(),
        }
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Deliver the completion callback of an outstanding transfer.
    pub fn complete(&mut self, transfer: TransferId) {
        if let Some(callback) = self.callbacks.remove(&transfer.0) {
            callback(transfer, TransferStatus::default());
        }
    }

    /// Steal a completion callback, e.g. to fire it after a disconnect.
    pub fn take_callback(&mut self, transfer: TransferId) -> Option<IntrCallback> {
        self.callbacks.remove(&transfer.0)
    }
}

impl UsbHostStack for MockHost {
    fn alloc_buffer(&mut self, len: usize) -> Result<BufferId, UsbError> {
        self.next_id += 1;
        self.buffers.insert(self.next_id, vec![0; len]);
        self.allocated += 1;
        Ok(BufferId(self.next_id))
    }

    fn free_buffer(&mut self, buffer: BufferId) {
        assert!(
            self.buffers.remove(&buffer.0).is_some(),
            "double free of {buffer}"
        );
        self.freed += 1;
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) {
        let buf = self.buffers.get_mut(&buffer.0).expect("write to freed buffer");
        buf[..data.len()].copy_from_slice(data);
    }

    fn read_buffer(&self, buffer: BufferId, out: &mut [u8]) -> usize {
        let buf = self.buffers.get(&buffer.0).expect("read from freed buffer");
        let len = out.len().min(buf.len());
        out[..len].copy_from_slice(&buf[..len]);
        len
    }

    fn control_transfer(
        &mut self,
        _iface: IfaceId,
        req_ty: PortReqTy,
        recipient: PortReqRecipient,
        request: u8,
        value: u16,
        index: u16,
        data: ControlData,
        _timeout: Duration,
    ) -> Result<u32, UsbError> {
        self.control_reqs.push(ControlReqRecord {
            req_ty,
            recipient,
            request,
            value,
            index,
            len: data.len(),
        });
        if let Some(err) = self.control_result.take() {
            return Err(err);
        }
        if let ControlData::In { buffer, len } = data {
            let len = (len as usize).min(self.control_response.len());
            let response = self.control_response[..len].to_vec();
            let buf = self.buffers.get_mut(&buffer.0).expect("control into freed buffer");
            buf[..len].copy_from_slice(&response);
            return Ok(len as u32);
        }
        Ok(0)
    }

    fn submit_interrupt(
        &mut self,
        iface: IfaceId,
        ep_index: usize,
        buffer: BufferId,
        len: usize,
        completion: IntrCallback,
    ) -> Result<TransferId, UsbError> {
        if self.fail_submit {
            return Err(UsbError::NoMemory);
        }
        let payload = self.buffers.get(&buffer.0).expect("submit with freed buffer")[..len].to_vec();
        self.next_id += 1;
        let transfer = TransferId(self.next_id);
        self.submitted.push(SubmittedXfer {
            transfer,
            iface,
            ep_index,
            payload,
        });
        self.callbacks.insert(transfer.0, completion);
        Ok(transfer)
    }

    fn abort_transfer(&mut self, transfer: TransferId) {
        self.aborted.push(transfer);
        self.callbacks.remove(&transfer.0);
    }

    fn quit_endpoint(&mut self, iface: IfaceId, ep_index: usize) {
        self.quit_endpoints.push((iface, ep_index));
    }
}
