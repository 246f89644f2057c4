//! SDP layer: discovery client and the local server dispatch
//!
//! A discovery request opens (or reuses) the L2CAP connection to PSM 0x0001
//! and walks the continuation protocol: each response frame's attribute
//! bytes accumulate, and a non-empty continuation token is echoed back
//! verbatim in exactly one follow-up request. When an empty continuation
//! arrives the connection closes and the concatenated attribute stream is
//! handed to the Data Element decoder.

use super::protocol::{
    build_search_attr_request, decode_data_element, parse_search_attr_response, SdpPacket,
};
use super::server::SdpServer;
use super::types::{DataElement, SdpError, SdpPdu, Uuid};
use crate::hci::device::BdAddr;
use crate::hci::layer::HciLayer;
use crate::l2cap::constants::PSM_SDP;
use crate::l2cap::layer::{ChannelEvent, L2capLayer};
use crate::l2cap::types::{ChannelId, L2capChannelState};
use log::{debug, warn};

/// The maximum response size is always requested
const MAX_ATTRIBUTE_BYTES: u16 = 0xFFFF;

/// Events the SDP layer reports to the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpEvent {
    /// A discovery request finished; `attributes` holds one attribute-list
    /// sequence per matched service record
    RequestComplete {
        addr: BdAddr,
        uuid: Uuid,
        attributes: Vec<DataElement>,
    },
    /// A discovery request failed or was abandoned
    RequestFailed {
        addr: BdAddr,
        uuid: Uuid,
        reason: String,
    },
}

/// One response frame of a continuation round
#[derive(Debug, Clone)]
pub struct ResultFrame {
    pub transaction_id: u16,
    pub attribute_bytes: Vec<u8>,
    pub continuation: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    /// Waiting for the L2CAP channel to open
    WaitingChannel,
    /// Request sent, waiting for the (next) response frame
    WaitingResponse,
}

/// An in-flight discovery request
#[derive(Debug)]
pub struct SdpRequest {
    pub transaction_id: u16,
    pub uuid: Uuid,
    pub attr_range: (u16, u16),
    pub cid: ChannelId,
    pub addr: BdAddr,
    pub frames: Vec<ResultFrame>,
    state: RequestState,
}

impl SdpRequest {
    pub(crate) fn new(
        transaction_id: u16,
        uuid: Uuid,
        attr_range: (u16, u16),
        cid: ChannelId,
        addr: BdAddr,
    ) -> Self {
        Self {
            transaction_id,
            uuid,
            attr_range,
            cid,
            addr,
            frames: Vec::new(),
            state: RequestState::WaitingChannel,
        }
    }

    /// Record one response frame
    pub fn push_frame(&mut self, frame: ResultFrame) {
        self.frames.push(frame);
    }

    /// The accumulated attribute byte stream across all frames
    pub fn concatenated(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for frame in &self.frames {
            out.extend_from_slice(&frame.attribute_bytes);
        }
        out
    }
}

/// The SDP layer
pub struct SdpLayer {
    requests: Vec<SdpRequest>,
    next_transaction_id: u16,
    server: SdpServer,
}

impl SdpLayer {
    pub fn new(rfcomm_channel: u8) -> Self {
        Self {
            requests: Vec::new(),
            // Randomized so stale responses from a previous session never
            // match a live transaction
            next_transaction_id: rand::random::<u16>(),
            server: SdpServer::new(rfcomm_channel),
        }
    }

    fn allocate_transaction_id(&mut self) -> u16 {
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        self.next_transaction_id
    }

    /// Start a discovery request against `addr` for services matching
    /// `uuid`, fetching attributes in `[attr_low, attr_high]`
    pub fn start_request(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        addr: BdAddr,
        uuid: Uuid,
        attr_low: u16,
        attr_high: u16,
    ) -> Result<(), SdpError> {
        let cid = l2cap.start_connection(hci, addr, PSM_SDP)?;
        let transaction_id = self.allocate_transaction_id();
        let mut request = SdpRequest::new(transaction_id, uuid, (attr_low, attr_high), cid, addr);

        // A reused connection may already be open; send immediately then
        let already_open = l2cap
            .connection(cid)
            .map(|c| c.state == L2capChannelState::Open)
            .unwrap_or(false);
        if already_open {
            send_search_request(l2cap, hci, &request, &[])?;
            request.state = RequestState::WaitingResponse;
        }

        self.requests.push(request);
        Ok(())
    }

    /// Handle an L2CAP channel event for the SDP PSM
    pub fn on_channel_event(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        event: ChannelEvent,
    ) -> Vec<SdpEvent> {
        match event {
            ChannelEvent::Open { cid, .. } => {
                for request in self
                    .requests
                    .iter_mut()
                    .filter(|r| r.cid == cid && r.state == RequestState::WaitingChannel)
                {
                    match send_search_request(l2cap, hci, request, &[]) {
                        Ok(()) => request.state = RequestState::WaitingResponse,
                        Err(e) => warn!("could not send SDP request: {e}"),
                    }
                }
                Vec::new()
            }

            ChannelEvent::Data { cid, payload, .. } => self.on_data(l2cap, hci, cid, &payload),

            ChannelEvent::Closed { cid, .. } | ChannelEvent::ConnectFailed { cid, .. } => {
                let mut events = Vec::new();
                let mut index = 0;
                while index < self.requests.len() {
                    if self.requests[index].cid == cid {
                        let request = self.requests.remove(index);
                        events.push(SdpEvent::RequestFailed {
                            addr: request.addr,
                            uuid: request.uuid,
                            reason: "channel closed".to_string(),
                        });
                    } else {
                        index += 1;
                    }
                }
                events
            }
        }
    }

    fn on_data(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        cid: ChannelId,
        payload: &[u8],
    ) -> Vec<SdpEvent> {
        let packet = match SdpPacket::deserialize(payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("dropping malformed SDP PDU: {e}");
                return Vec::new();
            }
        };

        match packet.pdu_id {
            // Remote peer querying our records
            SdpPdu::ServiceSearchAttributeRequest
            | SdpPdu::ServiceSearchRequest
            | SdpPdu::ServiceAttributeRequest => {
                let response = self.server.handle_request(&packet);
                if let Err(e) = l2cap.send_data(hci, cid, &response) {
                    warn!("could not send SDP response: {e}");
                }
                Vec::new()
            }

            SdpPdu::ServiceSearchAttributeResponse => {
                self.on_search_attr_response(l2cap, hci, cid, &packet)
            }

            SdpPdu::ErrorResponse => {
                let code = match packet.parameters.as_slice() {
                    [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                    _ => 0,
                };
                self.fail_request(l2cap, hci, cid, format!("peer reported error 0x{code:04X}"))
            }

            other => {
                debug!("ignoring unexpected SDP PDU {other:?}");
                Vec::new()
            }
        }
    }

    fn on_search_attr_response(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        cid: ChannelId,
        packet: &SdpPacket,
    ) -> Vec<SdpEvent> {
        let Some(index) = self
            .requests
            .iter()
            .position(|r| r.cid == cid && r.state == RequestState::WaitingResponse)
        else {
            warn!("SDP response with no pending request on channel {cid}");
            return Vec::new();
        };
        if self.requests[index].transaction_id != packet.transaction_id {
            warn!(
                "SDP response transaction id 0x{:04X} does not match 0x{:04X}",
                packet.transaction_id, self.requests[index].transaction_id
            );
            return Vec::new();
        }

        let (attribute_bytes, continuation) = match parse_search_attr_response(&packet.parameters)
        {
            Ok(parsed) => parsed,
            Err(e) => {
                return self.fail_request(l2cap, hci, cid, e.to_string());
            }
        };

        self.requests[index].push_frame(ResultFrame {
            transaction_id: packet.transaction_id,
            attribute_bytes,
            continuation: continuation.clone(),
        });

        if continuation.is_empty() {
            // Complete: close the channel and decode the accumulated stream
            let request = self.requests.remove(index);
            if let Err(e) = l2cap.close_connection(hci, cid) {
                debug!("closing SDP channel {cid}: {e}");
            }

            let stream = request.concatenated();
            match decode_attribute_lists(&stream) {
                Ok(attributes) => vec![SdpEvent::RequestComplete {
                    addr: request.addr,
                    uuid: request.uuid,
                    attributes,
                }],
                Err(e) => vec![SdpEvent::RequestFailed {
                    addr: request.addr,
                    uuid: request.uuid,
                    reason: e.to_string(),
                }],
            }
        } else {
            // Exactly one follow-up request, echoing the token verbatim
            let transaction_id = self.allocate_transaction_id();
            let request = &mut self.requests[index];
            request.transaction_id = transaction_id;
            if let Err(e) = send_search_request(l2cap, hci, request, &continuation) {
                warn!("could not send SDP continuation request: {e}");
            }
            Vec::new()
        }
    }

    fn fail_request(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        cid: ChannelId,
        reason: String,
    ) -> Vec<SdpEvent> {
        let Some(index) = self.requests.iter().position(|r| r.cid == cid) else {
            return Vec::new();
        };
        let request = self.requests.remove(index);
        if let Err(e) = l2cap.close_connection(hci, cid) {
            debug!("closing SDP channel {cid}: {e}");
        }
        vec![SdpEvent::RequestFailed {
            addr: request.addr,
            uuid: request.uuid,
            reason,
        }]
    }
}

fn send_search_request(
    l2cap: &mut L2capLayer,
    hci: &mut HciLayer,
    request: &SdpRequest,
    continuation: &[u8],
) -> Result<(), SdpError> {
    let pdu = build_search_attr_request(
        request.transaction_id,
        &request.uuid,
        MAX_ATTRIBUTE_BYTES,
        request.attr_range.0,
        request.attr_range.1,
        continuation,
    );
    l2cap.send_data(hci, request.cid, &pdu)?;
    Ok(())
}

/// Decode the reassembled attribute byte stream: one outer sequence holding
/// one attribute-list sequence per matched record
pub fn decode_attribute_lists(stream: &[u8]) -> Result<Vec<DataElement>, SdpError> {
    if stream.is_empty() {
        return Ok(Vec::new());
    }
    let mut offset = 0;
    match decode_data_element(stream, &mut offset)? {
        DataElement::Sequence(lists) => Ok(lists),
        other => Ok(vec![other]),
    }
}
