//! Minimal SDP server
//!
//! Maintains a small fixed table of local service records — the SDP server
//! itself and one RFCOMM-backed serial-port service on a fixed channel —
//! and answers SERVICE_SEARCH_ATTR_REQUEST with a single self-contained
//! response. The record set is small enough that no continuation is ever
//! needed.

use super::protocol::{decode_data_element, encode_data_element, SdpPacket};
use super::types::*;
use log::{debug, warn};

/// One local service record: handle plus attribute list sorted by id
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub handle: u32,
    pub attributes: Vec<(u16, DataElement)>,
}

impl ServiceRecord {
    /// True if any attribute value contains the UUID
    fn matches(&self, uuid: &Uuid) -> bool {
        self.attributes
            .iter()
            .any(|(_, value)| value.contains_uuid(uuid))
    }

    /// Encode as the attribute-list sequence SDP responses carry
    fn to_attribute_list(&self) -> DataElement {
        let mut items = Vec::with_capacity(self.attributes.len() * 2);
        for (id, value) in &self.attributes {
            items.push(DataElement::Unsigned16(*id));
            items.push(value.clone());
        }
        DataElement::Sequence(items)
    }
}

/// The fixed-table SDP server
#[derive(Debug)]
pub struct SdpServer {
    records: Vec<ServiceRecord>,
}

impl SdpServer {
    /// Build the record table; the serial-port record binds to
    /// `rfcomm_channel`
    pub fn new(rfcomm_channel: u8) -> Self {
        let sdp_record = ServiceRecord {
            handle: 0x0000_0000,
            attributes: vec![
                (
                    ATTR_SERVICE_RECORD_HANDLE,
                    DataElement::Unsigned32(0x0000_0000),
                ),
                (
                    ATTR_SERVICE_CLASS_ID_LIST,
                    DataElement::Sequence(vec![DataElement::Uuid(Uuid::Uuid16(
                        UUID_SERVICE_DISCOVERY_SERVER,
                    ))]),
                ),
            ],
        };

        let serial_record = ServiceRecord {
            handle: 0x0001_0000,
            attributes: vec![
                (
                    ATTR_SERVICE_RECORD_HANDLE,
                    DataElement::Unsigned32(0x0001_0000),
                ),
                (
                    ATTR_SERVICE_CLASS_ID_LIST,
                    DataElement::Sequence(vec![DataElement::Uuid(Uuid::Uuid16(UUID_SERIAL_PORT))]),
                ),
                (
                    ATTR_PROTOCOL_DESCRIPTOR_LIST,
                    DataElement::Sequence(vec![
                        DataElement::Sequence(vec![DataElement::Uuid(Uuid::Uuid16(
                            UUID_PROTO_L2CAP,
                        ))]),
                        DataElement::Sequence(vec![
                            DataElement::Uuid(Uuid::Uuid16(UUID_PROTO_RFCOMM)),
                            DataElement::Unsigned8(rfcomm_channel),
                        ]),
                    ]),
                ),
                (
                    ATTR_BROWSE_GROUP_LIST,
                    DataElement::Sequence(vec![DataElement::Uuid(Uuid::Uuid16(
                        UUID_PUBLIC_BROWSE_GROUP,
                    ))]),
                ),
                (
                    ATTR_SERVICE_NAME,
                    DataElement::TextString("Serial Port".to_string()),
                ),
            ],
        };

        Self {
            records: vec![sdp_record, serial_record],
        }
    }

    /// Answer an inbound request PDU with a full response PDU
    pub fn handle_request(&self, packet: &SdpPacket) -> Vec<u8> {
        match packet.pdu_id {
            SdpPdu::ServiceSearchAttributeRequest => {
                match self.search_attr_response(packet) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("malformed SDP request: {e}");
                        error_response(packet.transaction_id, SDP_ERR_INVALID_SYNTAX)
                    }
                }
            }
            other => {
                debug!("unsupported SDP request PDU {other:?}");
                error_response(packet.transaction_id, SDP_ERR_INVALID_SYNTAX)
            }
        }
    }

    fn search_attr_response(&self, packet: &SdpPacket) -> Result<Vec<u8>, SdpError> {
        let mut offset = 0;
        let pattern = decode_data_element(&packet.parameters, &mut offset)?;
        let DataElement::Sequence(pattern_uuids) = pattern else {
            return Err(SdpError::InvalidPacket(
                "Search pattern is not a sequence".into(),
            ));
        };

        // The fixed record set always fits one response; the max byte count
        // and attribute range are accepted as-is
        let matched: Vec<&ServiceRecord> = self
            .records
            .iter()
            .filter(|record| {
                pattern_uuids.iter().any(|element| match element {
                    DataElement::Uuid(uuid) => record.matches(uuid),
                    _ => false,
                })
            })
            .collect();

        let attribute_lists = DataElement::Sequence(
            matched
                .iter()
                .map(|record| record.to_attribute_list())
                .collect(),
        );
        let mut encoded = Vec::new();
        encode_data_element(&attribute_lists, &mut encoded);

        let mut parameters = Vec::with_capacity(3 + encoded.len());
        parameters.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        parameters.extend_from_slice(&encoded);
        parameters.push(0); // empty continuation

        Ok(SdpPacket::new(
            SdpPdu::ServiceSearchAttributeResponse,
            packet.transaction_id,
            parameters,
        )
        .serialize())
    }
}

fn error_response(transaction_id: u16, code: u16) -> Vec<u8> {
    SdpPacket::new(SdpPdu::ErrorResponse, transaction_id, code.to_be_bytes().to_vec()).serialize()
}
