//! SDP wire protocol: PDU framing and the Data Element encoding
//!
//! Data Elements are SDP's self-describing recursive binary encoding. Each
//! element starts with a header byte whose top 5 bits select the type and
//! whose low 3 bits select the size class (fixed 1/2/4/8/16 bytes, or an
//! 8/16/32-bit length that follows). Sequences and alternatives recurse; the
//! decoder is bounded only by the frame length and never reads past the
//! buffer.

use super::types::{DataElement, SdpError, SdpPdu, Uuid};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

// Data element type codes (header byte >> 3)
const DE_NIL: u8 = 0;
const DE_UINT: u8 = 1;
const DE_INT: u8 = 2;
const DE_UUID: u8 = 3;
const DE_STRING: u8 = 4;
const DE_BOOL: u8 = 5;
const DE_SEQUENCE: u8 = 6;
const DE_ALTERNATIVE: u8 = 7;
const DE_URL: u8 = 8;

/// An SDP PDU
pub struct SdpPacket {
    pub pdu_id: SdpPdu,
    pub transaction_id: u16,
    pub parameters: Vec<u8>,
}

impl SdpPacket {
    pub fn new(pdu_id: SdpPdu, transaction_id: u16, parameters: Vec<u8>) -> Self {
        Self {
            pdu_id,
            transaction_id,
            parameters,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(5 + self.parameters.len());
        buffer.push(self.pdu_id as u8);
        buffer.extend_from_slice(&self.transaction_id.to_be_bytes());
        buffer.extend_from_slice(&(self.parameters.len() as u16).to_be_bytes());
        buffer.extend_from_slice(&self.parameters);
        buffer
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, SdpError> {
        if data.len() < 5 {
            return Err(SdpError::InvalidPacket("SDP packet too short".into()));
        }

        let pdu_id = SdpPdu::from_value(data[0])
            .ok_or_else(|| SdpError::InvalidPacket(format!("Unknown SDP PDU ID 0x{:02X}", data[0])))?;
        let transaction_id = u16::from_be_bytes([data[1], data[2]]);
        let parameters_length = u16::from_be_bytes([data[3], data[4]]) as usize;

        if data.len() < 5 + parameters_length {
            return Err(SdpError::InvalidPacket(
                "SDP packet shorter than parameter length".into(),
            ));
        }

        Ok(Self {
            pdu_id,
            transaction_id,
            parameters: data[5..5 + parameters_length].to_vec(),
        })
    }
}

fn take<'a>(data: &'a [u8], offset: &mut usize, count: usize) -> Result<&'a [u8], SdpError> {
    let end = offset
        .checked_add(count)
        .ok_or(SdpError::TruncatedElement)?;
    if end > data.len() {
        return Err(SdpError::TruncatedElement);
    }
    let slice = &data[*offset..end];
    *offset = end;
    Ok(slice)
}

/// Payload size for a size index, consuming the length bytes that follow
/// the header for the indirect classes
fn read_payload_size(
    data: &[u8],
    offset: &mut usize,
    size_index: u8,
) -> Result<usize, SdpError> {
    match size_index {
        0 => Ok(1),
        1 => Ok(2),
        2 => Ok(4),
        3 => Ok(8),
        4 => Ok(16),
        5 => Ok(take(data, offset, 1)?[0] as usize),
        6 => {
            let bytes = take(data, offset, 2)?;
            Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
        }
        7 => {
            let bytes = take(data, offset, 4)?;
            Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
        }
        _ => unreachable!("size index is 3 bits"),
    }
}

/// Decode one data element starting at `offset`, advancing it
pub fn decode_data_element(data: &[u8], offset: &mut usize) -> Result<DataElement, SdpError> {
    let header = take(data, offset, 1)?[0];
    let element_type = header >> 3;
    let size_index = header & 0x07;

    match element_type {
        DE_NIL => {
            if size_index != 0 {
                return Err(SdpError::UnsupportedElement(element_type, size_index));
            }
            Ok(DataElement::Nil)
        }

        DE_UINT => {
            let payload = take(data, offset, fixed_size(element_type, size_index)?)?;
            let mut cursor = Cursor::new(payload);
            match size_index {
                0 => Ok(DataElement::Unsigned8(payload[0])),
                1 => Ok(DataElement::Unsigned16(
                    cursor.read_u16::<BigEndian>().map_err(|_| SdpError::TruncatedElement)?,
                )),
                2 => Ok(DataElement::Unsigned32(
                    cursor.read_u32::<BigEndian>().map_err(|_| SdpError::TruncatedElement)?,
                )),
                3 => Ok(DataElement::Unsigned64(
                    cursor.read_u64::<BigEndian>().map_err(|_| SdpError::TruncatedElement)?,
                )),
                _ => Err(SdpError::UnsupportedElement(element_type, size_index)),
            }
        }

        DE_INT => {
            let payload = take(data, offset, fixed_size(element_type, size_index)?)?;
            let mut cursor = Cursor::new(payload);
            match size_index {
                0 => Ok(DataElement::Signed8(payload[0] as i8)),
                1 => Ok(DataElement::Signed16(
                    cursor.read_i16::<BigEndian>().map_err(|_| SdpError::TruncatedElement)?,
                )),
                2 => Ok(DataElement::Signed32(
                    cursor.read_i32::<BigEndian>().map_err(|_| SdpError::TruncatedElement)?,
                )),
                3 => Ok(DataElement::Signed64(
                    cursor.read_i64::<BigEndian>().map_err(|_| SdpError::TruncatedElement)?,
                )),
                _ => Err(SdpError::UnsupportedElement(element_type, size_index)),
            }
        }

        DE_UUID => match size_index {
            1 => {
                let payload = take(data, offset, 2)?;
                Ok(DataElement::Uuid(Uuid::Uuid16(u16::from_be_bytes([
                    payload[0], payload[1],
                ]))))
            }
            2 => {
                let payload = take(data, offset, 4)?;
                Ok(DataElement::Uuid(Uuid::Uuid32(u32::from_be_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]))))
            }
            4 => {
                let payload = take(data, offset, 16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(payload);
                Ok(DataElement::Uuid(Uuid::Uuid128(uuid)))
            }
            _ => Err(SdpError::UnsupportedElement(element_type, size_index)),
        },

        DE_STRING | DE_URL => {
            if size_index < 5 {
                return Err(SdpError::UnsupportedElement(element_type, size_index));
            }
            let length = read_payload_size(data, offset, size_index)?;
            let payload = take(data, offset, length)?;
            let text = String::from_utf8_lossy(payload).into_owned();
            if element_type == DE_STRING {
                Ok(DataElement::TextString(text))
            } else {
                Ok(DataElement::Url(text))
            }
        }

        DE_BOOL => {
            if size_index != 0 {
                return Err(SdpError::UnsupportedElement(element_type, size_index));
            }
            let payload = take(data, offset, 1)?;
            Ok(DataElement::Boolean(payload[0] != 0))
        }

        DE_SEQUENCE | DE_ALTERNATIVE => {
            if size_index < 5 {
                return Err(SdpError::UnsupportedElement(element_type, size_index));
            }
            let length = read_payload_size(data, offset, size_index)?;
            let body_end = offset
                .checked_add(length)
                .filter(|&end| end <= data.len())
                .ok_or(SdpError::TruncatedElement)?;

            let mut items = Vec::new();
            while *offset < body_end {
                items.push(decode_data_element(&data[..body_end], offset)?);
            }

            if element_type == DE_SEQUENCE {
                Ok(DataElement::Sequence(items))
            } else {
                Ok(DataElement::Alternative(items))
            }
        }

        _ => Err(SdpError::UnsupportedElement(element_type, size_index)),
    }
}

fn fixed_size(element_type: u8, size_index: u8) -> Result<usize, SdpError> {
    match size_index {
        0 => Ok(1),
        1 => Ok(2),
        2 => Ok(4),
        3 => Ok(8),
        4 => Ok(16),
        _ => Err(SdpError::UnsupportedElement(element_type, size_index)),
    }
}

/// Encode one data element, appending to `out`
pub fn encode_data_element(element: &DataElement, out: &mut Vec<u8>) {
    match element {
        DataElement::Nil => out.push(DE_NIL << 3),

        DataElement::Unsigned8(value) => {
            out.push(DE_UINT << 3);
            out.push(*value);
        }
        DataElement::Unsigned16(value) => {
            out.push(DE_UINT << 3 | 1);
            out.extend_from_slice(&value.to_be_bytes());
        }
        DataElement::Unsigned32(value) => {
            out.push(DE_UINT << 3 | 2);
            out.extend_from_slice(&value.to_be_bytes());
        }
        DataElement::Unsigned64(value) => {
            out.push(DE_UINT << 3 | 3);
            out.extend_from_slice(&value.to_be_bytes());
        }

        DataElement::Signed8(value) => {
            out.push(DE_INT << 3);
            out.push(*value as u8);
        }
        DataElement::Signed16(value) => {
            out.push(DE_INT << 3 | 1);
            out.extend_from_slice(&value.to_be_bytes());
        }
        DataElement::Signed32(value) => {
            out.push(DE_INT << 3 | 2);
            out.extend_from_slice(&value.to_be_bytes());
        }
        DataElement::Signed64(value) => {
            out.push(DE_INT << 3 | 3);
            out.extend_from_slice(&value.to_be_bytes());
        }

        DataElement::Uuid(Uuid::Uuid16(value)) => {
            out.push(DE_UUID << 3 | 1);
            out.extend_from_slice(&value.to_be_bytes());
        }
        DataElement::Uuid(Uuid::Uuid32(value)) => {
            out.push(DE_UUID << 3 | 2);
            out.extend_from_slice(&value.to_be_bytes());
        }
        DataElement::Uuid(Uuid::Uuid128(value)) => {
            out.push(DE_UUID << 3 | 4);
            out.extend_from_slice(value);
        }

        DataElement::TextString(text) => encode_with_length(DE_STRING, text.as_bytes(), out),
        DataElement::Url(text) => encode_with_length(DE_URL, text.as_bytes(), out),

        DataElement::Boolean(value) => {
            out.push(DE_BOOL << 3);
            out.push(u8::from(*value));
        }

        DataElement::Sequence(items) => encode_collection(DE_SEQUENCE, items, out),
        DataElement::Alternative(items) => encode_collection(DE_ALTERNATIVE, items, out),
    }
}

fn encode_collection(element_type: u8, items: &[DataElement], out: &mut Vec<u8>) {
    let mut body = Vec::new();
    for item in items {
        encode_data_element(item, &mut body);
    }
    encode_with_length(element_type, &body, out);
}

fn encode_with_length(element_type: u8, body: &[u8], out: &mut Vec<u8>) {
    if body.len() <= u8::MAX as usize {
        out.push(element_type << 3 | 5);
        out.push(body.len() as u8);
    } else if body.len() <= u16::MAX as usize {
        out.push(element_type << 3 | 6);
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    } else {
        out.push(element_type << 3 | 7);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    }
    out.extend_from_slice(body);
}

/// Build a SERVICE_SEARCH_ATTR_REQUEST PDU.
///
/// The search pattern wraps the single target UUID; the attribute list is
/// one 32-bit range element (`low << 16 | high`); the continuation block
/// echoes whatever the previous response carried (empty on the first round).
pub fn build_search_attr_request(
    transaction_id: u16,
    uuid: &Uuid,
    max_attribute_bytes: u16,
    attr_range_low: u16,
    attr_range_high: u16,
    continuation: &[u8],
) -> Vec<u8> {
    let mut parameters = Vec::new();

    encode_data_element(
        &DataElement::Sequence(vec![DataElement::Uuid(*uuid)]),
        &mut parameters,
    );
    parameters.extend_from_slice(&max_attribute_bytes.to_be_bytes());
    encode_data_element(
        &DataElement::Sequence(vec![DataElement::Unsigned32(
            (u32::from(attr_range_low) << 16) | u32::from(attr_range_high),
        )]),
        &mut parameters,
    );
    parameters.push(continuation.len() as u8);
    parameters.extend_from_slice(continuation);

    SdpPacket::new(
        SdpPdu::ServiceSearchAttributeRequest,
        transaction_id,
        parameters,
    )
    .serialize()
}

/// Split SERVICE_SEARCH_ATTR_RESPONSE parameters into attribute bytes and
/// the trailing continuation block
pub fn parse_search_attr_response(params: &[u8]) -> Result<(Vec<u8>, Vec<u8>), SdpError> {
    if params.len() < 3 {
        return Err(SdpError::InvalidPacket(
            "Search attribute response too short".into(),
        ));
    }
    let attribute_byte_count = u16::from_be_bytes([params[0], params[1]]) as usize;
    if params.len() < 2 + attribute_byte_count + 1 {
        return Err(SdpError::InvalidPacket(
            "Search attribute response shorter than attribute byte count".into(),
        ));
    }
    let attribute_bytes = params[2..2 + attribute_byte_count].to_vec();

    let continuation_length = params[2 + attribute_byte_count] as usize;
    let continuation_start = 2 + attribute_byte_count + 1;
    if params.len() < continuation_start + continuation_length {
        return Err(SdpError::InvalidPacket(
            "Continuation block truncated".into(),
        ));
    }
    let continuation =
        params[continuation_start..continuation_start + continuation_length].to_vec();

    Ok((attribute_bytes, continuation))
}
