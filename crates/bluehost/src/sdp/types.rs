//! SDP type definitions

use thiserror::Error;

/// Errors that can occur in the SDP layer
#[derive(Debug, Error)]
pub enum SdpError {
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Truncated data element")]
    TruncatedElement,

    #[error("Unsupported data element: type {0}, size index {1}")]
    UnsupportedElement(u8, u8),

    #[error("Peer reported SDP error 0x{0:04X}")]
    ErrorResponse(u16),

    #[error("L2CAP error: {0}")]
    L2cap(#[from] crate::l2cap::L2capError),
}

/// The Bluetooth base UUID suffix used to widen 16/32-bit UUIDs
const BASE_UUID_TAIL: [u8; 12] = [
    0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB,
];

/// A service UUID in any of SDP's three widths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Widen to the canonical 128-bit form for comparison
    pub fn to_uuid128(&self) -> [u8; 16] {
        match self {
            Self::Uuid128(value) => *value,
            Self::Uuid16(value) => Self::Uuid32(u32::from(*value)).to_uuid128(),
            Self::Uuid32(value) => {
                let mut out = [0u8; 16];
                out[..4].copy_from_slice(&value.to_be_bytes());
                out[4..].copy_from_slice(&BASE_UUID_TAIL);
                out
            }
        }
    }

    /// Equality across widths
    pub fn matches(&self, other: &Uuid) -> bool {
        self.to_uuid128() == other.to_uuid128()
    }
}

/// A decoded SDP Data Element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataElement {
    Nil,
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    Signed8(i8),
    Signed16(i16),
    Signed32(i32),
    Signed64(i64),
    Uuid(Uuid),
    TextString(String),
    Boolean(bool),
    Sequence(Vec<DataElement>),
    Alternative(Vec<DataElement>),
    Url(String),
}

impl DataElement {
    /// Depth-first search for a UUID anywhere inside this element
    pub fn contains_uuid(&self, uuid: &Uuid) -> bool {
        match self {
            Self::Uuid(own) => own.matches(uuid),
            Self::Sequence(items) | Self::Alternative(items) => {
                items.iter().any(|item| item.contains_uuid(uuid))
            }
            _ => false,
        }
    }
}

// Universal attribute IDs
pub const ATTR_SERVICE_RECORD_HANDLE: u16 = 0x0000;
pub const ATTR_SERVICE_CLASS_ID_LIST: u16 = 0x0001;
pub const ATTR_SERVICE_RECORD_STATE: u16 = 0x0002;
pub const ATTR_SERVICE_ID: u16 = 0x0003;
pub const ATTR_PROTOCOL_DESCRIPTOR_LIST: u16 = 0x0004;
pub const ATTR_BROWSE_GROUP_LIST: u16 = 0x0005;
pub const ATTR_BLUETOOTH_PROFILE_DESCRIPTOR_LIST: u16 = 0x0009;
pub const ATTR_SERVICE_NAME: u16 = 0x0100;

// Well-known service class UUIDs
pub const UUID_SERVICE_DISCOVERY_SERVER: u16 = 0x1000;
pub const UUID_PUBLIC_BROWSE_GROUP: u16 = 0x1002;
pub const UUID_SERIAL_PORT: u16 = 0x1101;

// Protocol UUIDs for protocol descriptor lists
pub const UUID_PROTO_L2CAP: u16 = 0x0100;
pub const UUID_PROTO_RFCOMM: u16 = 0x0003;

/// SDP PDU identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpPdu {
    ErrorResponse = 0x01,
    ServiceSearchRequest = 0x02,
    ServiceSearchResponse = 0x03,
    ServiceAttributeRequest = 0x04,
    ServiceAttributeResponse = 0x05,
    ServiceSearchAttributeRequest = 0x06,
    ServiceSearchAttributeResponse = 0x07,
}

impl SdpPdu {
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ErrorResponse),
            0x02 => Some(Self::ServiceSearchRequest),
            0x03 => Some(Self::ServiceSearchResponse),
            0x04 => Some(Self::ServiceAttributeRequest),
            0x05 => Some(Self::ServiceAttributeResponse),
            0x06 => Some(Self::ServiceSearchAttributeRequest),
            0x07 => Some(Self::ServiceSearchAttributeResponse),
            _ => None,
        }
    }
}

// SDP error response codes
pub const SDP_ERR_INVALID_SYNTAX: u16 = 0x0003;
pub const SDP_ERR_INVALID_PDU_SIZE: u16 = 0x0004;
