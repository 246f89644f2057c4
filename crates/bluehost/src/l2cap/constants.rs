//! L2CAP protocol constants

// Fixed channel IDs
pub const L2CAP_SIGNALING_CID: u16 = 0x0001;
pub const L2CAP_CONNECTIONLESS_CID: u16 = 0x0002;

// Dynamic CID range
pub const L2CAP_DYNAMIC_CID_MIN: u16 = 0x0040;
pub const L2CAP_DYNAMIC_CID_MAX: u16 = 0xFFFF;

// Basic header: length (2) + channel id (2)
pub const L2CAP_BASIC_HEADER_SIZE: usize = 4;

// Signaling command header: code (1) + identifier (1) + length (2)
pub const L2CAP_COMMAND_HEADER_SIZE: usize = 4;

// Signaling command codes
pub const L2CAP_COMMAND_REJECT: u8 = 0x01;
pub const L2CAP_CONNECTION_REQUEST: u8 = 0x02;
pub const L2CAP_CONNECTION_RESPONSE: u8 = 0x03;
pub const L2CAP_CONFIGURE_REQUEST: u8 = 0x04;
pub const L2CAP_CONFIGURE_RESPONSE: u8 = 0x05;
pub const L2CAP_DISCONNECTION_REQUEST: u8 = 0x06;
pub const L2CAP_DISCONNECTION_RESPONSE: u8 = 0x07;
pub const L2CAP_ECHO_REQUEST: u8 = 0x08;
pub const L2CAP_ECHO_RESPONSE: u8 = 0x09;
pub const L2CAP_INFORMATION_REQUEST: u8 = 0x0A;
pub const L2CAP_INFORMATION_RESPONSE: u8 = 0x0B;

// Connection response results
pub const L2CAP_CONN_SUCCESS: u16 = 0x0000;
pub const L2CAP_CONN_PENDING: u16 = 0x0001;
pub const L2CAP_CONN_REFUSED_PSM: u16 = 0x0002;
pub const L2CAP_CONN_REFUSED_SECURITY: u16 = 0x0003;
pub const L2CAP_CONN_REFUSED_RESOURCES: u16 = 0x0004;

// Configuration option types
pub const L2CAP_CONF_MTU: u8 = 0x01;
pub const L2CAP_CONF_FLUSH_TIMEOUT: u8 = 0x02;
pub const L2CAP_CONF_QOS: u8 = 0x03;

// Configuration response results
pub const L2CAP_CONF_SUCCESS: u16 = 0x0000;
pub const L2CAP_CONF_UNACCEPTABLE: u16 = 0x0001;

// Information request types
pub const L2CAP_INFO_CONNECTIONLESS_MTU: u16 = 0x0001;
pub const L2CAP_INFO_EXTENDED_FEATURES: u16 = 0x0002;
pub const L2CAP_INFO_FIXED_CHANNELS: u16 = 0x0003;
pub const L2CAP_INFO_SUCCESS: u16 = 0x0000;
pub const L2CAP_INFO_NOT_SUPPORTED: u16 = 0x0001;

// Default MTU for BR/EDR connection-oriented channels
pub const L2CAP_DEFAULT_MTU: u16 = 672;

// Well-known PSMs this stack speaks
pub const PSM_SDP: u16 = 0x0001;
pub const PSM_RFCOMM: u16 = 0x0003;
