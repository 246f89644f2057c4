//! RFCOMM protocol constants

/// Channels multiplexed per session, control channel included
pub const RFCOMM_MAX_CHANNELS: usize = 8;

/// The server channel our serial-port SDP record advertises
pub const RFCOMM_SPP_CHANNEL: u8 = 1;

/// Default frame size negotiated via PN
pub const RFCOMM_DEFAULT_MTU: u16 = 127;

// Frame type values in the control byte (poll/final bit masked out)
pub const FRAME_SABM: u8 = 0x2F;
pub const FRAME_UA: u8 = 0x63;
pub const FRAME_DM: u8 = 0x0F;
pub const FRAME_DISC: u8 = 0x43;
pub const FRAME_UIH: u8 = 0xEF;

/// Poll/final bit in the control byte
pub const CONTROL_PF: u8 = 0x10;

/// Extension bit terminating address and length fields
pub const EA_BIT: u8 = 0x01;

// Multiplexer control message types (type field, header byte >> 2)
pub const MCC_PN: u8 = 0x20;
pub const MCC_PSC: u8 = 0x10;
pub const MCC_CLD: u8 = 0x30;
pub const MCC_TEST: u8 = 0x08;
pub const MCC_FCON: u8 = 0x28;
pub const MCC_FCOFF: u8 = 0x18;
pub const MCC_MSC: u8 = 0x38;
pub const MCC_NSC: u8 = 0x04;
pub const MCC_RPN: u8 = 0x24;
pub const MCC_RLS: u8 = 0x14;

// Modem status signal bits (V.24 equivalents)
pub const MSC_FC: u8 = 0x02;
pub const MSC_RTC: u8 = 0x04;
pub const MSC_RTR: u8 = 0x08;
pub const MSC_IC: u8 = 0x40;
pub const MSC_DV: u8 = 0x80;

/// Signals asserted on every channel we open: RTC + RTR + DV, EA set
pub const MSC_DEFAULT_SIGNALS: u8 = 0x8D;

// RPN defaults: 115200 baud, 8 data bits, 1 stop bit, no parity
pub const RPN_BAUD_115200: u8 = 0x07;
pub const RPN_DATA_8N1: u8 = 0x03;
pub const RPN_XON_CHAR: u8 = 0x11;
pub const RPN_XOFF_CHAR: u8 = 0x13;
