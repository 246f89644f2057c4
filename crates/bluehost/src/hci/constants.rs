//! HCI protocol constants
//!
//! This module contains constants used in the Bluetooth HCI protocol.

// HCI packet types (H4 prefix bytes)
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_ACL_PKT: u8 = 0x02;
pub const HCI_SCO_PKT: u8 = 0x03;
pub const HCI_EVENT_PKT: u8 = 0x04;

// Maximum size of HCI command parameters
pub const HCI_MAX_PARAM_LEN: usize = 255;

// Common OGF (Opcode Group Field) values
pub const OGF_LINK_CTL: u8 = 0x01;
pub const OGF_LINK_POLICY: u8 = 0x02;
pub const OGF_HOST_CTL: u8 = 0x03;
pub const OGF_INFO_PARAM: u8 = 0x04;
pub const OGF_STATUS_PARAM: u8 = 0x05;
pub const OGF_VENDOR: u8 = 0x3F;

// Link Control Commands (OGF: 0x01)
pub const OCF_INQUIRY: u16 = 0x0001;
pub const OCF_INQUIRY_CANCEL: u16 = 0x0002;
pub const OCF_CREATE_CONNECTION: u16 = 0x0005;
pub const OCF_DISCONNECT: u16 = 0x0006;
pub const OCF_ACCEPT_CONNECTION_REQUEST: u16 = 0x0009;
pub const OCF_REJECT_CONNECTION_REQUEST: u16 = 0x000A;
pub const OCF_LINK_KEY_REQUEST_REPLY: u16 = 0x000B;
pub const OCF_LINK_KEY_REQUEST_NEGATIVE_REPLY: u16 = 0x000C;
pub const OCF_PIN_CODE_REQUEST_REPLY: u16 = 0x000D;
pub const OCF_PIN_CODE_REQUEST_NEGATIVE_REPLY: u16 = 0x000E;
pub const OCF_AUTHENTICATION_REQUESTED: u16 = 0x0011;
pub const OCF_REMOTE_NAME_REQUEST: u16 = 0x0019;

// Host Controller Commands (OGF: 0x03)
pub const OCF_RESET: u16 = 0x0003;
pub const OCF_WRITE_LOCAL_NAME: u16 = 0x0013;
pub const OCF_READ_LOCAL_NAME: u16 = 0x0014;
pub const OCF_WRITE_SCAN_ENABLE: u16 = 0x001A;
pub const OCF_WRITE_CLASS_OF_DEVICE: u16 = 0x0024;

// Informational Parameters (OGF: 0x04)
pub const OCF_READ_BD_ADDR: u16 = 0x0009;

// Vendor Commands (OGF: 0x3F) — Broadcom firmware download
pub const OCF_WRITE_RAM: u16 = 0x004C;
pub const OCF_LAUNCH_RAM: u16 = 0x004E;

// HCI Events
pub const EVT_INQUIRY_COMPLETE: u8 = 0x01;
pub const EVT_INQUIRY_RESULT: u8 = 0x02;
pub const EVT_CONN_COMPLETE: u8 = 0x03;
pub const EVT_CONN_REQUEST: u8 = 0x04;
pub const EVT_DISCONN_COMPLETE: u8 = 0x05;
pub const EVT_AUTH_COMPLETE: u8 = 0x06;
pub const EVT_REMOTE_NAME_REQ_COMPLETE: u8 = 0x07;
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;
pub const EVT_ROLE_CHANGE: u8 = 0x12;
pub const EVT_NUM_COMP_PKTS: u8 = 0x13;
pub const EVT_MODE_CHANGE: u8 = 0x14;
pub const EVT_PIN_CODE_REQ: u8 = 0x16;
pub const EVT_LINK_KEY_REQ: u8 = 0x17;
pub const EVT_LINK_KEY_NOTIFY: u8 = 0x18;
pub const EVT_MAX_SLOTS_CHANGE: u8 = 0x1B;
pub const EVT_INQUIRY_RESULT_WITH_RSSI: u8 = 0x22;
pub const EVT_EXTENDED_INQUIRY_RESULT: u8 = 0x2F;

// Scan enable values
pub const SCAN_ENABLE_NONE: u8 = 0x00;
pub const SCAN_ENABLE_INQUIRY: u8 = 0x01;
pub const SCAN_ENABLE_PAGE: u8 = 0x02;
pub const SCAN_ENABLE_INQUIRY_AND_PAGE: u8 = 0x03;

// General Inquiry Access Code
pub const GIAC_LAP: [u8; 3] = [0x33, 0x8B, 0x9E];

// Packet types offered in CREATE_CONNECTION (DM1..DH5)
pub const ACL_PACKET_TYPES: u16 = 0xCC18;

// ACL packet boundary flags (bits 12-13 of the handle field)
pub const ACL_PB_FIRST_NON_FLUSHABLE: u16 = 0x0000;
pub const ACL_PB_CONTINUATION: u16 = 0x1000;
pub const ACL_PB_FIRST_FLUSHABLE: u16 = 0x2000;

// Disconnect reason: remote user terminated connection
pub const REASON_REMOTE_USER_TERMINATED: u8 = 0x13;

// EIR data types carrying a device name
pub const EIR_SHORTENED_LOCAL_NAME: u8 = 0x08;
pub const EIR_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Human-readable reason for a non-zero HCI status code
pub fn status_to_str(status: u8) -> &'static str {
    match status {
        0x00 => "success",
        0x01 => "unknown HCI command",
        0x02 => "unknown connection identifier",
        0x03 => "hardware failure",
        0x04 => "page timeout",
        0x05 => "authentication failure",
        0x06 => "PIN or key missing",
        0x07 => "memory capacity exceeded",
        0x08 => "connection timeout",
        0x09 => "connection limit exceeded",
        0x0B => "connection already exists",
        0x0C => "command disallowed",
        0x0D => "connection rejected: limited resources",
        0x0E => "connection rejected: security reasons",
        0x0F => "connection rejected: unacceptable BD_ADDR",
        0x10 => "connection accept timeout exceeded",
        0x11 => "unsupported feature or parameter value",
        0x12 => "invalid HCI command parameters",
        0x13 => "remote user terminated connection",
        0x14 => "remote device terminated connection: low resources",
        0x15 => "remote device terminated connection: power off",
        0x16 => "connection terminated by local host",
        0x17 => "repeated attempts",
        0x18 => "pairing not allowed",
        0x22 => "LMP response timeout",
        0x28 => "instant passed",
        _ => "unknown error",
    }
}
