//! HCI packet structures and parsing
//!
//! This module contains structures and methods for handling HCI packets:
//! command serialization, event parsing, ACL data framing, and the
//! per-packet-type reassembly of fragmented transport deliveries.

use crate::hci::constants::*;

/// Classic (BR/EDR) HCI commands
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum HciCommand {
    // Link Control Commands (OGF: 0x01)
    Inquiry { lap: [u8; 3], length: u8, num_responses: u8 },
    InquiryCancel,
    CreateConnection {
        bd_addr: [u8; 6],
        packet_type: u16,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
        allow_role_switch: u8,
    },
    Disconnect { handle: u16, reason: u8 },
    AcceptConnectionRequest { bd_addr: [u8; 6], role: u8 },
    RejectConnectionRequest { bd_addr: [u8; 6], reason: u8 },
    LinkKeyRequestReply { bd_addr: [u8; 6], link_key: [u8; 16] },
    LinkKeyRequestNegativeReply { bd_addr: [u8; 6] },
    PinCodeRequestReply { bd_addr: [u8; 6], pin: Vec<u8> },
    AuthenticationRequested { handle: u16 },
    RemoteNameRequest {
        bd_addr: [u8; 6],
        page_scan_repetition_mode: u8,
        clock_offset: u16,
    },

    // Host Controller Commands (OGF: 0x03)
    Reset,
    WriteLocalName { name: String },
    WriteScanEnable { enable: u8 },
    WriteClassOfDevice { class_of_device: [u8; 3] },

    // Informational Parameters (OGF: 0x04)
    ReadBdAddr,

    // Vendor Commands (OGF: 0x3F)
    WriteRam { address: u32, data: Vec<u8> },
    LaunchRam { address: u32 },
}

impl HciCommand {
    /// Get the OGF and OCF for this command
    pub fn opcode_parts(&self) -> (u8, u16) {
        match self {
            Self::Inquiry { .. } => (OGF_LINK_CTL, OCF_INQUIRY),
            Self::InquiryCancel => (OGF_LINK_CTL, OCF_INQUIRY_CANCEL),
            Self::CreateConnection { .. } => (OGF_LINK_CTL, OCF_CREATE_CONNECTION),
            Self::Disconnect { .. } => (OGF_LINK_CTL, OCF_DISCONNECT),
            Self::AcceptConnectionRequest { .. } => (OGF_LINK_CTL, OCF_ACCEPT_CONNECTION_REQUEST),
            Self::RejectConnectionRequest { .. } => (OGF_LINK_CTL, OCF_REJECT_CONNECTION_REQUEST),
            Self::LinkKeyRequestReply { .. } => (OGF_LINK_CTL, OCF_LINK_KEY_REQUEST_REPLY),
            Self::LinkKeyRequestNegativeReply { .. } => {
                (OGF_LINK_CTL, OCF_LINK_KEY_REQUEST_NEGATIVE_REPLY)
            }
            Self::PinCodeRequestReply { .. } => (OGF_LINK_CTL, OCF_PIN_CODE_REQUEST_REPLY),
            Self::AuthenticationRequested { .. } => (OGF_LINK_CTL, OCF_AUTHENTICATION_REQUESTED),
            Self::RemoteNameRequest { .. } => (OGF_LINK_CTL, OCF_REMOTE_NAME_REQUEST),

            Self::Reset => (OGF_HOST_CTL, OCF_RESET),
            Self::WriteLocalName { .. } => (OGF_HOST_CTL, OCF_WRITE_LOCAL_NAME),
            Self::WriteScanEnable { .. } => (OGF_HOST_CTL, OCF_WRITE_SCAN_ENABLE),
            Self::WriteClassOfDevice { .. } => (OGF_HOST_CTL, OCF_WRITE_CLASS_OF_DEVICE),

            Self::ReadBdAddr => (OGF_INFO_PARAM, OCF_READ_BD_ADDR),

            Self::WriteRam { .. } => (OGF_VENDOR, OCF_WRITE_RAM),
            Self::LaunchRam { .. } => (OGF_VENDOR, OCF_LAUNCH_RAM),
        }
    }

    /// The 16-bit opcode (OGF << 10 | OCF)
    pub fn opcode(&self) -> u16 {
        let (ogf, ocf) = self.opcode_parts();
        opcode(ogf, ocf)
    }

    /// Convert the command to its raw parameter bytes
    fn parameters(&self) -> Vec<u8> {
        match self {
            Self::InquiryCancel | Self::Reset | Self::ReadBdAddr => vec![],

            Self::Inquiry { lap, length, num_responses } => {
                let mut params = Vec::with_capacity(5);
                params.extend_from_slice(lap);
                params.push(*length);
                params.push(*num_responses);
                params
            }

            Self::CreateConnection {
                bd_addr,
                packet_type,
                page_scan_repetition_mode,
                clock_offset,
                allow_role_switch,
            } => {
                let mut params = Vec::with_capacity(13);
                params.extend_from_slice(bd_addr);
                params.extend_from_slice(&packet_type.to_le_bytes());
                params.push(*page_scan_repetition_mode);
                params.push(0x00); // reserved
                params.extend_from_slice(&clock_offset.to_le_bytes());
                params.push(*allow_role_switch);
                params
            }

            Self::Disconnect { handle, reason } => {
                let mut params = Vec::with_capacity(3);
                params.extend_from_slice(&handle.to_le_bytes());
                params.push(*reason);
                params
            }

            Self::AcceptConnectionRequest { bd_addr, role } => {
                let mut params = Vec::with_capacity(7);
                params.extend_from_slice(bd_addr);
                params.push(*role);
                params
            }

            Self::RejectConnectionRequest { bd_addr, reason } => {
                let mut params = Vec::with_capacity(7);
                params.extend_from_slice(bd_addr);
                params.push(*reason);
                params
            }

            Self::LinkKeyRequestReply { bd_addr, link_key } => {
                let mut params = Vec::with_capacity(22);
                params.extend_from_slice(bd_addr);
                params.extend_from_slice(link_key);
                params
            }

            Self::LinkKeyRequestNegativeReply { bd_addr } => bd_addr.to_vec(),

            Self::PinCodeRequestReply { bd_addr, pin } => {
                let mut params = Vec::with_capacity(23);
                params.extend_from_slice(bd_addr);
                let pin_len = pin.len().min(16);
                params.push(pin_len as u8);
                params.extend_from_slice(&pin[..pin_len]);
                params.resize(23, 0);
                params
            }

            Self::AuthenticationRequested { handle } => handle.to_le_bytes().to_vec(),

            Self::RemoteNameRequest {
                bd_addr,
                page_scan_repetition_mode,
                clock_offset,
            } => {
                let mut params = Vec::with_capacity(10);
                params.extend_from_slice(bd_addr);
                params.push(*page_scan_repetition_mode);
                params.push(0x00); // reserved
                params.extend_from_slice(&clock_offset.to_le_bytes());
                params
            }

            Self::WriteLocalName { name } => {
                let mut params = Vec::with_capacity(248);
                let name_bytes = name.as_bytes();
                let name_len = name_bytes.len().min(248);
                params.extend_from_slice(&name_bytes[..name_len]);
                params.resize(248, 0);
                params
            }

            Self::WriteScanEnable { enable } => vec![*enable],

            Self::WriteClassOfDevice { class_of_device } => class_of_device.to_vec(),

            Self::WriteRam { address, data } => {
                let mut params = Vec::with_capacity(4 + data.len());
                params.extend_from_slice(&address.to_le_bytes());
                params.extend_from_slice(data);
                params
            }

            Self::LaunchRam { address } => address.to_le_bytes().to_vec(),
        }
    }

    /// Convert the command to a raw HCI packet including the H4 type prefix
    pub fn to_packet(&self) -> Vec<u8> {
        let params = self.parameters();
        debug_assert!(params.len() <= HCI_MAX_PARAM_LEN);

        let mut packet = vec![HCI_COMMAND_PKT];
        packet.extend_from_slice(&self.opcode().to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(&params);
        packet
    }
}

/// Build a 16-bit opcode from its group and command fields
pub fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | (ocf & 0x3FF)
}

/// HCI Event packet
#[derive(Debug, Clone)]
pub struct HciEvent {
    pub event_code: u8,
    pub parameter_total_length: u8,
    pub parameters: Vec<u8>,
}

impl HciEvent {
    /// Parse an HCI event from raw bytes (without the H4 prefix)
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }

        let event_code = data[0];
        let parameter_total_length = data[1];

        if data.len() < (parameter_total_length as usize + 2) {
            return None;
        }

        let parameters = data[2..(parameter_total_length as usize + 2)].to_vec();

        Some(HciEvent {
            event_code,
            parameter_total_length,
            parameters,
        })
    }

    /// For COMMAND_COMPLETE: the number of commands the controller will accept
    pub fn num_hci_command_packets(&self) -> Option<u8> {
        match self.event_code {
            EVT_CMD_COMPLETE => self.parameters.first().copied(),
            EVT_CMD_STATUS => self.parameters.get(1).copied(),
            _ => None,
        }
    }

    /// For COMMAND_COMPLETE / COMMAND_STATUS: the opcode of the completed command
    pub fn command_opcode(&self) -> Option<u16> {
        match self.event_code {
            EVT_CMD_COMPLETE => {
                if self.parameters.len() >= 3 {
                    Some(u16::from_le_bytes([self.parameters[1], self.parameters[2]]))
                } else {
                    None
                }
            }
            EVT_CMD_STATUS => {
                if self.parameters.len() >= 4 {
                    Some(u16::from_le_bytes([self.parameters[2], self.parameters[3]]))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// For COMMAND_COMPLETE: the status byte of the completed command
    pub fn command_status(&self) -> Option<u8> {
        match self.event_code {
            EVT_CMD_COMPLETE => self.parameters.get(3).copied(),
            EVT_CMD_STATUS => self.parameters.first().copied(),
            _ => None,
        }
    }

    /// For COMMAND_COMPLETE: return parameters following the status byte
    pub fn return_parameters(&self) -> &[u8] {
        if self.event_code == EVT_CMD_COMPLETE && self.parameters.len() > 4 {
            &self.parameters[4..]
        } else {
            &[]
        }
    }

    /// Check whether this is a COMMAND_COMPLETE for the given command
    pub fn is_command_complete(&self, ogf: u8, ocf: u16) -> bool {
        self.event_code == EVT_CMD_COMPLETE && self.command_opcode() == Some(opcode(ogf, ocf))
    }
}

/// ACL data packet
#[derive(Debug, Clone)]
pub struct AclPacket {
    pub handle: u16,
    pub flags: u16,
    pub data: Vec<u8>,
}

impl AclPacket {
    /// Build an outbound packet with the "first, flushable" boundary flag
    pub fn new(handle: u16, data: Vec<u8>) -> Self {
        Self {
            handle,
            flags: ACL_PB_FIRST_FLUSHABLE,
            data,
        }
    }

    /// Parse an ACL packet from raw bytes (without the H4 prefix)
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }

        let handle_and_flags = u16::from_le_bytes([data[0], data[1]]);
        let length = u16::from_le_bytes([data[2], data[3]]);

        if data.len() < 4 + length as usize {
            return None;
        }

        Some(Self {
            handle: handle_and_flags & 0x0FFF,
            flags: handle_and_flags & 0xF000,
            data: data[4..4 + length as usize].to_vec(),
        })
    }

    /// Convert to a raw HCI packet including the H4 type prefix
    pub fn to_packet(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5 + self.data.len());
        packet.push(HCI_ACL_PKT);
        packet.extend_from_slice(&((self.handle & 0x0FFF) | self.flags).to_le_bytes());
        packet.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        packet.extend_from_slice(&self.data);
        packet
    }
}

/// Reassembles one packet type from possibly fragmented transport deliveries.
///
/// The transport hands over chunks of a single already-delimited packet; this
/// tracks a running `{length, offset}` pair derived from the type-specific
/// header and emits each packet once complete.
#[derive(Debug)]
pub struct PacketAssembler {
    packet_type: u8,
    buf: Vec<u8>,
}

impl PacketAssembler {
    pub fn new(packet_type: u8) -> Self {
        Self {
            packet_type,
            buf: Vec::new(),
        }
    }

    /// Total packet length once enough header bytes have arrived
    fn required_len(&self) -> Option<usize> {
        match self.packet_type {
            HCI_EVENT_PKT => {
                if self.buf.len() >= 2 {
                    Some(2 + self.buf[1] as usize)
                } else {
                    None
                }
            }
            HCI_ACL_PKT => {
                if self.buf.len() >= 4 {
                    Some(4 + u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Feed bytes; returns every packet completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut completed = Vec::new();

        while let Some(required) = self.required_len() {
            if self.buf.len() < required {
                break;
            }
            let rest = self.buf.split_off(required);
            completed.push(std::mem::replace(&mut self.buf, rest));
        }

        completed
    }
}
