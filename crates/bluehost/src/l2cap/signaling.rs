//! L2CAP signaling channel messages
//!
//! This module handles the commands exchanged on the fixed signaling channel
//! (CID 0x0001): connection management, configuration, and the echo and
//! information requests every implementation must answer.

use super::constants::*;
use super::packet::L2capCommandHeader;
use super::types::{ConfigOptions, L2capError};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Handle for identifying signaling transactions
pub type SignalId = u8;

/// L2CAP signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// Command Reject
    CommandReject {
        identifier: SignalId,
        reason: u16,
        data: Vec<u8>,
    },

    /// Connection Request
    ConnectionRequest {
        identifier: SignalId,
        psm: u16,
        source_cid: u16,
    },

    /// Connection Response
    ConnectionResponse {
        identifier: SignalId,
        destination_cid: u16,
        source_cid: u16,
        result: u16,
        status: u16,
    },

    /// Configuration Request
    ConfigureRequest {
        identifier: SignalId,
        destination_cid: u16,
        flags: u16,
        options: ConfigOptions,
    },

    /// Configuration Response
    ConfigureResponse {
        identifier: SignalId,
        source_cid: u16,
        flags: u16,
        result: u16,
        options: ConfigOptions,
    },

    /// Disconnection Request
    DisconnectionRequest {
        identifier: SignalId,
        destination_cid: u16,
        source_cid: u16,
    },

    /// Disconnection Response
    DisconnectionResponse {
        identifier: SignalId,
        destination_cid: u16,
        source_cid: u16,
    },

    /// Echo Request
    EchoRequest { identifier: SignalId, data: Vec<u8> },

    /// Echo Response
    EchoResponse { identifier: SignalId, data: Vec<u8> },

    /// Information Request
    InformationRequest {
        identifier: SignalId,
        info_type: u16,
    },

    /// Information Response
    InformationResponse {
        identifier: SignalId,
        info_type: u16,
        result: u16,
        data: Vec<u8>,
    },
}

impl SignalingMessage {
    /// Get the command code for this signaling message
    pub fn command_code(&self) -> u8 {
        match self {
            Self::CommandReject { .. } => L2CAP_COMMAND_REJECT,
            Self::ConnectionRequest { .. } => L2CAP_CONNECTION_REQUEST,
            Self::ConnectionResponse { .. } => L2CAP_CONNECTION_RESPONSE,
            Self::ConfigureRequest { .. } => L2CAP_CONFIGURE_REQUEST,
            Self::ConfigureResponse { .. } => L2CAP_CONFIGURE_RESPONSE,
            Self::DisconnectionRequest { .. } => L2CAP_DISCONNECTION_REQUEST,
            Self::DisconnectionResponse { .. } => L2CAP_DISCONNECTION_RESPONSE,
            Self::EchoRequest { .. } => L2CAP_ECHO_REQUEST,
            Self::EchoResponse { .. } => L2CAP_ECHO_RESPONSE,
            Self::InformationRequest { .. } => L2CAP_INFORMATION_REQUEST,
            Self::InformationResponse { .. } => L2CAP_INFORMATION_RESPONSE,
        }
    }

    /// Get the identifier for this signaling message
    pub fn identifier(&self) -> SignalId {
        match self {
            Self::CommandReject { identifier, .. } => *identifier,
            Self::ConnectionRequest { identifier, .. } => *identifier,
            Self::ConnectionResponse { identifier, .. } => *identifier,
            Self::ConfigureRequest { identifier, .. } => *identifier,
            Self::ConfigureResponse { identifier, .. } => *identifier,
            Self::DisconnectionRequest { identifier, .. } => *identifier,
            Self::DisconnectionResponse { identifier, .. } => *identifier,
            Self::EchoRequest { identifier, .. } => *identifier,
            Self::EchoResponse { identifier, .. } => *identifier,
            Self::InformationRequest { identifier, .. } => *identifier,
            Self::InformationResponse { identifier, .. } => *identifier,
        }
    }

    /// Parse configuration options from raw bytes
    fn parse_config_options(data: &[u8]) -> ConfigOptions {
        let mut options = ConfigOptions::default();
        let mut offset = 0;

        while offset + 2 <= data.len() {
            let option_type = data[offset] & 0x7F; // Mask out hint bit
            let option_length = data[offset + 1] as usize;

            if offset + 2 + option_length > data.len() {
                break;
            }

            let option_data = &data[offset + 2..offset + 2 + option_length];

            match option_type {
                L2CAP_CONF_MTU => {
                    if option_length == 2 {
                        options.mtu = Some(u16::from_le_bytes([option_data[0], option_data[1]]));
                    }
                }
                L2CAP_CONF_FLUSH_TIMEOUT => {
                    if option_length == 2 {
                        options.flush_timeout =
                            Some(u16::from_le_bytes([option_data[0], option_data[1]]));
                    }
                }
                // Unknown options are skipped; hint bit makes that legal
                _ => {}
            }

            offset += 2 + option_length;
        }

        options
    }

    /// Serialize configuration options to bytes
    fn serialize_config_options(options: &ConfigOptions) -> Vec<u8> {
        let mut result = Vec::new();

        if let Some(mtu) = options.mtu {
            result.push(L2CAP_CONF_MTU);
            result.push(2);
            result.extend_from_slice(&mtu.to_le_bytes());
        }

        if let Some(timeout) = options.flush_timeout {
            result.push(L2CAP_CONF_FLUSH_TIMEOUT);
            result.push(2);
            result.extend_from_slice(&timeout.to_le_bytes());
        }

        result
    }

    /// Parse one signaling command (header + parameters) from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, L2capError> {
        let cmd_header = L2capCommandHeader::parse(data)
            .ok_or_else(|| L2capError::InvalidParameter("Signaling data too short".into()))?;

        let params = &data[L2CAP_COMMAND_HEADER_SIZE..];
        if params.len() < cmd_header.length as usize {
            return Err(L2capError::InvalidParameter(
                "Command parameters too short".into(),
            ));
        }
        let params = &params[..cmd_header.length as usize];
        let identifier = cmd_header.identifier;

        match cmd_header.code {
            L2CAP_COMMAND_REJECT => {
                if params.len() < 2 {
                    return Err(L2capError::InvalidParameter(
                        "Command reject parameters too short".into(),
                    ));
                }
                let reason = u16::from_le_bytes([params[0], params[1]]);
                Ok(Self::CommandReject {
                    identifier,
                    reason,
                    data: params[2..].to_vec(),
                })
            }

            L2CAP_CONNECTION_REQUEST => {
                if params.len() < 4 {
                    return Err(L2capError::InvalidParameter(
                        "Connection request parameters too short".into(),
                    ));
                }
                let psm = u16::from_le_bytes([params[0], params[1]]);
                let source_cid = u16::from_le_bytes([params[2], params[3]]);
                Ok(Self::ConnectionRequest {
                    identifier,
                    psm,
                    source_cid,
                })
            }

            L2CAP_CONNECTION_RESPONSE => {
                if params.len() < 8 {
                    return Err(L2capError::InvalidParameter(
                        "Connection response parameters too short".into(),
                    ));
                }
                let mut cursor = Cursor::new(params);
                let destination_cid = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| L2capError::InvalidParameter("Failed to read DCID".into()))?;
                let source_cid = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| L2capError::InvalidParameter("Failed to read SCID".into()))?;
                let result = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| L2capError::InvalidParameter("Failed to read result".into()))?;
                let status = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| L2capError::InvalidParameter("Failed to read status".into()))?;
                Ok(Self::ConnectionResponse {
                    identifier,
                    destination_cid,
                    source_cid,
                    result,
                    status,
                })
            }

            L2CAP_CONFIGURE_REQUEST => {
                if params.len() < 4 {
                    return Err(L2capError::InvalidParameter(
                        "Configure request parameters too short".into(),
                    ));
                }
                let destination_cid = u16::from_le_bytes([params[0], params[1]]);
                let flags = u16::from_le_bytes([params[2], params[3]]);
                Ok(Self::ConfigureRequest {
                    identifier,
                    destination_cid,
                    flags,
                    options: Self::parse_config_options(&params[4..]),
                })
            }

            L2CAP_CONFIGURE_RESPONSE => {
                if params.len() < 6 {
                    return Err(L2capError::InvalidParameter(
                        "Configure response parameters too short".into(),
                    ));
                }
                let source_cid = u16::from_le_bytes([params[0], params[1]]);
                let flags = u16::from_le_bytes([params[2], params[3]]);
                let result = u16::from_le_bytes([params[4], params[5]]);
                Ok(Self::ConfigureResponse {
                    identifier,
                    source_cid,
                    flags,
                    result,
                    options: Self::parse_config_options(&params[6..]),
                })
            }

            L2CAP_DISCONNECTION_REQUEST | L2CAP_DISCONNECTION_RESPONSE => {
                if params.len() < 4 {
                    return Err(L2capError::InvalidParameter(
                        "Disconnection parameters too short".into(),
                    ));
                }
                let destination_cid = u16::from_le_bytes([params[0], params[1]]);
                let source_cid = u16::from_le_bytes([params[2], params[3]]);
                if cmd_header.code == L2CAP_DISCONNECTION_REQUEST {
                    Ok(Self::DisconnectionRequest {
                        identifier,
                        destination_cid,
                        source_cid,
                    })
                } else {
                    Ok(Self::DisconnectionResponse {
                        identifier,
                        destination_cid,
                        source_cid,
                    })
                }
            }

            L2CAP_ECHO_REQUEST => Ok(Self::EchoRequest {
                identifier,
                data: params.to_vec(),
            }),

            L2CAP_ECHO_RESPONSE => Ok(Self::EchoResponse {
                identifier,
                data: params.to_vec(),
            }),

            L2CAP_INFORMATION_REQUEST => {
                if params.len() < 2 {
                    return Err(L2capError::InvalidParameter(
                        "Information request parameters too short".into(),
                    ));
                }
                Ok(Self::InformationRequest {
                    identifier,
                    info_type: u16::from_le_bytes([params[0], params[1]]),
                })
            }

            L2CAP_INFORMATION_RESPONSE => {
                if params.len() < 4 {
                    return Err(L2capError::InvalidParameter(
                        "Information response parameters too short".into(),
                    ));
                }
                Ok(Self::InformationResponse {
                    identifier,
                    info_type: u16::from_le_bytes([params[0], params[1]]),
                    result: u16::from_le_bytes([params[2], params[3]]),
                    data: params[4..].to_vec(),
                })
            }

            code => Err(L2capError::ProtocolError(format!(
                "Unknown signaling command code 0x{code:02X}"
            ))),
        }
    }

    /// Total serialized length, header included
    pub fn serialized_len(data: &[u8]) -> Option<usize> {
        let header = L2capCommandHeader::parse(data)?;
        Some(L2CAP_COMMAND_HEADER_SIZE + header.length as usize)
    }

    /// Serialize this message (header + parameters)
    pub fn serialize(&self) -> Vec<u8> {
        let params = self.serialize_params();
        let header =
            L2capCommandHeader::new(self.command_code(), self.identifier(), params.len() as u16);

        let mut result = Vec::with_capacity(L2CAP_COMMAND_HEADER_SIZE + params.len());
        result.extend_from_slice(&header.to_bytes());
        result.extend_from_slice(&params);
        result
    }

    fn serialize_params(&self) -> Vec<u8> {
        match self {
            Self::CommandReject { reason, data, .. } => {
                let mut params = Vec::with_capacity(2 + data.len());
                params.extend_from_slice(&reason.to_le_bytes());
                params.extend_from_slice(data);
                params
            }

            Self::ConnectionRequest { psm, source_cid, .. } => {
                let mut params = Vec::with_capacity(4);
                params.extend_from_slice(&psm.to_le_bytes());
                params.extend_from_slice(&source_cid.to_le_bytes());
                params
            }

            Self::ConnectionResponse {
                destination_cid,
                source_cid,
                result,
                status,
                ..
            } => {
                let mut params = Vec::with_capacity(8);
                params.extend_from_slice(&destination_cid.to_le_bytes());
                params.extend_from_slice(&source_cid.to_le_bytes());
                params.extend_from_slice(&result.to_le_bytes());
                params.extend_from_slice(&status.to_le_bytes());
                params
            }

            Self::ConfigureRequest {
                destination_cid,
                flags,
                options,
                ..
            } => {
                let mut params = Vec::with_capacity(8);
                params.extend_from_slice(&destination_cid.to_le_bytes());
                params.extend_from_slice(&flags.to_le_bytes());
                params.extend_from_slice(&Self::serialize_config_options(options));
                params
            }

            Self::ConfigureResponse {
                source_cid,
                flags,
                result,
                options,
                ..
            } => {
                let mut params = Vec::with_capacity(10);
                params.extend_from_slice(&source_cid.to_le_bytes());
                params.extend_from_slice(&flags.to_le_bytes());
                params.extend_from_slice(&result.to_le_bytes());
                params.extend_from_slice(&Self::serialize_config_options(options));
                params
            }

            Self::DisconnectionRequest {
                destination_cid,
                source_cid,
                ..
            }
            | Self::DisconnectionResponse {
                destination_cid,
                source_cid,
                ..
            } => {
                let mut params = Vec::with_capacity(4);
                params.extend_from_slice(&destination_cid.to_le_bytes());
                params.extend_from_slice(&source_cid.to_le_bytes());
                params
            }

            Self::EchoRequest { data, .. } | Self::EchoResponse { data, .. } => data.clone(),

            Self::InformationRequest { info_type, .. } => info_type.to_le_bytes().to_vec(),

            Self::InformationResponse {
                info_type,
                result,
                data,
                ..
            } => {
                let mut params = Vec::with_capacity(4 + data.len());
                params.extend_from_slice(&info_type.to_le_bytes());
                params.extend_from_slice(&result.to_le_bytes());
                params.extend_from_slice(data);
                params
            }
        }
    }
}
