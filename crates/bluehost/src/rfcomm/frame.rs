//! RFCOMM frame codec
//!
//! Wire layout: `address | control | length (EA-encoded) | payload | fcs`.
//! The address byte carries the extension bit, the C/R bit, and the channel
//! number shifted into the DLCI field. The FCS covers address and control,
//! plus the length byte for non-UIH frames.

use super::constants::*;
use super::fcs;
use thiserror::Error;

/// Errors that can occur in the RFCOMM layer
#[derive(Debug, Error)]
pub enum RfcommError {
    #[error("Frame too short")]
    FrameTooShort,

    #[error("Frame length field does not match payload")]
    LengthMismatch,

    #[error("Bad frame checksum")]
    BadChecksum,

    #[error("Unknown frame type 0x{0:02X}")]
    UnknownFrameType(u8),

    #[error("No free channel slot")]
    NoFreeChannel,

    #[error("Channel not open")]
    ChannelNotOpen,

    #[error("No session for device")]
    NoSession,

    #[error("Payload exceeds negotiated frame size")]
    FrameTooLarge,

    #[error("L2CAP error: {0}")]
    L2cap(#[from] crate::l2cap::L2capError),
}

/// Frame types carried in the control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Set Asynchronous Balanced Mode: open a channel
    Sabm,
    /// Unnumbered Acknowledgement: accept
    Ua,
    /// Disconnected Mode: refuse
    Dm,
    /// Disconnect a channel
    Disc,
    /// Unnumbered Information with Header check: data
    Uih,
}

impl FrameType {
    pub fn from_control(control: u8) -> Option<Self> {
        match control & !CONTROL_PF {
            FRAME_SABM => Some(Self::Sabm),
            FRAME_UA => Some(Self::Ua),
            FRAME_DM => Some(Self::Dm),
            FRAME_DISC => Some(Self::Disc),
            FRAME_UIH => Some(Self::Uih),
            _ => None,
        }
    }

    pub fn control_value(self) -> u8 {
        match self {
            Self::Sabm => FRAME_SABM,
            Self::Ua => FRAME_UA,
            Self::Dm => FRAME_DM,
            Self::Disc => FRAME_DISC,
            Self::Uih => FRAME_UIH,
        }
    }
}

/// One decoded RFCOMM frame
#[derive(Debug, Clone)]
pub struct RfcommFrame {
    /// Channel number from the address byte's DLCI field
    pub channel: u8,
    /// C/R bit
    pub command: bool,
    pub frame_type: FrameType,
    /// Poll/final bit
    pub poll_final: bool,
    pub payload: Vec<u8>,
    /// Whether the received FCS verified; the session decides what a
    /// mismatch means
    pub fcs_valid: bool,
}

impl RfcommFrame {
    pub fn new(
        channel: u8,
        command: bool,
        frame_type: FrameType,
        poll_final: bool,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            channel,
            command,
            frame_type,
            poll_final,
            payload,
            fcs_valid: true,
        }
    }

    /// Parse one frame from an L2CAP payload
    pub fn parse(data: &[u8]) -> Result<Self, RfcommError> {
        if data.len() < 4 {
            return Err(RfcommError::FrameTooShort);
        }

        let address = data[0];
        let control = data[1];
        let channel = address >> 3;
        let command = address & 0x02 != 0;

        let frame_type =
            FrameType::from_control(control).ok_or(RfcommError::UnknownFrameType(control))?;
        let poll_final = control & CONTROL_PF != 0;

        // EA-encoded length: one byte when the extension bit is set, two
        // bytes (15-bit length) otherwise
        let (length, header_len) = if data[2] & EA_BIT != 0 {
            ((data[2] >> 1) as usize, 3)
        } else {
            if data.len() < 5 {
                return Err(RfcommError::FrameTooShort);
            }
            (
                ((data[2] >> 1) as usize) | ((data[3] as usize) << 7),
                4,
            )
        };

        if data.len() < header_len + length + 1 {
            return Err(RfcommError::LengthMismatch);
        }

        let payload = data[header_len..header_len + length].to_vec();
        let received_fcs = data[header_len + length];

        // UIH checks address + control only; other types include the length
        let covered = if frame_type == FrameType::Uih {
            &data[..2]
        } else {
            &data[..header_len]
        };
        let fcs_valid = fcs::check(covered, received_fcs);

        Ok(Self {
            channel,
            command,
            frame_type,
            poll_final,
            payload,
            fcs_valid,
        })
    }

    /// Serialize to an L2CAP payload
    pub fn serialize(&self) -> Vec<u8> {
        let address = EA_BIT | (u8::from(self.command) << 1) | (self.channel << 3);
        let control = self.frame_type.control_value() | if self.poll_final { CONTROL_PF } else { 0 };

        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.push(address);
        out.push(control);

        if self.payload.len() <= 127 {
            out.push(((self.payload.len() as u8) << 1) | EA_BIT);
        } else {
            out.push((self.payload.len() as u8) << 1);
            out.push((self.payload.len() >> 7) as u8);
        }

        let covered = if self.frame_type == FrameType::Uih {
            &out[..2]
        } else {
            &out[..]
        };
        let checksum = fcs::fcs(covered);

        out.extend_from_slice(&self.payload);
        out.push(checksum);
        out
    }
}

/// A decoded channel-0 multiplexer control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxCommand {
    /// Message type (MCC_* value)
    pub mcc_type: u8,
    /// C/R bit of the type field: command or response
    pub command: bool,
    pub values: Vec<u8>,
}

impl MuxCommand {
    pub fn new(mcc_type: u8, command: bool, values: Vec<u8>) -> Self {
        Self {
            mcc_type,
            command,
            values,
        }
    }

    /// Parse the typed sub-header inside a control-channel UIH payload
    pub fn parse(payload: &[u8]) -> Result<Self, RfcommError> {
        if payload.len() < 2 {
            return Err(RfcommError::FrameTooShort);
        }
        let mcc_type = payload[0] >> 2;
        let command = payload[0] & 0x02 != 0;
        let length = (payload[1] >> 1) as usize;
        if payload[1] & EA_BIT == 0 || payload.len() < 2 + length {
            return Err(RfcommError::FrameTooShort);
        }
        Ok(Self {
            mcc_type,
            command,
            values: payload[2..2 + length].to_vec(),
        })
    }

    /// Serialize to a control-channel UIH payload
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.values.len());
        out.push((self.mcc_type << 2) | (u8::from(self.command) << 1) | EA_BIT);
        out.push(((self.values.len() as u8) << 1) | EA_BIT);
        out.extend_from_slice(&self.values);
        out
    }
}

/// PN message values: DLCI, convergence layer, priority, timer, frame
/// size, retransmissions, window
pub fn pn_values(channel: u8, priority: u8, frame_size: u16) -> Vec<u8> {
    vec![
        channel << 1,
        0x00,
        priority,
        0x00,
        (frame_size & 0xFF) as u8,
        (frame_size >> 8) as u8,
        0x00,
        0x00,
    ]
}

/// Frame size carried in PN values
pub fn pn_frame_size(values: &[u8]) -> Option<u16> {
    if values.len() < 8 {
        return None;
    }
    Some(u16::from(values[4]) | (u16::from(values[5]) << 8))
}

/// Channel number carried in PN values
pub fn pn_channel(values: &[u8]) -> Option<u8> {
    values.first().map(|dlci| dlci >> 1)
}

/// MSC message values: EA-framed DLCI plus the signal byte
pub fn msc_values(channel: u8, signals: u8) -> Vec<u8> {
    vec![EA_BIT | 0x02 | (channel << 3), signals]
}

/// Channel and signals from MSC values
pub fn msc_fields(values: &[u8]) -> Option<(u8, u8)> {
    if values.len() < 2 {
        return None;
    }
    Some((values[0] >> 3, values[1]))
}

/// RPN command values: 8N1 at 115200, no flow control
pub fn rpn_values(channel: u8) -> Vec<u8> {
    vec![
        EA_BIT | 0x02 | (channel << 3),
        RPN_BAUD_115200,
        RPN_DATA_8N1,
        0x00, // no flow control
        RPN_XON_CHAR,
        RPN_XOFF_CHAR,
        0x00, // parameter mask low
        0x00, // parameter mask high
    ]
}

/// Channel from RPN values
pub fn rpn_channel(values: &[u8]) -> Option<u8> {
    values.first().map(|dlci| dlci >> 3)
}
