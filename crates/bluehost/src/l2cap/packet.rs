//! L2CAP packet handling
//!
//! This module provides structures and functions for handling L2CAP packets.

use super::constants::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// L2CAP packet header
#[derive(Debug, Clone, Copy)]
pub struct L2capHeader {
    /// Length of the L2CAP payload in bytes
    pub length: u16,
    /// Channel Identifier
    pub channel_id: u16,
}

impl L2capHeader {
    /// Create a new L2CAP header
    pub fn new(length: u16, channel_id: u16) -> Self {
        Self { length, channel_id }
    }

    /// Parse an L2CAP header from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < L2CAP_BASIC_HEADER_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let length = cursor.read_u16::<LittleEndian>().ok()?;
        let channel_id = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self { length, channel_id })
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; L2CAP_BASIC_HEADER_SIZE] {
        let mut result = [0u8; L2CAP_BASIC_HEADER_SIZE];
        let mut cursor = Cursor::new(&mut result[..]);

        cursor.write_u16::<LittleEndian>(self.length).unwrap();
        cursor.write_u16::<LittleEndian>(self.channel_id).unwrap();

        result
    }
}

/// Represents a full L2CAP packet with header and payload
#[derive(Debug, Clone)]
pub struct L2capPacket {
    /// L2CAP header
    pub header: L2capHeader,
    /// Payload data
    pub payload: Vec<u8>,
}

impl L2capPacket {
    /// Create a new L2CAP packet; the length field is filled in
    pub fn new(channel_id: u16, payload: Vec<u8>) -> Self {
        let length = payload.len() as u16;

        Self {
            header: L2capHeader::new(length, channel_id),
            payload,
        }
    }

    /// Parse an L2CAP packet from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = L2capHeader::parse(data)?;

        if data.len() < L2CAP_BASIC_HEADER_SIZE + header.length as usize {
            return None;
        }

        let payload_end = L2CAP_BASIC_HEADER_SIZE + header.length as usize;
        let payload = data[L2CAP_BASIC_HEADER_SIZE..payload_end].to_vec();

        Some(Self { header, payload })
    }

    /// Serialize the L2CAP packet to a byte vector
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(L2CAP_BASIC_HEADER_SIZE + self.payload.len());
        result.extend_from_slice(&self.header.to_bytes());
        result.extend_from_slice(&self.payload);
        result
    }
}

/// L2CAP command header used in signaling packets
#[derive(Debug, Clone, Copy)]
pub struct L2capCommandHeader {
    /// Command code
    pub code: u8,
    /// Command identifier
    pub identifier: u8,
    /// Length of command parameters
    pub length: u16,
}

impl L2capCommandHeader {
    /// Create a new command header
    pub fn new(code: u8, identifier: u8, length: u16) -> Self {
        Self {
            code,
            identifier,
            length,
        }
    }

    /// Parse a command header from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < L2CAP_COMMAND_HEADER_SIZE {
            return None;
        }

        let code = data[0];
        let identifier = data[1];

        let mut cursor = Cursor::new(&data[2..4]);
        let length = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self {
            code,
            identifier,
            length,
        })
    }

    /// Serialize the command header to bytes
    pub fn to_bytes(&self) -> [u8; L2CAP_COMMAND_HEADER_SIZE] {
        let mut result = [0u8; L2CAP_COMMAND_HEADER_SIZE];

        result[0] = self.code;
        result[1] = self.identifier;

        let mut cursor = Cursor::new(&mut result[2..4]);
        cursor.write_u16::<LittleEndian>(self.length).unwrap();

        result
    }
}
