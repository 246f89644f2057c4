//! Error types for the bluehost library
//!
//! Each protocol layer defines its own error enum next to its types; this
//! module provides the HCI error type and the top-level wrapper returned by
//! the stack facade.

use thiserror::Error;

/// Errors that can occur in the HCI layer
#[derive(Error, Debug)]
pub enum HciError {
    #[error("Controller is not ready (bring-up incomplete)")]
    NotReady,

    #[error("Unknown device {0}")]
    UnknownDevice(String),

    #[error("No open link to device {0}")]
    NotConnected(String),

    #[error("Invalid parameter length: {0}")]
    InvalidParamLength(usize),

    #[error("Invalid HCI packet format")]
    InvalidPacketFormat,

    #[error("Command failed: {0}")]
    CommandFailed(&'static str),
}

/// Top-level error type for stack operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("HCI error: {0}")]
    Hci(#[from] HciError),

    #[error("L2CAP error: {0}")]
    L2cap(#[from] crate::l2cap::L2capError),

    #[error("SDP error: {0}")]
    Sdp(#[from] crate::sdp::SdpError),

    #[error("RFCOMM error: {0}")]
    Rfcomm(#[from] crate::rfcomm::RfcommError),

    #[error("Device store error: {0}")]
    Store(#[from] crate::store::StoreError),
}
