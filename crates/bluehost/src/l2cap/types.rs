//! Type definitions for L2CAP operations

use std::fmt;
use thiserror::Error;

/// Error types specific to L2CAP operations
#[derive(Debug, Error)]
pub enum L2capError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Remote device rejected connection: {0}")]
    ConnectionRejected(u16),

    #[error("Channel not found")]
    ChannelNotFound,

    #[error("Invalid state for operation")]
    InvalidState,

    #[error("MTU exceeded")]
    MtuExceeded,

    #[error("Resource limit reached")]
    ResourceLimitReached,

    #[error("PSM not registered")]
    PsmNotRegistered,

    #[error("Connection not established")]
    NotConnected,

    #[error("HCI error: {0}")]
    HciError(#[from] crate::error::HciError),
}

/// Result type for L2CAP operations
pub type L2capResult<T> = std::result::Result<T, L2capError>;

/// Local channel identifier handed to clients
pub type ChannelId = u16;

/// State of a connection-oriented channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2capChannelState {
    /// No channel
    Closed,
    /// Waiting for the underlying HCI link before the request can go out
    WaitConnect,
    /// Connection request sent, waiting for the response
    WaitConnectRsp,
    /// Connected; configuration handshake in progress
    WaitConfig,
    /// Open and ready for data transfer
    Open,
    /// Disconnection request sent
    WaitDisconnect,
}

impl fmt::Display for L2capChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::WaitConnect => write!(f, "Waiting for HCI link"),
            Self::WaitConnectRsp => write!(f, "Waiting for connection response"),
            Self::WaitConfig => write!(f, "Waiting for configuration"),
            Self::Open => write!(f, "Open"),
            Self::WaitDisconnect => write!(f, "Waiting for disconnection"),
        }
    }
}

/// L2CAP configuration options carried in configure requests/responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigOptions {
    /// Maximum Transmission Unit
    pub mtu: Option<u16>,
    /// Flush Timeout
    pub flush_timeout: Option<u16>,
}
