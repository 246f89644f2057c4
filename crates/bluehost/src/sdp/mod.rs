//! SDP layer module
//!
//! Service discovery: the continuation-reassembling search client, the
//! recursive Data Element codec, and a minimal fixed-record local server.

pub mod client;
pub mod protocol;
pub mod server;
pub mod types;


pub use client::{ResultFrame, SdpEvent, SdpLayer, SdpRequest};
pub use protocol::SdpPacket;
pub use server::{SdpServer, ServiceRecord};
pub use types::{DataElement, SdpError, SdpPdu, Uuid};
