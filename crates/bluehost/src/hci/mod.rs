//! HCI layer module
//!
//! This module provides the Host Controller Interface: packet framing and
//! parsing, the controller bring-up sequencer, the remote device registry,
//! and the event-driven connection lifecycle.

pub mod bringup;
pub mod constants;
pub mod device;
pub mod layer;
pub mod packet;


pub use crate::error::HciError;
pub use device::{BdAddr, ConnectionState, DeviceRegistry, LinkKey, LinkKeyType, RemoteDevice};
pub use layer::{HciLayer, HciRx, LinkEvent};
pub use packet::{AclPacket, HciCommand, HciEvent};
