//! bluehost - a Bluetooth classic (BR/EDR) host stack in Rust
//!
//! This library implements the host side of a classic Bluetooth stack —
//! HCI, L2CAP, SDP, and RFCOMM — directly above a raw byte transport, with
//! no operating-system Bluetooth service underneath. It covers controller
//! bring-up (including vendor firmware upload for UART-attached parts),
//! inquiry and pairing, service discovery with continuation reassembly, and
//! serial-port emulation over RFCOMM.
//!
//! All protocol state machines run on a single cooperative poll loop
//! ([`stack::BtStack::poll`]); the transport's receive callback only
//! reassembles packets and enqueues them.

pub mod config;
pub mod error;
pub mod hci;
pub mod l2cap;
pub mod queue;
pub mod rfcomm;
pub mod sdp;
pub mod stack;
pub mod store;
pub mod transport;

// Re-export common types for convenience
pub use config::{FcsPolicy, StackConfig, VendorFirmware};
pub use error::{Error, HciError};
pub use hci::{BdAddr, ConnectionState, HciLayer, HciRx, LinkKey, LinkKeyType, RemoteDevice};
pub use l2cap::{L2capError, L2capLayer};
pub use queue::PacketQueue;
pub use rfcomm::{RfcommError, RfcommLayer};
pub use sdp::{DataElement, SdpError, SdpLayer, Uuid};
pub use stack::{BtStack, L2capClient, StackEvent};
pub use store::{DeviceStore, StoredDevice};
pub use transport::{H4Deframer, Transport, TransportError, UartTransport};
