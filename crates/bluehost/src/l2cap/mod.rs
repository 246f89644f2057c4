//! L2CAP layer module
//!
//! Connection-oriented channel multiplexing over the HCI ACL link: channel
//! setup/teardown signaling, per-device channel bookkeeping, and routing of
//! inbound frames to the upper-layer client registered for each PSM.

pub mod constants;
pub mod layer;
pub mod packet;
pub mod signaling;
pub mod types;

#[cfg(test)]
mod tests;

pub use constants::{PSM_RFCOMM, PSM_SDP};
pub use layer::{ChannelEvent, Connection, L2capLayer};
pub use packet::{L2capHeader, L2capPacket};
pub use signaling::SignalingMessage;
pub use types::{ChannelId, ConfigOptions, L2capChannelState, L2capError, L2capResult};
