//! RFCOMM layer module
//!
//! Serial-port emulation multiplexed over one L2CAP connection: the frame
//! codec with its CRC-8 check sequence, the typed control-channel messages,
//! and the per-channel open/negotiate/run state machines.

pub mod channel;
pub mod constants;
pub mod fcs;
pub mod frame;
pub mod session;

#[cfg(test)]
mod tests;

pub use channel::{ChannelFlags, RfChannel};
pub use frame::{FrameType, MuxCommand, RfcommError, RfcommFrame};
pub use session::{RfcommEvent, RfcommLayer};
