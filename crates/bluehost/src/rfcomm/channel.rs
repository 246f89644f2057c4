//! Per-channel RFCOMM state
//!
//! Each logical channel tracks its handshake progress as a flag mask.
//! An outgoing channel may only reach `OPEN` after SABM/UA, PN, the data
//! SABM/UA, both Modem-Status directions, and RPN have completed, in that
//! order; an incoming channel needs only SABM/UA plus both Modem-Status
//! directions.

use super::constants::RFCOMM_DEFAULT_MTU;
use bitflags::bitflags;

bitflags! {
    /// Handshake progress and lifecycle of one channel
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelFlags: u32 {
        const SABM_SENT        = 1 << 0;
        const UA_RECEIVED      = 1 << 1;
        const SABM_RECEIVED    = 1 << 2;
        const UA_SENT          = 1 << 3;

        const PN_CMD_SENT      = 1 << 4;
        const PN_RSP_RECEIVED  = 1 << 5;
        const PN_CMD_RECEIVED  = 1 << 6;
        const PN_RSP_SENT      = 1 << 7;

        const MSC_CMD_SENT     = 1 << 8;
        const MSC_RSP_RECEIVED = 1 << 9;
        const MSC_CMD_RECEIVED = 1 << 10;
        const MSC_RSP_SENT     = 1 << 11;

        const RPN_CMD_SENT     = 1 << 12;
        const RPN_RSP_RECEIVED = 1 << 13;
        const RPN_CMD_RECEIVED = 1 << 14;
        const RPN_RSP_SENT     = 1 << 15;

        const OPEN             = 1 << 16;
        const CLOSING          = 1 << 17;
        const CLOSED           = 1 << 18;
        const INCOMING         = 1 << 19;
    }
}

/// One logical channel of a session
#[derive(Debug, Clone)]
pub struct RfChannel {
    pub channel: u8,
    pub flags: ChannelFlags,
    /// Modem signal bits last reported by the peer
    pub remote_signals: u8,
    /// Modem signal bits we asserted
    pub local_signals: u8,
    pub priority: u8,
    /// Negotiated maximum frame size
    pub mtu: u16,
}

impl RfChannel {
    pub fn new(channel: u8, incoming: bool) -> Self {
        Self {
            channel,
            flags: if incoming {
                ChannelFlags::INCOMING
            } else {
                ChannelFlags::empty()
            },
            remote_signals: 0,
            local_signals: 0,
            priority: 0,
            mtu: RFCOMM_DEFAULT_MTU,
        }
    }

    pub fn is_open(&self) -> bool {
        self.flags.contains(ChannelFlags::OPEN)
    }

    pub fn is_incoming(&self) -> bool {
        self.flags.contains(ChannelFlags::INCOMING)
    }

    /// Both Modem-Status directions complete: our command answered and the
    /// peer's command answered by us
    pub fn msc_exchanged(&self) -> bool {
        self.flags.contains(
            ChannelFlags::MSC_CMD_SENT
                | ChannelFlags::MSC_RSP_RECEIVED
                | ChannelFlags::MSC_CMD_RECEIVED
                | ChannelFlags::MSC_RSP_SENT,
        )
    }

    /// Whether every prerequisite of `OPEN` has completed
    pub fn handshake_complete(&self) -> bool {
        let link_up = self
            .flags
            .contains(ChannelFlags::SABM_SENT | ChannelFlags::UA_RECEIVED)
            || self
                .flags
                .contains(ChannelFlags::SABM_RECEIVED | ChannelFlags::UA_SENT);
        if !link_up || !self.msc_exchanged() {
            return false;
        }
        if self.is_incoming() {
            // PN and RPN are optional for an accepting side
            true
        } else {
            self.flags.contains(ChannelFlags::RPN_RSP_RECEIVED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_channel_requires_full_sequence() {
        let mut channel = RfChannel::new(2, false);
        assert!(!channel.handshake_complete());

        channel.flags |= ChannelFlags::SABM_SENT | ChannelFlags::UA_RECEIVED;
        assert!(!channel.handshake_complete());

        channel.flags |= ChannelFlags::MSC_CMD_SENT | ChannelFlags::MSC_RSP_RECEIVED;
        assert!(!channel.handshake_complete());

        channel.flags |= ChannelFlags::MSC_CMD_RECEIVED | ChannelFlags::MSC_RSP_SENT;
        // Modem status alone is not enough for an outgoing channel
        assert!(!channel.handshake_complete());

        channel.flags |= ChannelFlags::RPN_RSP_RECEIVED;
        assert!(channel.handshake_complete());
    }

    #[test]
    fn test_incoming_channel_opens_after_msc() {
        let mut channel = RfChannel::new(2, true);
        channel.flags |= ChannelFlags::SABM_RECEIVED | ChannelFlags::UA_SENT;
        assert!(!channel.handshake_complete());

        channel.flags |= ChannelFlags::MSC_CMD_SENT
            | ChannelFlags::MSC_RSP_RECEIVED
            | ChannelFlags::MSC_CMD_RECEIVED
            | ChannelFlags::MSC_RSP_SENT;
        assert!(channel.handshake_complete());
    }
}
