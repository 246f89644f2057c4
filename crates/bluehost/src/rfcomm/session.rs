//! RFCOMM sessions and the multiplexer layer
//!
//! One session per L2CAP connection to the RFCOMM PSM, each owning up to
//! [`RFCOMM_MAX_CHANNELS`] logical channels. Channel 0 is always the
//! session's control channel; it carries the typed multiplexer messages
//! (PN, MSC, RPN) that drive every other channel's handshake.

use super::channel::{ChannelFlags, RfChannel};
use super::constants::*;
use super::frame::{
    msc_fields, msc_values, pn_channel, pn_frame_size, pn_values, rpn_channel, rpn_values,
    FrameType, MuxCommand, RfcommError, RfcommFrame,
};
use crate::config::FcsPolicy;
use crate::hci::device::BdAddr;
use crate::hci::layer::HciLayer;
use crate::l2cap::constants::PSM_RFCOMM;
use crate::l2cap::layer::{ChannelEvent, L2capLayer};
use crate::l2cap::types::{ChannelId, L2capChannelState};
use log::{debug, trace, warn};
use std::collections::HashMap;

/// Events the RFCOMM layer reports to the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RfcommEvent {
    /// A channel finished its handshake and is ready for data
    ChannelOpen { addr: BdAddr, channel: u8 },
    /// A channel closed (disconnect, refusal, or session teardown)
    ChannelClosed { addr: BdAddr, channel: u8 },
    /// User data received on an open channel (header and FCS stripped)
    Data {
        addr: BdAddr,
        channel: u8,
        payload: Vec<u8>,
    },
}

/// One multiplexer session riding an L2CAP connection
#[derive(Debug)]
pub struct RfcommSession {
    cid: ChannelId,
    addr: BdAddr,
    /// We initiated the L2CAP connection (and therefore own the control
    /// channel SABM)
    initiator: bool,
    control_sabm_sent: bool,
    control_open: bool,
    channels: Vec<RfChannel>,
    /// Channels requested before the control channel finished opening
    pending_open: Vec<u8>,
}

impl RfcommSession {
    fn new(cid: ChannelId, addr: BdAddr, initiator: bool) -> Self {
        Self {
            cid,
            addr,
            initiator,
            control_sabm_sent: false,
            control_open: false,
            channels: Vec::new(),
            pending_open: Vec::new(),
        }
    }

    fn channel(&self, number: u8) -> Option<&RfChannel> {
        self.channels.iter().find(|c| c.channel == number)
    }

    fn channel_mut(&mut self, number: u8) -> Option<&mut RfChannel> {
        self.channels.iter_mut().find(|c| c.channel == number)
    }

    /// Find or lazily create the record for a channel
    fn channel_entry(&mut self, number: u8, incoming: bool) -> Result<&mut RfChannel, RfcommError> {
        if self.channel(number).is_none() {
            // Slot 0 is the control channel and needs no record
            if self.channels.len() + 1 >= RFCOMM_MAX_CHANNELS {
                warn!("no free RFCOMM channel slot for channel {number}");
                return Err(RfcommError::NoFreeChannel);
            }
            self.channels.push(RfChannel::new(number, incoming));
        }
        Ok(self.channel_mut(number).unwrap())
    }

    /// The L2CAP connection is open; the initiator starts the control
    /// channel handshake
    fn on_l2cap_open(&mut self, l2cap: &mut L2capLayer, hci: &mut HciLayer) {
        if self.initiator && !self.control_sabm_sent {
            self.control_sabm_sent = true;
            send_frame(
                l2cap,
                hci,
                self.cid,
                &RfcommFrame::new(0, true, FrameType::Sabm, true, Vec::new()),
            );
        }
    }

    /// Ask for a data channel; queued until the control channel is open
    fn request_channel(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        number: u8,
    ) -> Result<(), RfcommError> {
        if self.control_open {
            self.begin_channel(l2cap, hci, number)
        } else {
            if !self.pending_open.contains(&number) {
                self.pending_open.push(number);
            }
            Ok(())
        }
    }

    /// The control channel is up; start every queued channel
    fn control_established(&mut self, l2cap: &mut L2capLayer, hci: &mut HciLayer) {
        self.control_open = true;
        let pending = std::mem::take(&mut self.pending_open);
        for number in pending {
            if let Err(e) = self.begin_channel(l2cap, hci, number) {
                warn!("could not start channel {number}: {e}");
            }
        }
    }

    /// Start an outgoing channel's handshake with parameter negotiation
    fn begin_channel(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        number: u8,
    ) -> Result<(), RfcommError> {
        let cid = self.cid;
        let channel = self.channel_entry(number, false)?;
        if channel.flags.contains(ChannelFlags::PN_CMD_SENT) {
            return Ok(());
        }
        channel.flags |= ChannelFlags::PN_CMD_SENT;
        let values = pn_values(number, channel.priority, channel.mtu);
        send_mux(l2cap, hci, cid, MCC_PN, true, values);
        Ok(())
    }

    fn send_user_data(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        number: u8,
        payload: &[u8],
    ) -> Result<(), RfcommError> {
        let cid = self.cid;
        let channel = self.channel(number).ok_or(RfcommError::ChannelNotOpen)?;
        if !channel.is_open() {
            return Err(RfcommError::ChannelNotOpen);
        }
        if payload.len() > channel.mtu as usize {
            return Err(RfcommError::FrameTooLarge);
        }
        send_frame(
            l2cap,
            hci,
            cid,
            &RfcommFrame::new(number, true, FrameType::Uih, false, payload.to_vec()),
        );
        Ok(())
    }

    fn close_channel(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        number: u8,
    ) -> Result<(), RfcommError> {
        let cid = self.cid;
        let channel = self.channel_mut(number).ok_or(RfcommError::ChannelNotOpen)?;
        channel.flags |= ChannelFlags::CLOSING;
        channel.flags &= !ChannelFlags::OPEN;
        send_frame(
            l2cap,
            hci,
            cid,
            &RfcommFrame::new(number, true, FrameType::Disc, true, Vec::new()),
        );
        Ok(())
    }

    /// Dispatch one received frame
    fn handle_frame(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        frame: RfcommFrame,
    ) -> Vec<RfcommEvent> {
        if frame.channel == 0 {
            self.handle_control_frame(l2cap, hci, frame)
        } else {
            self.handle_data_frame(l2cap, hci, frame)
        }
    }

    fn handle_control_frame(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        frame: RfcommFrame,
    ) -> Vec<RfcommEvent> {
        match frame.frame_type {
            FrameType::Sabm => {
                // Accept the peer's multiplexer immediately
                send_frame(
                    l2cap,
                    hci,
                    self.cid,
                    &RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()),
                );
                self.control_established(l2cap, hci);
                Vec::new()
            }

            FrameType::Ua => {
                self.control_established(l2cap, hci);
                Vec::new()
            }

            FrameType::Disc => {
                send_frame(
                    l2cap,
                    hci,
                    self.cid,
                    &RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()),
                );
                self.teardown()
            }

            FrameType::Dm => {
                debug!("control channel refused by {}", self.addr);
                self.teardown()
            }

            FrameType::Uih => self.handle_mux_command(l2cap, hci, &frame.payload),
        }
    }

    fn handle_mux_command(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        payload: &[u8],
    ) -> Vec<RfcommEvent> {
        let command = match MuxCommand::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("dropping malformed multiplexer message: {e}");
                return Vec::new();
            }
        };

        match (command.mcc_type, command.command) {
            (MCC_PN, true) => {
                let Some(number) = pn_channel(&command.values) else {
                    return Vec::new();
                };
                let frame_size = pn_frame_size(&command.values).unwrap_or(RFCOMM_DEFAULT_MTU);
                let cid = self.cid;
                match self.channel_entry(number, true) {
                    Ok(channel) => {
                        channel.mtu = channel.mtu.min(frame_size);
                        channel.flags |= ChannelFlags::PN_CMD_RECEIVED | ChannelFlags::PN_RSP_SENT;
                        let values = pn_values(number, channel.priority, channel.mtu);
                        send_mux(l2cap, hci, cid, MCC_PN, false, values);
                    }
                    Err(_) => {
                        // No slot: refuse the channel outright
                        send_frame(
                            l2cap,
                            hci,
                            cid,
                            &RfcommFrame::new(number, false, FrameType::Dm, true, Vec::new()),
                        );
                    }
                }
                Vec::new()
            }

            (MCC_PN, false) => {
                let Some(number) = pn_channel(&command.values) else {
                    return Vec::new();
                };
                let frame_size = pn_frame_size(&command.values).unwrap_or(RFCOMM_DEFAULT_MTU);
                let cid = self.cid;
                if let Some(channel) = self.channel_mut(number) {
                    channel.flags |= ChannelFlags::PN_RSP_RECEIVED;
                    channel.mtu = channel.mtu.min(frame_size);
                    if !channel.flags.contains(ChannelFlags::SABM_SENT) {
                        channel.flags |= ChannelFlags::SABM_SENT;
                        send_frame(
                            l2cap,
                            hci,
                            cid,
                            &RfcommFrame::new(number, true, FrameType::Sabm, true, Vec::new()),
                        );
                    }
                }
                Vec::new()
            }

            (MCC_MSC, true) => {
                let Some((number, signals)) = msc_fields(&command.values) else {
                    return Vec::new();
                };
                let cid = self.cid;
                let values = command.values.clone();
                match self.channel_entry(number, true) {
                    Ok(channel) => {
                        channel.remote_signals = signals;
                        channel.flags |=
                            ChannelFlags::MSC_CMD_RECEIVED | ChannelFlags::MSC_RSP_SENT;
                        send_mux(l2cap, hci, cid, MCC_MSC, false, values);
                        self.advance_channel(l2cap, hci, number)
                    }
                    Err(_) => Vec::new(),
                }
            }

            (MCC_MSC, false) => {
                let Some((number, _)) = msc_fields(&command.values) else {
                    return Vec::new();
                };
                if let Some(channel) = self.channel_mut(number) {
                    channel.flags |= ChannelFlags::MSC_RSP_RECEIVED;
                }
                self.advance_channel(l2cap, hci, number)
            }

            (MCC_RPN, true) => {
                let Some(number) = rpn_channel(&command.values) else {
                    return Vec::new();
                };
                let cid = self.cid;
                if let Some(channel) = self.channel_mut(number) {
                    channel.flags |= ChannelFlags::RPN_CMD_RECEIVED | ChannelFlags::RPN_RSP_SENT;
                }
                // A one-byte RPN is a parameter request: answer with our
                // defaults; a full command is echoed back accepted
                let values = if command.values.len() > 1 {
                    command.values.clone()
                } else {
                    rpn_values(number)
                };
                send_mux(l2cap, hci, cid, MCC_RPN, false, values);
                Vec::new()
            }

            (MCC_RPN, false) => {
                let Some(number) = rpn_channel(&command.values) else {
                    return Vec::new();
                };
                if let Some(channel) = self.channel_mut(number) {
                    channel.flags |= ChannelFlags::RPN_RSP_RECEIVED;
                }
                self.advance_channel(l2cap, hci, number)
            }

            (MCC_TEST | MCC_FCON | MCC_FCOFF | MCC_RLS | MCC_PSC | MCC_CLD | MCC_NSC, _) => {
                debug!(
                    "ignoring unimplemented multiplexer message type 0x{:02X}",
                    command.mcc_type
                );
                Vec::new()
            }

            (other, _) => {
                debug!("ignoring unknown multiplexer message type 0x{other:02X}");
                Vec::new()
            }
        }
    }

    fn handle_data_frame(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        frame: RfcommFrame,
    ) -> Vec<RfcommEvent> {
        let number = frame.channel;
        let cid = self.cid;
        let addr = self.addr;

        match frame.frame_type {
            FrameType::Sabm => {
                // Incoming channel: accept immediately, then start our
                // Modem-Status direction
                match self.channel_entry(number, true) {
                    Ok(channel) => {
                        channel.flags |= ChannelFlags::SABM_RECEIVED | ChannelFlags::UA_SENT;
                        channel.local_signals = MSC_DEFAULT_SIGNALS;
                        let already_sent = channel.flags.contains(ChannelFlags::MSC_CMD_SENT);
                        channel.flags |= ChannelFlags::MSC_CMD_SENT;
                        send_frame(
                            l2cap,
                            hci,
                            cid,
                            &RfcommFrame::new(number, false, FrameType::Ua, true, Vec::new()),
                        );
                        if !already_sent {
                            send_mux(
                                l2cap,
                                hci,
                                cid,
                                MCC_MSC,
                                true,
                                msc_values(number, MSC_DEFAULT_SIGNALS),
                            );
                        }
                        self.advance_channel(l2cap, hci, number)
                    }
                    Err(_) => {
                        send_frame(
                            l2cap,
                            hci,
                            cid,
                            &RfcommFrame::new(number, false, FrameType::Dm, true, Vec::new()),
                        );
                        Vec::new()
                    }
                }
            }

            FrameType::Ua => {
                if let Some(channel) = self.channel_mut(number) {
                    if channel.flags.contains(ChannelFlags::CLOSING) {
                        channel.flags |= ChannelFlags::CLOSED;
                        return vec![RfcommEvent::ChannelClosed { addr, channel: number }];
                    }
                    channel.flags |= ChannelFlags::UA_RECEIVED;
                    channel.local_signals = MSC_DEFAULT_SIGNALS;
                    if !channel.flags.contains(ChannelFlags::MSC_CMD_SENT) {
                        channel.flags |= ChannelFlags::MSC_CMD_SENT;
                        send_mux(
                            l2cap,
                            hci,
                            cid,
                            MCC_MSC,
                            true,
                            msc_values(number, MSC_DEFAULT_SIGNALS),
                        );
                    }
                    return self.advance_channel(l2cap, hci, number);
                }
                trace!("UA for unknown channel {number}");
                Vec::new()
            }

            FrameType::Dm => {
                if let Some(channel) = self.channel_mut(number) {
                    channel.flags |= ChannelFlags::CLOSED;
                    channel.flags &= !ChannelFlags::OPEN;
                    return vec![RfcommEvent::ChannelClosed { addr, channel: number }];
                }
                Vec::new()
            }

            FrameType::Disc => {
                send_frame(
                    l2cap,
                    hci,
                    cid,
                    &RfcommFrame::new(number, false, FrameType::Ua, true, Vec::new()),
                );
                if let Some(channel) = self.channel_mut(number) {
                    let was_open = channel.is_open();
                    channel.flags |= ChannelFlags::CLOSED;
                    channel.flags &= !ChannelFlags::OPEN;
                    if was_open {
                        return vec![RfcommEvent::ChannelClosed { addr, channel: number }];
                    }
                }
                Vec::new()
            }

            FrameType::Uih => {
                match self.channel(number) {
                    Some(channel) if channel.is_open() => vec![RfcommEvent::Data {
                        addr,
                        channel: number,
                        payload: frame.payload,
                    }],
                    Some(_) => {
                        debug!("dropping data on channel {number} before it is open");
                        Vec::new()
                    }
                    None => {
                        debug!("dropping data for unknown channel {number}");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Push the handshake forward after a state change
    fn advance_channel(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        number: u8,
    ) -> Vec<RfcommEvent> {
        let cid = self.cid;
        let addr = self.addr;
        let Some(channel) = self.channel_mut(number) else {
            return Vec::new();
        };

        // Outgoing channels follow Modem-Status with Remote-Port-Negotiation
        if !channel.is_incoming()
            && channel.msc_exchanged()
            && !channel.flags.contains(ChannelFlags::RPN_CMD_SENT)
        {
            channel.flags |= ChannelFlags::RPN_CMD_SENT;
            send_mux(l2cap, hci, cid, MCC_RPN, true, rpn_values(number));
            return Vec::new();
        }

        if channel.handshake_complete() && !channel.is_open() {
            channel.flags |= ChannelFlags::OPEN;
            debug!("RFCOMM channel {number} to {addr} open");
            return vec![RfcommEvent::ChannelOpen { addr, channel: number }];
        }
        Vec::new()
    }

    /// Tear down every channel, reporting the open ones as closed
    fn teardown(&mut self) -> Vec<RfcommEvent> {
        let addr = self.addr;
        let events = self
            .channels
            .iter()
            .filter(|c| c.is_open())
            .map(|c| RfcommEvent::ChannelClosed {
                addr,
                channel: c.channel,
            })
            .collect();
        self.channels.clear();
        self.control_open = false;
        events
    }
}

/// The RFCOMM layer: sessions keyed by their L2CAP channel id
pub struct RfcommLayer {
    sessions: HashMap<ChannelId, RfcommSession>,
    fcs_policy: FcsPolicy,
}

impl RfcommLayer {
    pub fn new(fcs_policy: FcsPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            fcs_policy,
        }
    }

    fn session_for_addr_mut(&mut self, addr: &BdAddr) -> Option<&mut RfcommSession> {
        self.sessions.values_mut().find(|s| s.addr == *addr)
    }

    /// Open an RFCOMM channel to `addr`, bringing up the L2CAP connection
    /// and the multiplexer session as needed
    pub fn open_channel(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        addr: BdAddr,
        channel: u8,
    ) -> Result<(), RfcommError> {
        if channel == 0 || channel as usize >= RFCOMM_MAX_CHANNELS {
            return Err(RfcommError::NoFreeChannel);
        }

        if let Some(session) = self.session_for_addr_mut(&addr) {
            return session.request_channel(l2cap, hci, channel);
        }

        let cid = l2cap.start_connection(hci, addr, PSM_RFCOMM)?;
        let mut session = RfcommSession::new(cid, addr, true);
        session.pending_open.push(channel);
        let already_open = l2cap
            .connection(cid)
            .map(|c| c.state == L2capChannelState::Open)
            .unwrap_or(false);
        if already_open {
            session.on_l2cap_open(l2cap, hci);
        }
        self.sessions.insert(cid, session);
        Ok(())
    }

    /// Send user data on an open channel
    pub fn send_data(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        addr: &BdAddr,
        channel: u8,
        payload: &[u8],
    ) -> Result<(), RfcommError> {
        let session = self
            .session_for_addr_mut(addr)
            .ok_or(RfcommError::NoSession)?;
        session.send_user_data(l2cap, hci, channel, payload)
    }

    /// Close one channel of a session
    pub fn close_channel(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        addr: &BdAddr,
        channel: u8,
    ) -> Result<(), RfcommError> {
        let session = self
            .session_for_addr_mut(addr)
            .ok_or(RfcommError::NoSession)?;
        session.close_channel(l2cap, hci, channel)
    }

    /// True once the channel finished its handshake
    pub fn is_channel_open(&self, addr: &BdAddr, channel: u8) -> bool {
        self.sessions
            .values()
            .find(|s| s.addr == *addr)
            .and_then(|s| s.channel(channel))
            .map(|c| c.is_open())
            .unwrap_or(false)
    }

    /// Handle an L2CAP channel event for the RFCOMM PSM
    pub fn on_channel_event(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        event: ChannelEvent,
    ) -> Vec<RfcommEvent> {
        match event {
            ChannelEvent::Open {
                cid,
                addr,
                initiator,
                ..
            } => {
                let session = self
                    .sessions
                    .entry(cid)
                    .or_insert_with(|| RfcommSession::new(cid, addr, initiator));
                session.on_l2cap_open(l2cap, hci);
                Vec::new()
            }

            ChannelEvent::Data { cid, payload, .. } => {
                let Some(session) = self.sessions.get_mut(&cid) else {
                    warn!("RFCOMM data for unknown session on channel {cid}");
                    return Vec::new();
                };
                let frame = match RfcommFrame::parse(&payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("dropping malformed RFCOMM frame: {e}");
                        return Vec::new();
                    }
                };
                if !frame.fcs_valid {
                    match self.fcs_policy {
                        FcsPolicy::LogOnly => {
                            warn!("RFCOMM FCS mismatch on channel {}, processing anyway", frame.channel);
                        }
                        FcsPolicy::Reject => {
                            warn!("RFCOMM FCS mismatch on channel {}, frame dropped", frame.channel);
                            return Vec::new();
                        }
                    }
                }
                session.handle_frame(l2cap, hci, frame)
            }

            ChannelEvent::Closed { cid, .. } | ChannelEvent::ConnectFailed { cid, .. } => {
                match self.sessions.remove(&cid) {
                    Some(mut session) => session.teardown(),
                    None => Vec::new(),
                }
            }
        }
    }
}

fn send_frame(l2cap: &mut L2capLayer, hci: &mut HciLayer, cid: ChannelId, frame: &RfcommFrame) {
    if let Err(e) = l2cap.send_data(hci, cid, &frame.serialize()) {
        warn!("could not send RFCOMM frame: {e}");
    }
}

fn send_mux(
    l2cap: &mut L2capLayer,
    hci: &mut HciLayer,
    cid: ChannelId,
    mcc_type: u8,
    command: bool,
    values: Vec<u8>,
) {
    let payload = MuxCommand::new(mcc_type, command, values).serialize();
    send_frame(
        l2cap,
        hci,
        cid,
        &RfcommFrame::new(0, true, FrameType::Uih, false, payload),
    );
}
