//! L2CAP layer: channel bookkeeping and the connection-oriented setup protocol
//!
//! One [`Connection`] record per (device, PSM) channel. A connect attempt
//! against a device with no open HCI link parks in `WaitConnect`; the actual
//! connection request goes out when the HCI layer reports the link up.
//! Configure requests are always answered and one is always sent for every
//! newly opened channel. There are no timeouts: a peer that stops responding
//! leaves the record pending until the link drops.

use super::constants::*;
use super::packet::L2capPacket;
use super::signaling::SignalingMessage;
use super::types::{ChannelId, ConfigOptions, L2capChannelState, L2capError, L2capResult};
use crate::hci::device::BdAddr;
use crate::hci::layer::{HciLayer, LinkEvent};
use crate::hci::packet::AclPacket;
use log::{debug, trace, warn};
use std::collections::HashMap;

/// Events delivered to the client registered for a PSM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Channel fully open (connection + configuration complete)
    Open {
        cid: ChannelId,
        addr: BdAddr,
        psm: u16,
        initiator: bool,
    },
    /// An outgoing connection attempt failed
    ConnectFailed {
        cid: ChannelId,
        addr: BdAddr,
        psm: u16,
        result: u16,
    },
    /// Channel closed (local or remote disconnect, or HCI link loss)
    Closed {
        cid: ChannelId,
        addr: BdAddr,
        psm: u16,
    },
    /// Inbound data on an open channel
    Data {
        cid: ChannelId,
        addr: BdAddr,
        psm: u16,
        payload: Vec<u8>,
    },
}

/// One connection-oriented channel
#[derive(Debug, Clone)]
pub struct Connection {
    pub psm: u16,
    pub local_cid: ChannelId,
    pub remote_cid: ChannelId,
    pub addr: BdAddr,
    pub state: L2capChannelState,
    pub mtu: u16,
    initiator: bool,
    local_config_done: bool,
    remote_config_done: bool,
}

impl Connection {
    fn new(psm: u16, local_cid: ChannelId, addr: BdAddr, initiator: bool) -> Self {
        Self {
            psm,
            local_cid,
            remote_cid: 0,
            addr,
            state: L2capChannelState::Closed,
            mtu: L2CAP_DEFAULT_MTU,
            initiator,
            local_config_done: false,
            remote_config_done: false,
        }
    }
}

/// The L2CAP layer
pub struct L2capLayer {
    connections: HashMap<ChannelId, Connection>,
    registered_psms: Vec<u16>,
    next_cid: ChannelId,
    next_signal_id: u8,
}

impl Default for L2capLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl L2capLayer {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            registered_psms: Vec::new(),
            next_cid: L2CAP_DYNAMIC_CID_MIN,
            next_signal_id: 1,
        }
    }

    /// Register a PSM as served locally (incoming connections accepted)
    pub fn register_psm(&mut self, psm: u16) {
        if !self.registered_psms.contains(&psm) {
            self.registered_psms.push(psm);
        }
    }

    pub fn connection(&self, cid: ChannelId) -> Option<&Connection> {
        self.connections.get(&cid)
    }

    /// Allocate the next dynamic CID
    fn allocate_cid(&mut self) -> ChannelId {
        loop {
            let cid = self.next_cid;
            self.next_cid = if self.next_cid == L2CAP_DYNAMIC_CID_MAX {
                L2CAP_DYNAMIC_CID_MIN
            } else {
                self.next_cid + 1
            };
            if !self.connections.contains_key(&cid) {
                return cid;
            }
        }
    }

    /// Allocate the next signaling identifier (zero is reserved)
    fn allocate_signal_id(&mut self) -> u8 {
        let id = self.next_signal_id;
        self.next_signal_id = if self.next_signal_id == 0xFF {
            1
        } else {
            self.next_signal_id + 1
        };
        id
    }

    /// Open (or reuse) a channel to `addr` for `psm`.
    ///
    /// Idempotent against an existing live connection to the same
    /// device + PSM. If the HCI link is not up yet the record parks and the
    /// connection request is sent once the link connects.
    pub fn start_connection(
        &mut self,
        hci: &mut HciLayer,
        addr: BdAddr,
        psm: u16,
    ) -> L2capResult<ChannelId> {
        if let Some(existing) = self
            .connections
            .values()
            .find(|c| c.addr == addr && c.psm == psm && c.state != L2capChannelState::Closed)
        {
            return Ok(existing.local_cid);
        }

        let local_cid = self.allocate_cid();
        let mut connection = Connection::new(psm, local_cid, addr, true);

        match hci.handle_for(&addr) {
            Some(handle) => {
                connection.state = L2capChannelState::WaitConnectRsp;
                self.connections.insert(local_cid, connection);
                self.send_signaling_on(
                    hci,
                    handle,
                    None,
                    |id| SignalingMessage::ConnectionRequest {
                        identifier: id,
                        psm,
                        source_cid: local_cid,
                    },
                );
            }
            None => {
                // Park until the HCI link comes up
                connection.state = L2capChannelState::WaitConnect;
                self.connections.insert(local_cid, connection);
                hci.start_connection(addr)?;
            }
        }

        Ok(local_cid)
    }

    /// Close a channel
    pub fn close_connection(&mut self, hci: &mut HciLayer, cid: ChannelId) -> L2capResult<()> {
        let connection = self
            .connections
            .get(&cid)
            .ok_or(L2capError::ChannelNotFound)?;

        match connection.state {
            L2capChannelState::Open | L2capChannelState::WaitConfig => {
                let (addr, remote_cid) = (connection.addr, connection.remote_cid);
                if let Some(handle) = hci.handle_for(&addr) {
                    self.send_signaling_on(hci, handle, None, |id| {
                        SignalingMessage::DisconnectionRequest {
                            identifier: id,
                            destination_cid: remote_cid,
                            source_cid: cid,
                        }
                    });
                    if let Some(connection) = self.connections.get_mut(&cid) {
                        connection.state = L2capChannelState::WaitDisconnect;
                    }
                } else {
                    self.connections.remove(&cid);
                }
            }
            _ => {
                // Never reached the peer; just drop the record
                self.connections.remove(&cid);
            }
        }
        Ok(())
    }

    /// Send data on an open channel; fills in the L2CAP length field
    pub fn send_data(
        &mut self,
        hci: &mut HciLayer,
        cid: ChannelId,
        payload: &[u8],
    ) -> L2capResult<()> {
        let connection = self
            .connections
            .get(&cid)
            .ok_or(L2capError::ChannelNotFound)?;
        if connection.state != L2capChannelState::Open {
            return Err(L2capError::NotConnected);
        }
        if payload.len() > connection.mtu as usize {
            return Err(L2capError::MtuExceeded);
        }
        let handle = hci
            .handle_for(&connection.addr)
            .ok_or(L2capError::NotConnected)?;
        let packet = L2capPacket::new(connection.remote_cid, payload.to_vec());
        hci.send_acl(handle, packet.to_bytes());
        Ok(())
    }

    /// React to HCI link lifecycle changes
    pub fn on_link_event(&mut self, hci: &mut HciLayer, event: &LinkEvent) -> Vec<ChannelEvent> {
        match event {
            LinkEvent::Connected { addr, handle } => {
                // Un-park connections waiting for this link
                let parked: Vec<(ChannelId, u16)> = self
                    .connections
                    .values()
                    .filter(|c| c.addr == *addr && c.state == L2capChannelState::WaitConnect)
                    .map(|c| (c.local_cid, c.psm))
                    .collect();
                for (cid, psm) in parked {
                    if let Some(connection) = self.connections.get_mut(&cid) {
                        connection.state = L2capChannelState::WaitConnectRsp;
                    }
                    self.send_signaling_on(hci, *handle, None, |id| {
                        SignalingMessage::ConnectionRequest {
                            identifier: id,
                            psm,
                            source_cid: cid,
                        }
                    });
                }
                Vec::new()
            }

            LinkEvent::ConnectionFailed { addr, status } => {
                let dead: Vec<ChannelId> = self
                    .connections
                    .values()
                    .filter(|c| c.addr == *addr)
                    .map(|c| c.local_cid)
                    .collect();
                let mut events = Vec::new();
                for cid in dead {
                    if let Some(connection) = self.connections.remove(&cid) {
                        events.push(ChannelEvent::ConnectFailed {
                            cid,
                            addr: connection.addr,
                            psm: connection.psm,
                            result: u16::from(*status),
                        });
                    }
                }
                events
            }

            LinkEvent::Disconnected { addr, .. } => {
                let dead: Vec<ChannelId> = self
                    .connections
                    .values()
                    .filter(|c| c.addr == *addr)
                    .map(|c| c.local_cid)
                    .collect();
                let mut events = Vec::new();
                for cid in dead {
                    if let Some(connection) = self.connections.remove(&cid) {
                        events.push(ChannelEvent::Closed {
                            cid,
                            addr: connection.addr,
                            psm: connection.psm,
                        });
                    }
                }
                events
            }

            _ => Vec::new(),
        }
    }

    /// Process one inbound ACL packet
    pub fn process_data(&mut self, hci: &mut HciLayer, packet: &[u8]) -> Vec<ChannelEvent> {
        let Some(acl) = AclPacket::parse(packet) else {
            warn!("dropping malformed ACL packet ({} bytes)", packet.len());
            return Vec::new();
        };
        let Some(addr) = hci.devices().by_handle(acl.handle).map(|d| d.addr) else {
            debug_assert!(false, "ACL data for unknown handle 0x{:04X}", acl.handle);
            warn!("ACL data for unknown handle 0x{:04X}", acl.handle);
            return Vec::new();
        };
        let Some(l2cap) = L2capPacket::parse(&acl.data) else {
            warn!("dropping malformed L2CAP packet from {addr}");
            return Vec::new();
        };

        if l2cap.header.channel_id == L2CAP_SIGNALING_CID {
            self.handle_signaling(hci, acl.handle, addr, &l2cap.payload)
        } else {
            self.route_data(l2cap.header.channel_id, addr, l2cap.payload)
        }
    }

    fn route_data(&mut self, cid: u16, addr: BdAddr, payload: Vec<u8>) -> Vec<ChannelEvent> {
        match self.connections.get(&cid) {
            Some(connection) if connection.state == L2capChannelState::Open => {
                vec![ChannelEvent::Data {
                    cid,
                    addr,
                    psm: connection.psm,
                    payload,
                }]
            }
            Some(connection) => {
                debug!(
                    "dropping data on channel {cid} in state {}",
                    connection.state
                );
                Vec::new()
            }
            None => {
                warn!("dropping data for unknown channel {cid}");
                Vec::new()
            }
        }
    }

    /// Dispatch every signaling command in the packet payload
    fn handle_signaling(
        &mut self,
        hci: &mut HciLayer,
        handle: u16,
        addr: BdAddr,
        payload: &[u8],
    ) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        let mut offset = 0;

        while offset < payload.len() {
            let data = &payload[offset..];
            let Some(consumed) = SignalingMessage::serialized_len(data) else {
                warn!("truncated signaling command from {addr}");
                break;
            };
            match SignalingMessage::parse(data) {
                Ok(message) => {
                    events.extend(self.handle_signaling_message(hci, handle, addr, message));
                }
                Err(e) => {
                    warn!("bad signaling command from {addr}: {e}");
                }
            }
            offset += consumed;
        }

        events
    }

    fn handle_signaling_message(
        &mut self,
        hci: &mut HciLayer,
        handle: u16,
        addr: BdAddr,
        message: SignalingMessage,
    ) -> Vec<ChannelEvent> {
        match message {
            SignalingMessage::ConnectionRequest {
                identifier,
                psm,
                source_cid,
            } => self.on_connection_request(hci, handle, addr, identifier, psm, source_cid),

            SignalingMessage::ConnectionResponse {
                destination_cid,
                source_cid,
                result,
                ..
            } => self.on_connection_response(hci, handle, destination_cid, source_cid, result),

            SignalingMessage::ConfigureRequest {
                identifier,
                destination_cid,
                options,
                ..
            } => self.on_configure_request(hci, handle, identifier, destination_cid, options),

            SignalingMessage::ConfigureResponse {
                source_cid, result, ..
            } => self.on_configure_response(source_cid, result),

            SignalingMessage::DisconnectionRequest {
                identifier,
                destination_cid,
                source_cid,
            } => self.on_disconnection_request(hci, handle, identifier, destination_cid, source_cid),

            SignalingMessage::DisconnectionResponse { source_cid, .. } => {
                let mut events = Vec::new();
                if let Some(connection) = self.connections.remove(&source_cid) {
                    events.push(ChannelEvent::Closed {
                        cid: source_cid,
                        addr: connection.addr,
                        psm: connection.psm,
                    });
                }
                events
            }

            SignalingMessage::EchoRequest { identifier, data } => {
                self.send_signaling_on(hci, handle, Some(identifier), |id| {
                    SignalingMessage::EchoResponse {
                        identifier: id,
                        data: data.clone(),
                    }
                });
                Vec::new()
            }

            SignalingMessage::InformationRequest {
                identifier,
                info_type,
            } => {
                let (result, data) = match info_type {
                    L2CAP_INFO_EXTENDED_FEATURES => {
                        (L2CAP_INFO_SUCCESS, 0u32.to_le_bytes().to_vec())
                    }
                    L2CAP_INFO_FIXED_CHANNELS => {
                        // Only the signaling channel is fixed here
                        (L2CAP_INFO_SUCCESS, 2u64.to_le_bytes().to_vec())
                    }
                    _ => (L2CAP_INFO_NOT_SUPPORTED, Vec::new()),
                };
                self.send_signaling_on(hci, handle, Some(identifier), |id| {
                    SignalingMessage::InformationResponse {
                        identifier: id,
                        info_type,
                        result,
                        data: data.clone(),
                    }
                });
                Vec::new()
            }

            SignalingMessage::CommandReject { reason, .. } => {
                warn!("signaling command rejected by {addr}: reason 0x{reason:04X}");
                Vec::new()
            }

            SignalingMessage::EchoResponse { .. }
            | SignalingMessage::InformationResponse { .. } => {
                trace!("signaling response from {addr} noted");
                Vec::new()
            }
        }
    }

    fn on_connection_request(
        &mut self,
        hci: &mut HciLayer,
        handle: u16,
        addr: BdAddr,
        identifier: u8,
        psm: u16,
        source_cid: u16,
    ) -> Vec<ChannelEvent> {
        if !self.registered_psms.contains(&psm) {
            debug!("refusing connection request for unregistered PSM 0x{psm:04X}");
            self.send_signaling_on(hci, handle, Some(identifier), |id| {
                SignalingMessage::ConnectionResponse {
                    identifier: id,
                    destination_cid: 0,
                    source_cid,
                    result: L2CAP_CONN_REFUSED_PSM,
                    status: 0,
                }
            });
            return Vec::new();
        }

        let local_cid = self.allocate_cid();
        let mut connection = Connection::new(psm, local_cid, addr, false);
        connection.remote_cid = source_cid;
        connection.state = L2capChannelState::WaitConfig;
        self.connections.insert(local_cid, connection);

        self.send_signaling_on(hci, handle, Some(identifier), |id| {
            SignalingMessage::ConnectionResponse {
                identifier: id,
                destination_cid: local_cid,
                source_cid,
                result: L2CAP_CONN_SUCCESS,
                status: 0,
            }
        });
        // A configure request always goes out for a newly opened channel
        self.send_configure_request(hci, handle, local_cid);
        Vec::new()
    }

    fn on_connection_response(
        &mut self,
        hci: &mut HciLayer,
        handle: u16,
        destination_cid: u16,
        source_cid: u16,
        result: u16,
    ) -> Vec<ChannelEvent> {
        let Some(connection) = self.connections.get_mut(&source_cid) else {
            warn!("connection response for unknown channel {source_cid}");
            return Vec::new();
        };
        match result {
            L2CAP_CONN_SUCCESS => {
                connection.remote_cid = destination_cid;
                connection.state = L2capChannelState::WaitConfig;
                self.send_configure_request(hci, handle, source_cid);
                Vec::new()
            }
            L2CAP_CONN_PENDING => Vec::new(),
            refused => {
                let connection = self.connections.remove(&source_cid);
                if let Some(connection) = connection {
                    debug!(
                        "connection to PSM 0x{:04X} refused: 0x{refused:04X}",
                        connection.psm
                    );
                    return vec![ChannelEvent::ConnectFailed {
                        cid: source_cid,
                        addr: connection.addr,
                        psm: connection.psm,
                        result: refused,
                    }];
                }
                Vec::new()
            }
        }
    }

    fn on_configure_request(
        &mut self,
        hci: &mut HciLayer,
        handle: u16,
        identifier: u8,
        destination_cid: u16,
        options: ConfigOptions,
    ) -> Vec<ChannelEvent> {
        let Some(connection) = self.connections.get_mut(&destination_cid) else {
            warn!("configure request for unknown channel {destination_cid}");
            return Vec::new();
        };
        if let Some(mtu) = options.mtu {
            connection.mtu = connection.mtu.min(mtu);
        }
        connection.remote_config_done = true;
        let remote_cid = connection.remote_cid;

        // Configure requests are always answered
        self.send_signaling_on(hci, handle, Some(identifier), |id| {
            SignalingMessage::ConfigureResponse {
                identifier: id,
                source_cid: remote_cid,
                flags: 0,
                result: L2CAP_CONF_SUCCESS,
                options,
            }
        });
        self.check_config_complete(destination_cid)
    }

    fn on_configure_response(&mut self, source_cid: u16, result: u16) -> Vec<ChannelEvent> {
        let Some(connection) = self.connections.get_mut(&source_cid) else {
            warn!("configure response for unknown channel {source_cid}");
            return Vec::new();
        };
        if result != L2CAP_CONF_SUCCESS {
            warn!(
                "configure rejected on channel {source_cid}: 0x{result:04X}"
            );
            return Vec::new();
        }
        connection.local_config_done = true;
        self.check_config_complete(source_cid)
    }

    fn check_config_complete(&mut self, cid: ChannelId) -> Vec<ChannelEvent> {
        let Some(connection) = self.connections.get_mut(&cid) else {
            return Vec::new();
        };
        if connection.state == L2capChannelState::WaitConfig
            && connection.local_config_done
            && connection.remote_config_done
        {
            connection.state = L2capChannelState::Open;
            debug!(
                "channel {cid} to {} open (PSM 0x{:04X})",
                connection.addr, connection.psm
            );
            return vec![ChannelEvent::Open {
                cid,
                addr: connection.addr,
                psm: connection.psm,
                initiator: connection.initiator,
            }];
        }
        Vec::new()
    }

    fn on_disconnection_request(
        &mut self,
        hci: &mut HciLayer,
        handle: u16,
        identifier: u8,
        destination_cid: u16,
        source_cid: u16,
    ) -> Vec<ChannelEvent> {
        self.send_signaling_on(hci, handle, Some(identifier), |id| {
            SignalingMessage::DisconnectionResponse {
                identifier: id,
                destination_cid,
                source_cid,
            }
        });
        let mut events = Vec::new();
        if let Some(connection) = self.connections.remove(&destination_cid) {
            events.push(ChannelEvent::Closed {
                cid: destination_cid,
                addr: connection.addr,
                psm: connection.psm,
            });
        } else {
            debug!("disconnection request for unknown channel {destination_cid}");
        }
        events
    }

    fn send_configure_request(&mut self, hci: &mut HciLayer, handle: u16, cid: ChannelId) {
        let Some(connection) = self.connections.get(&cid) else {
            return;
        };
        let remote_cid = connection.remote_cid;
        let mtu = connection.mtu;
        self.send_signaling_on(hci, handle, None, |id| SignalingMessage::ConfigureRequest {
            identifier: id,
            destination_cid: remote_cid,
            flags: 0,
            options: ConfigOptions {
                mtu: Some(mtu),
                flush_timeout: None,
            },
        });
    }

    /// Frame and enqueue a signaling command on the fixed channel.
    ///
    /// `identifier` echoes a peer's id for responses; `None` allocates a
    /// fresh one for requests.
    fn send_signaling_on<F>(
        &mut self,
        hci: &mut HciLayer,
        handle: u16,
        identifier: Option<u8>,
        build: F,
    ) where
        F: FnOnce(u8) -> SignalingMessage,
    {
        let id = identifier.unwrap_or_else(|| self.allocate_signal_id());
        let message = build(id);
        let packet = L2capPacket::new(L2CAP_SIGNALING_CID, message.serialize());
        hci.send_acl(handle, packet.to_bytes());
    }
}
