//! HCI layer: packet demultiplexing, device registry, connection lifecycle,
//! and credit-based flow control
//!
//! All protocol state lives on the poll-loop thread. The only concurrent
//! entry point is [`HciRx::receive`], which reassembles one packet and
//! enqueues it — it never touches layer state.

use crate::config::StackConfig;
use crate::error::HciError;
use crate::hci::bringup::Bringup;
use crate::hci::constants::*;
use crate::hci::device::{BdAddr, ConnectionState, DeviceRegistry, LinkKey, LinkKeyType};
use crate::hci::packet::{AclPacket, HciCommand, HciEvent, PacketAssembler};
use crate::queue::PacketQueue;
use crate::store::{DeviceStore, StoredDevice};
use crate::transport::{Transport, TransportError};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;

/// Upcalls produced by HCI event processing, consumed by the layers above
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bring-up finished; the stack accepts requests now
    Ready,
    /// An inquiry responder was seen for the first time
    DeviceDiscovered { addr: BdAddr },
    /// A remote name request resolved
    NameResolved { addr: BdAddr },
    /// Inquiry finished and every outstanding name request has resolved
    InquiryComplete,
    /// A remote device is asking to connect (it will be auto-accepted)
    IncomingConnection { addr: BdAddr },
    /// An ACL link is open
    Connected { addr: BdAddr, handle: u16 },
    /// A connection attempt failed
    ConnectionFailed { addr: BdAddr, status: u8 },
    /// An ACL link closed
    Disconnected { addr: BdAddr, handle: u16, reason: u8 },
    /// An authentication round finished
    AuthenticationComplete { handle: u16, status: u8 },
}

/// Producer-side receive handle handed to the transport callback.
///
/// Its only job is to finish reassembling one packet and push it onto the
/// matching inbound queue; the poll loop does everything else.
#[derive(Debug)]
pub struct HciRx {
    event_queue: Arc<PacketQueue>,
    data_queue: Arc<PacketQueue>,
    event_assembler: PacketAssembler,
    acl_assembler: PacketAssembler,
}

impl HciRx {
    /// Accept (a fragment of) a type-prefixed packet from the transport
    pub fn receive(&mut self, packet_type: u8, bytes: &[u8]) {
        match packet_type {
            HCI_EVENT_PKT => {
                for packet in self.event_assembler.push(bytes) {
                    self.event_queue.enqueue_buffer(packet);
                }
            }
            HCI_ACL_PKT => {
                for packet in self.acl_assembler.push(bytes) {
                    self.data_queue.enqueue_buffer(packet);
                }
            }
            other => {
                warn!("dropping packet of unsupported type 0x{other:02X}");
            }
        }
    }
}

/// The HCI layer
pub struct HciLayer {
    event_queue: Arc<PacketQueue>,
    data_queue: Arc<PacketQueue>,
    command_out: PacketQueue,
    data_out: PacketQueue,
    command_credits: u8,
    data_credits: u16,
    devices: DeviceRegistry,
    bringup: Bringup,
    config: StackConfig,
    store: Option<DeviceStore>,
    local_addr: Option<BdAddr>,
    inquiry_active: bool,
    inquiry_finished: bool,
    pending_name_requests: u32,
}

impl HciLayer {
    pub fn new(config: StackConfig, store: Option<DeviceStore>) -> Self {
        let mut devices = DeviceRegistry::new();
        if let Some(store) = &store {
            match store.load() {
                Ok(records) => {
                    for record in records {
                        let device = devices.upsert(record.addr);
                        device.name = Some(record.name);
                        device.link_key = Some(record.link_key);
                    }
                    info!("loaded {} paired device(s) from store", devices.len());
                }
                Err(e) => warn!("could not load device store: {e}"),
            }
        }

        Self {
            event_queue: Arc::new(PacketQueue::new()),
            data_queue: Arc::new(PacketQueue::new()),
            command_out: PacketQueue::new(),
            data_out: PacketQueue::new(),
            command_credits: 1,
            data_credits: config.initial_data_credits,
            devices,
            bringup: Bringup::new(config.vendor_firmware.clone()),
            config,
            store,
            local_addr: None,
            inquiry_active: false,
            inquiry_finished: false,
            pending_name_requests: 0,
        }
    }

    /// Receive handle for the transport callback
    pub fn rx_handle(&self) -> HciRx {
        HciRx {
            event_queue: Arc::clone(&self.event_queue),
            data_queue: Arc::clone(&self.data_queue),
            event_assembler: PacketAssembler::new(HCI_EVENT_PKT),
            acl_assembler: PacketAssembler::new(HCI_ACL_PKT),
        }
    }

    /// Kick off controller bring-up
    pub fn start_bringup(&mut self) {
        let cmd = self.bringup.start();
        self.send_command(&cmd);
    }

    /// True once bring-up reached its terminal state
    pub fn is_ready(&self) -> bool {
        self.bringup.is_ready()
    }

    /// The controller's own address, known after bring-up
    pub fn local_addr(&self) -> Option<BdAddr> {
        self.local_addr
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub(crate) fn devices_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.devices
    }

    /// Handle of the open link to `addr`, if any
    pub fn handle_for(&self, addr: &BdAddr) -> Option<u16> {
        self.devices.get(addr).and_then(|d| d.state.handle())
    }

    /// Fill in the length field and enqueue an outbound command
    pub fn send_command(&mut self, command: &HciCommand) {
        self.command_out.enqueue_buffer(command.to_packet());
    }

    /// Frame a payload as ACL data for `handle` and enqueue it
    pub fn send_acl(&mut self, handle: u16, payload: Vec<u8>) {
        self.data_out
            .enqueue_buffer(AclPacket::new(handle, payload).to_packet());
    }

    /// Start an inquiry lasting roughly `seconds`
    pub fn start_inquiry(&mut self, seconds: u8) -> Result<(), HciError> {
        if !self.is_ready() {
            return Err(HciError::NotReady);
        }
        // Inquiry length is in 1.28 s units, valid range 0x01..=0x30
        let length = ((u16::from(seconds) * 100 + 127) / 128).clamp(1, 0x30) as u8;
        self.inquiry_active = true;
        self.inquiry_finished = false;
        self.pending_name_requests = 0;
        self.send_command(&HciCommand::Inquiry {
            lap: GIAC_LAP,
            length,
            num_responses: 0,
        });
        Ok(())
    }

    pub fn cancel_inquiry(&mut self) -> Result<(), HciError> {
        if !self.is_ready() {
            return Err(HciError::NotReady);
        }
        self.inquiry_active = false;
        self.send_command(&HciCommand::InquiryCancel);
        Ok(())
    }

    /// Open an ACL link to `addr`
    pub fn start_connection(&mut self, addr: BdAddr) -> Result<(), HciError> {
        if !self.is_ready() {
            return Err(HciError::NotReady);
        }
        let device = self.devices.upsert(addr);
        if let ConnectionState::Connected(_) = device.state {
            return Ok(());
        }
        if device.state == ConnectionState::Connecting {
            return Ok(());
        }
        device.state = ConnectionState::Connecting;
        let cmd = HciCommand::CreateConnection {
            bd_addr: addr.0,
            packet_type: ACL_PACKET_TYPES,
            page_scan_repetition_mode: device.page_scan_repetition_mode,
            clock_offset: device.clock_offset,
            allow_role_switch: 0x01,
        };
        self.send_command(&cmd);
        Ok(())
    }

    /// Close the ACL link to `addr`
    pub fn close_connection(&mut self, addr: &BdAddr) -> Result<(), HciError> {
        let handle = self
            .handle_for(addr)
            .ok_or_else(|| HciError::NotConnected(addr.to_string()))?;
        self.send_command(&HciCommand::Disconnect {
            handle,
            reason: REASON_REMOTE_USER_TERMINATED,
        });
        Ok(())
    }

    /// Request authentication (pairing) on the open link to `addr`
    pub fn authenticate(&mut self, addr: &BdAddr) -> Result<(), HciError> {
        let handle = self
            .handle_for(addr)
            .ok_or_else(|| HciError::NotConnected(addr.to_string()))?;
        self.send_command(&HciCommand::AuthenticationRequested { handle });
        Ok(())
    }

    /// Forget the stored link key for `addr` and persist the change
    pub fn unpair(&mut self, addr: &BdAddr) -> Result<(), HciError> {
        let device = self
            .devices
            .get_mut(addr)
            .ok_or_else(|| HciError::UnknownDevice(addr.to_string()))?;
        device.link_key = None;
        self.persist_devices();
        Ok(())
    }

    /// Dequeue the next complete inbound event packet
    pub(crate) fn next_event_packet(&self) -> Option<Vec<u8>> {
        self.event_queue.dequeue()
    }

    /// Dequeue the next complete inbound ACL packet
    pub(crate) fn next_data_packet(&self) -> Option<Vec<u8>> {
        self.data_queue.dequeue()
    }

    /// Drain the outbound queues through the transport, subject to credits
    pub fn pump_outbound(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        while self.command_credits > 0 && self.command_out.avail() {
            if let Some(packet) = self.command_out.dequeue() {
                trace!("tx command ({} bytes)", packet.len());
                transport.send(&packet)?;
                self.command_credits -= 1;
            }
        }
        while self.data_credits > 0 && self.data_out.avail() {
            if let Some(packet) = self.data_out.dequeue() {
                trace!("tx acl ({} bytes)", packet.len());
                transport.send(&packet)?;
                self.data_credits -= 1;
            }
        }
        Ok(())
    }

    /// Process one inbound event packet, producing upcalls for the stack
    pub fn process_event(&mut self, packet: &[u8]) -> Vec<LinkEvent> {
        let Some(event) = HciEvent::parse(packet) else {
            warn!("dropping malformed HCI event ({} bytes)", packet.len());
            return Vec::new();
        };

        match event.event_code {
            EVT_CMD_COMPLETE | EVT_CMD_STATUS => self.on_command_done(&event),
            EVT_INQUIRY_RESULT => self.on_inquiry_result(&event.parameters),
            EVT_INQUIRY_RESULT_WITH_RSSI => self.on_inquiry_result_rssi(&event.parameters),
            EVT_EXTENDED_INQUIRY_RESULT => self.on_extended_inquiry_result(&event.parameters),
            EVT_INQUIRY_COMPLETE => self.on_inquiry_complete(),
            EVT_REMOTE_NAME_REQ_COMPLETE => self.on_remote_name_complete(&event.parameters),
            EVT_CONN_REQUEST => self.on_connection_request(&event.parameters),
            EVT_CONN_COMPLETE => self.on_connection_complete(&event.parameters),
            EVT_DISCONN_COMPLETE => self.on_disconnection_complete(&event.parameters),
            EVT_AUTH_COMPLETE => self.on_authentication_complete(&event.parameters),
            EVT_PIN_CODE_REQ => self.on_pin_code_request(&event.parameters),
            EVT_LINK_KEY_REQ => self.on_link_key_request(&event.parameters),
            EVT_LINK_KEY_NOTIFY => self.on_link_key_notification(&event.parameters),
            EVT_NUM_COMP_PKTS => self.on_num_completed_packets(&event.parameters),
            EVT_ROLE_CHANGE | EVT_MODE_CHANGE | EVT_MAX_SLOTS_CHANGE => Vec::new(),
            other => {
                trace!("ignoring HCI event 0x{other:02X}");
                Vec::new()
            }
        }
    }

    fn on_command_done(&mut self, event: &HciEvent) -> Vec<LinkEvent> {
        if let Some(credits) = event.num_hci_command_packets() {
            self.command_credits = credits;
        }
        let Some(completed_opcode) = event.command_opcode() else {
            warn!("command complete/status event too short");
            return Vec::new();
        };
        let status = event.command_status().unwrap_or(0);

        if event.event_code == EVT_CMD_STATUS {
            if status != 0 {
                warn!(
                    "command 0x{:04X} failed: {}",
                    completed_opcode,
                    status_to_str(status)
                );
                if completed_opcode == crate::hci::packet::opcode(OGF_LINK_CTL, OCF_CREATE_CONNECTION)
                {
                    return self.fail_pending_connection(status);
                }
            }
            return Vec::new();
        }

        if !self.bringup.is_ready() && self.bringup.is_started() {
            if completed_opcode == crate::hci::packet::opcode(OGF_INFO_PARAM, OCF_READ_BD_ADDR)
                && status == 0
            {
                let params = event.return_parameters();
                if let Some(addr) = BdAddr::from_slice(params.get(..6).unwrap_or(&[])) {
                    info!("local address {addr}");
                    self.local_addr = Some(addr);
                }
            }
            let next = self
                .bringup
                .on_command_complete(completed_opcode, status, &self.config);
            if let Some(cmd) = next {
                self.send_command(&cmd);
            }
            if self.bringup.is_ready() {
                return vec![LinkEvent::Ready];
            }
            return Vec::new();
        }

        if status != 0 {
            warn!(
                "command 0x{:04X} failed: {}",
                completed_opcode,
                status_to_str(status)
            );
        }
        Vec::new()
    }

    fn fail_pending_connection(&mut self, status: u8) -> Vec<LinkEvent> {
        let addr = self
            .devices
            .iter()
            .find(|d| d.state == ConnectionState::Connecting)
            .map(|d| d.addr);
        if let Some(addr) = addr {
            if let Some(device) = self.devices.get_mut(&addr) {
                device.state = ConnectionState::Failed;
            }
            return vec![LinkEvent::ConnectionFailed { addr, status }];
        }
        Vec::new()
    }

    fn on_inquiry_result(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        let Some(&count) = params.first() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        // Each responder: addr(6) psrm(1) reserved(2) cod(3) clock_offset(2)
        for i in 0..count as usize {
            let base = 1 + i * 14;
            let Some(fields) = params.get(base..base + 14) else {
                warn!("short inquiry result event");
                break;
            };
            let addr = match BdAddr::from_slice(&fields[0..6]) {
                Some(addr) => addr,
                None => continue,
            };
            let psrm = fields[6];
            let mut cod = [0u8; 3];
            cod.copy_from_slice(&fields[9..12]);
            let clock_offset = u16::from_le_bytes([fields[12], fields[13]]);
            events.extend(self.record_inquiry_responder(addr, psrm, cod, clock_offset, None));
        }
        events
    }

    fn on_inquiry_result_rssi(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        let Some(&count) = params.first() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        // Each responder: addr(6) psrm(1) reserved(1) cod(3) clock_offset(2) rssi(1)
        for i in 0..count as usize {
            let base = 1 + i * 14;
            let Some(fields) = params.get(base..base + 14) else {
                warn!("short inquiry result (RSSI) event");
                break;
            };
            let addr = match BdAddr::from_slice(&fields[0..6]) {
                Some(addr) => addr,
                None => continue,
            };
            let psrm = fields[6];
            let mut cod = [0u8; 3];
            cod.copy_from_slice(&fields[8..11]);
            let clock_offset = u16::from_le_bytes([fields[11], fields[12]]);
            events.extend(self.record_inquiry_responder(addr, psrm, cod, clock_offset, None));
        }
        events
    }

    fn on_extended_inquiry_result(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        // num_responses(1, always 1) addr(6) psrm(1) reserved(1) cod(3)
        // clock_offset(2) rssi(1) eir(240)
        let Some(fields) = params.get(1..15) else {
            warn!("short extended inquiry result event");
            return Vec::new();
        };
        let Some(addr) = BdAddr::from_slice(&fields[0..6]) else {
            return Vec::new();
        };
        let psrm = fields[6];
        let mut cod = [0u8; 3];
        cod.copy_from_slice(&fields[8..11]);
        let clock_offset = u16::from_le_bytes([fields[11], fields[12]]);
        let name = params.get(15..).and_then(parse_eir_name);
        self.record_inquiry_responder(addr, psrm, cod, clock_offset, name)
    }

    fn record_inquiry_responder(
        &mut self,
        addr: BdAddr,
        psrm: u8,
        cod: [u8; 3],
        clock_offset: u16,
        eir_name: Option<String>,
    ) -> Vec<LinkEvent> {
        let known = self.devices.get(&addr).is_some();
        let device = self.devices.upsert(addr);
        device.page_scan_repetition_mode = psrm;
        device.class_of_device = cod;
        // Bit 15 flags the offset as valid when echoed back in commands
        device.clock_offset = clock_offset | 0x8000;
        if let Some(name) = eir_name {
            device.name = Some(name);
        }

        let mut events = Vec::new();
        if !known {
            events.push(LinkEvent::DeviceDiscovered { addr });
        }
        if self.devices.get(&addr).map(|d| d.name.is_none()) == Some(true) {
            self.pending_name_requests += 1;
            self.send_command(&HciCommand::RemoteNameRequest {
                bd_addr: addr.0,
                page_scan_repetition_mode: psrm,
                clock_offset: clock_offset | 0x8000,
            });
        }
        events
    }

    fn on_inquiry_complete(&mut self) -> Vec<LinkEvent> {
        self.inquiry_active = false;
        self.inquiry_finished = true;
        if self.pending_name_requests == 0 {
            self.inquiry_finished = false;
            vec![LinkEvent::InquiryComplete]
        } else {
            debug!(
                "inquiry finished, waiting for {} name request(s)",
                self.pending_name_requests
            );
            Vec::new()
        }
    }

    fn on_remote_name_complete(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        // status(1) addr(6) name(up to 248, zero-terminated)
        let Some(header) = params.get(..7) else {
            warn!("short remote name request complete event");
            return Vec::new();
        };
        let status = header[0];
        let Some(addr) = BdAddr::from_slice(&header[1..7]) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if status == 0 {
            let name_bytes = params.get(7..).unwrap_or(&[]);
            let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
            let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
            if let Some(device) = self.devices.get_mut(&addr) {
                device.name = Some(name);
            }
            events.push(LinkEvent::NameResolved { addr });
        } else {
            warn!("name request for {addr} failed: {}", status_to_str(status));
        }

        self.pending_name_requests = self.pending_name_requests.saturating_sub(1);
        if self.pending_name_requests == 0 && self.inquiry_finished {
            self.inquiry_finished = false;
            events.push(LinkEvent::InquiryComplete);
        }
        events
    }

    fn on_connection_request(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        // addr(6) cod(3) link_type(1)
        let Some(fields) = params.get(..10) else {
            warn!("short connection request event");
            return Vec::new();
        };
        let Some(addr) = BdAddr::from_slice(&fields[0..6]) else {
            return Vec::new();
        };
        let device = self.devices.upsert(addr);
        device.class_of_device.copy_from_slice(&fields[6..9]);
        device.state = ConnectionState::Connecting;

        // Remain peripheral; the remote initiated, let it keep the role
        self.send_command(&HciCommand::AcceptConnectionRequest {
            bd_addr: addr.0,
            role: 0x01,
        });
        vec![LinkEvent::IncomingConnection { addr }]
    }

    fn on_connection_complete(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        // status(1) handle(2) addr(6) link_type(1) encryption(1)
        let Some(fields) = params.get(..11) else {
            warn!("short connection complete event");
            return Vec::new();
        };
        let status = fields[0];
        let handle = u16::from_le_bytes([fields[1], fields[2]]);
        let Some(addr) = BdAddr::from_slice(&fields[3..9]) else {
            return Vec::new();
        };

        let device = self.devices.upsert(addr);
        if status == 0 {
            device.state = ConnectionState::Connected(handle);
            info!("link to {addr} open, handle 0x{handle:04X}");
            vec![LinkEvent::Connected { addr, handle }]
        } else {
            device.state = ConnectionState::Failed;
            warn!("connection to {addr} failed: {}", status_to_str(status));
            vec![LinkEvent::ConnectionFailed { addr, status }]
        }
    }

    fn on_disconnection_complete(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        // status(1) handle(2) reason(1)
        let Some(fields) = params.get(..4) else {
            warn!("short disconnection complete event");
            return Vec::new();
        };
        let handle = u16::from_le_bytes([fields[1], fields[2]]);
        let reason = fields[3];

        let Some(device) = self.devices.by_handle_mut(handle) else {
            // A disconnect for a handle we never opened is a logic error
            debug_assert!(false, "disconnection for unknown handle 0x{handle:04X}");
            warn!("disconnection complete for unknown handle 0x{handle:04X}");
            return Vec::new();
        };
        let addr = device.addr;
        device.state = ConnectionState::Idle;
        info!("link to {addr} closed: {}", status_to_str(reason));
        vec![LinkEvent::Disconnected { addr, handle, reason }]
    }

    fn on_authentication_complete(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        let Some(fields) = params.get(..3) else {
            warn!("short authentication complete event");
            return Vec::new();
        };
        let status = fields[0];
        let handle = u16::from_le_bytes([fields[1], fields[2]]);
        if status != 0 {
            warn!("authentication failed: {}", status_to_str(status));
        }
        vec![LinkEvent::AuthenticationComplete { handle, status }]
    }

    fn on_pin_code_request(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        let Some(addr) = params.get(..6).and_then(BdAddr::from_slice) else {
            warn!("short PIN code request event");
            return Vec::new();
        };
        debug!("PIN code request from {addr}, answering with configured PIN");
        let pin = self.config.pin.as_bytes().to_vec();
        self.send_command(&HciCommand::PinCodeRequestReply {
            bd_addr: addr.0,
            pin,
        });
        Vec::new()
    }

    fn on_link_key_request(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        let Some(addr) = params.get(..6).and_then(BdAddr::from_slice) else {
            warn!("short link key request event");
            return Vec::new();
        };
        let stored = self.devices.get(&addr).and_then(|d| d.link_key);
        match stored {
            Some(link_key) => {
                debug!("answering link key request for {addr} with stored key");
                self.send_command(&HciCommand::LinkKeyRequestReply {
                    bd_addr: addr.0,
                    link_key: link_key.key,
                });
            }
            None => {
                // Negative reply makes the remote fall back to PIN entry
                debug!("no stored key for {addr}, negative reply");
                self.send_command(&HciCommand::LinkKeyRequestNegativeReply { bd_addr: addr.0 });
            }
        }
        Vec::new()
    }

    fn on_link_key_notification(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        // addr(6) key(16) type(1)
        let Some(fields) = params.get(..23) else {
            warn!("short link key notification event");
            return Vec::new();
        };
        let Some(addr) = BdAddr::from_slice(&fields[0..6]) else {
            return Vec::new();
        };
        let Some(key_type) = LinkKeyType::from_wire(fields[22]) else {
            warn!("link key notification with unknown key type 0x{:02X}", fields[22]);
            return Vec::new();
        };
        let mut key = [0u8; 16];
        key.copy_from_slice(&fields[6..22]);

        let device = self.devices.upsert(addr);
        device.link_key = Some(LinkKey { key, key_type });
        info!("stored link key for {addr}");
        self.persist_devices();
        Vec::new()
    }

    fn on_num_completed_packets(&mut self, params: &[u8]) -> Vec<LinkEvent> {
        let Some(&count) = params.first() else {
            return Vec::new();
        };
        // Per handle: handle(2) completed(2)
        for i in 0..count as usize {
            let base = 1 + i * 4;
            let Some(fields) = params.get(base..base + 4) else {
                warn!("short number-of-completed-packets event");
                break;
            };
            let completed = u16::from_le_bytes([fields[2], fields[3]]);
            self.data_credits = self.data_credits.saturating_add(completed);
        }
        Vec::new()
    }

    fn persist_devices(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        let records: Vec<StoredDevice> = self
            .devices
            .iter()
            .filter_map(|d| {
                d.link_key.map(|link_key| StoredDevice {
                    addr: d.addr,
                    name: d.name.clone().unwrap_or_default(),
                    link_key,
                })
            })
            .collect();
        if let Err(e) = store.save(&records) {
            error!("could not persist device table: {e}");
        }
    }
}

/// Extract a device name from an EIR data block
fn parse_eir_name(eir: &[u8]) -> Option<String> {
    let mut offset = 0;
    while offset < eir.len() {
        let length = eir[offset] as usize;
        if length == 0 || offset + 1 + length > eir.len() {
            break;
        }
        let data_type = eir[offset + 1];
        let data = &eir[offset + 2..offset + 1 + length];
        if data_type == EIR_COMPLETE_LOCAL_NAME || data_type == EIR_SHORTENED_LOCAL_NAME {
            return Some(String::from_utf8_lossy(data).into_owned());
        }
        offset += 1 + length;
    }
    None
}
