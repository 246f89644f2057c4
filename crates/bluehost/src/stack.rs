//! The stack facade and its cooperative poll loop
//!
//! [`BtStack`] owns the transport and every protocol layer. All state
//! machines run on the thread that calls [`BtStack::poll`]; the transport
//! callback only feeds the inbound queues through [`HciRx`]. Each poll pass
//! drains inbound events into HCI, drains inbound data up through L2CAP to
//! the registered clients, then flushes the outbound queues subject to the
//! controller's credit.

use crate::config::StackConfig;
use crate::error::Error;
use crate::hci::device::BdAddr;
use crate::hci::layer::{HciLayer, HciRx, LinkEvent};
use crate::l2cap::constants::{PSM_RFCOMM, PSM_SDP};
use crate::l2cap::layer::{ChannelEvent, L2capLayer};
use crate::rfcomm::constants::RFCOMM_SPP_CHANNEL;
use crate::rfcomm::session::{RfcommEvent, RfcommLayer};
use crate::sdp::client::{SdpEvent, SdpLayer};
use crate::sdp::types::{DataElement, Uuid};
use crate::store::DeviceStore;
use crate::transport::Transport;
use log::debug;
use std::collections::VecDeque;

/// Events the stack reports to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// Controller bring-up finished
    Ready,
    /// An inquiry responder was seen for the first time
    DeviceDiscovered { addr: BdAddr },
    /// A device's name resolved
    NameResolved { addr: BdAddr },
    /// Inquiry and all name lookups finished
    InquiryComplete,
    /// An ACL link opened (outgoing or auto-accepted incoming)
    DeviceConnected { addr: BdAddr },
    /// A connection attempt failed
    DeviceConnectionFailed { addr: BdAddr, status: u8 },
    /// An ACL link closed
    DeviceDisconnected { addr: BdAddr, reason: u8 },
    /// A service discovery request finished
    SdpResult {
        addr: BdAddr,
        uuid: Uuid,
        attributes: Vec<DataElement>,
    },
    /// A service discovery request failed
    SdpFailed {
        addr: BdAddr,
        uuid: Uuid,
        reason: String,
    },
    /// An RFCOMM channel finished its handshake
    RfcommChannelOpen { addr: BdAddr, channel: u8 },
    /// An RFCOMM channel closed
    RfcommChannelClosed { addr: BdAddr, channel: u8 },
    /// User data received on an open RFCOMM channel
    RfcommData {
        addr: BdAddr,
        channel: u8,
        payload: Vec<u8>,
    },
}

/// An upper-layer protocol bound to an L2CAP PSM.
///
/// The stack routes channel events to whichever client claims the event's
/// PSM; clients send through the L2CAP and HCI layers passed alongside.
pub trait L2capClient {
    fn psm(&self) -> u16;
    fn on_channel_event(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        event: ChannelEvent,
    ) -> Vec<StackEvent>;
}

impl L2capClient for SdpLayer {
    fn psm(&self) -> u16 {
        PSM_SDP
    }

    fn on_channel_event(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        event: ChannelEvent,
    ) -> Vec<StackEvent> {
        SdpLayer::on_channel_event(self, l2cap, hci, event)
            .into_iter()
            .map(|event| match event {
                SdpEvent::RequestComplete {
                    addr,
                    uuid,
                    attributes,
                } => StackEvent::SdpResult {
                    addr,
                    uuid,
                    attributes,
                },
                SdpEvent::RequestFailed { addr, uuid, reason } => {
                    StackEvent::SdpFailed { addr, uuid, reason }
                }
            })
            .collect()
    }
}

impl L2capClient for RfcommLayer {
    fn psm(&self) -> u16 {
        PSM_RFCOMM
    }

    fn on_channel_event(
        &mut self,
        l2cap: &mut L2capLayer,
        hci: &mut HciLayer,
        event: ChannelEvent,
    ) -> Vec<StackEvent> {
        RfcommLayer::on_channel_event(self, l2cap, hci, event)
            .into_iter()
            .map(|event| match event {
                RfcommEvent::ChannelOpen { addr, channel } => {
                    StackEvent::RfcommChannelOpen { addr, channel }
                }
                RfcommEvent::ChannelClosed { addr, channel } => {
                    StackEvent::RfcommChannelClosed { addr, channel }
                }
                RfcommEvent::Data {
                    addr,
                    channel,
                    payload,
                } => StackEvent::RfcommData {
                    addr,
                    channel,
                    payload,
                },
            })
            .collect()
    }
}

/// The assembled Bluetooth host stack
pub struct BtStack<T: Transport> {
    transport: T,
    hci: HciLayer,
    l2cap: L2capLayer,
    sdp: SdpLayer,
    rfcomm: RfcommLayer,
    events: VecDeque<StackEvent>,
}

impl<T: Transport> BtStack<T> {
    pub fn new(transport: T, config: StackConfig) -> Self {
        let store = config.store_path.clone().map(DeviceStore::new);
        let fcs_policy = config.fcs_policy;

        let mut l2cap = L2capLayer::new();
        l2cap.register_psm(PSM_SDP);
        l2cap.register_psm(PSM_RFCOMM);

        Self {
            transport,
            hci: HciLayer::new(config, store),
            l2cap,
            sdp: SdpLayer::new(RFCOMM_SPP_CHANNEL),
            rfcomm: RfcommLayer::new(fcs_policy),
            events: VecDeque::new(),
        }
    }

    /// Receive handle for the transport's packet-delivery callback
    pub fn rx_handle(&self) -> HciRx {
        self.hci.rx_handle()
    }

    /// Direct access to the transport (e.g. to poll a serial device)
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Start controller bring-up; [`StackEvent::Ready`] follows once the
    /// fixed command sequence completes
    pub fn power_on(&mut self) -> Result<(), Error> {
        self.hci.start_bringup();
        self.flush_outbound()
    }

    pub fn is_ready(&self) -> bool {
        self.hci.is_ready()
    }

    pub fn local_addr(&self) -> Option<BdAddr> {
        self.hci.local_addr()
    }

    pub fn hci(&self) -> &HciLayer {
        &self.hci
    }

    /// One cooperative poll pass
    pub fn poll(&mut self) -> Result<(), Error> {
        // Inbound events into HCI
        while let Some(packet) = self.hci.next_event_packet() {
            let link_events = self.hci.process_event(&packet);
            for link_event in link_events {
                let channel_events = self.l2cap.on_link_event(&mut self.hci, &link_event);
                self.emit_link_event(&link_event);
                self.dispatch_channel_events(channel_events);
            }
        }

        // Inbound data up through L2CAP to the PSM clients
        while let Some(packet) = self.hci.next_data_packet() {
            let channel_events = self.l2cap.process_data(&mut self.hci, &packet);
            self.dispatch_channel_events(channel_events);
        }

        self.flush_outbound()
    }

    /// Pop the next application-facing event
    pub fn next_event(&mut self) -> Option<StackEvent> {
        self.events.pop_front()
    }

    fn dispatch_channel_events(&mut self, channel_events: Vec<ChannelEvent>) {
        for event in channel_events {
            let psm = match &event {
                ChannelEvent::Open { psm, .. }
                | ChannelEvent::ConnectFailed { psm, .. }
                | ChannelEvent::Closed { psm, .. }
                | ChannelEvent::Data { psm, .. } => *psm,
            };
            let client: &mut dyn L2capClient = if psm == self.sdp.psm() {
                &mut self.sdp
            } else if psm == self.rfcomm.psm() {
                &mut self.rfcomm
            } else {
                debug!("no client registered for PSM 0x{psm:04X}");
                continue;
            };
            let stack_events = client.on_channel_event(&mut self.l2cap, &mut self.hci, event);
            self.events.extend(stack_events);
        }
    }

    fn emit_link_event(&mut self, link_event: &LinkEvent) {
        let event = match link_event {
            LinkEvent::Ready => Some(StackEvent::Ready),
            LinkEvent::DeviceDiscovered { addr } => {
                Some(StackEvent::DeviceDiscovered { addr: *addr })
            }
            LinkEvent::NameResolved { addr } => Some(StackEvent::NameResolved { addr: *addr }),
            LinkEvent::InquiryComplete => Some(StackEvent::InquiryComplete),
            LinkEvent::Connected { addr, .. } => Some(StackEvent::DeviceConnected { addr: *addr }),
            LinkEvent::ConnectionFailed { addr, status } => {
                Some(StackEvent::DeviceConnectionFailed {
                    addr: *addr,
                    status: *status,
                })
            }
            LinkEvent::Disconnected { addr, reason, .. } => {
                Some(StackEvent::DeviceDisconnected {
                    addr: *addr,
                    reason: *reason,
                })
            }
            LinkEvent::IncomingConnection { .. } | LinkEvent::AuthenticationComplete { .. } => None,
        };
        if let Some(event) = event {
            self.events.push_back(event);
        }
    }

    fn flush_outbound(&mut self) -> Result<(), Error> {
        self.hci.pump_outbound(&mut self.transport)?;
        Ok(())
    }

    // --- application-facing operations ---

    /// Start an inquiry lasting roughly `seconds`
    pub fn start_inquiry(&mut self, seconds: u8) -> Result<(), Error> {
        self.hci.start_inquiry(seconds)?;
        self.flush_outbound()
    }

    pub fn cancel_inquiry(&mut self) -> Result<(), Error> {
        self.hci.cancel_inquiry()?;
        self.flush_outbound()
    }

    /// Open an ACL link to a device
    pub fn connect(&mut self, addr: BdAddr) -> Result<(), Error> {
        self.hci.start_connection(addr)?;
        self.flush_outbound()
    }

    /// Close the ACL link to a device
    pub fn disconnect(&mut self, addr: &BdAddr) -> Result<(), Error> {
        self.hci.close_connection(addr)?;
        self.flush_outbound()
    }

    /// Request authentication (pairing) on the open link
    pub fn authenticate(&mut self, addr: &BdAddr) -> Result<(), Error> {
        self.hci.authenticate(addr)?;
        self.flush_outbound()
    }

    /// Forget the stored link key for a device
    pub fn unpair(&mut self, addr: &BdAddr) -> Result<(), Error> {
        self.hci.unpair(addr)?;
        Ok(())
    }

    /// Discover services on a device matching `uuid`, fetching the
    /// attribute range `[attr_low, attr_high]`
    pub fn sdp_request(
        &mut self,
        addr: BdAddr,
        uuid: Uuid,
        attr_low: u16,
        attr_high: u16,
    ) -> Result<(), Error> {
        self.sdp
            .start_request(&mut self.l2cap, &mut self.hci, addr, uuid, attr_low, attr_high)?;
        self.flush_outbound()
    }

    /// Open an RFCOMM channel to a device
    pub fn rfcomm_open(&mut self, addr: BdAddr, channel: u8) -> Result<(), Error> {
        self.rfcomm
            .open_channel(&mut self.l2cap, &mut self.hci, addr, channel)?;
        self.flush_outbound()
    }

    /// Send data on an open RFCOMM channel
    pub fn rfcomm_send(&mut self, addr: &BdAddr, channel: u8, payload: &[u8]) -> Result<(), Error> {
        self.rfcomm
            .send_data(&mut self.l2cap, &mut self.hci, addr, channel, payload)?;
        self.flush_outbound()
    }

    /// Close an RFCOMM channel
    pub fn rfcomm_close(&mut self, addr: &BdAddr, channel: u8) -> Result<(), Error> {
        self.rfcomm
            .close_channel(&mut self.l2cap, &mut self.hci, addr, channel)?;
        self.flush_outbound()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::constants::*;
    use crate::transport::MockTransport;

    fn cmd_complete(completed_opcode: u16, status: u8, extra: &[u8]) -> Vec<u8> {
        let op = completed_opcode.to_le_bytes();
        let mut packet = vec![EVT_CMD_COMPLETE, 4 + extra.len() as u8, 1, op[0], op[1], status];
        packet.extend_from_slice(extra);
        packet
    }

    fn sent_opcode(packet: &[u8]) -> u16 {
        u16::from_le_bytes([packet[1], packet[2]])
    }

    #[test]
    fn test_stack_bringup_through_rx_path() {
        let mut stack = BtStack::new(MockTransport::new(), StackConfig::default());
        let mut rx = stack.rx_handle();

        stack.power_on().unwrap();
        assert_eq!(sent_opcode(&stack.transport_mut().sent[0]), 0x0C03);

        // The transport delivers command completes; poll drives the
        // remaining bring-up steps and surfaces Ready exactly once
        for (completed, extra) in [
            (0x0C03u16, &[][..]),
            (0x1009, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06][..]),
            (0x0C24, &[][..]),
            (0x0C13, &[][..]),
            (0x0C1A, &[][..]),
        ] {
            rx.receive(HCI_EVENT_PKT, &cmd_complete(completed, 0, extra));
            stack.poll().unwrap();
        }

        assert!(stack.is_ready());
        assert_eq!(stack.next_event(), Some(StackEvent::Ready));
        assert_eq!(stack.next_event(), None);
        assert_eq!(
            stack.local_addr().unwrap().to_string(),
            "06:05:04:03:02:01"
        );

        let opcodes: Vec<u16> = stack
            .transport_mut()
            .sent
            .iter()
            .map(|p| sent_opcode(p))
            .collect();
        assert_eq!(opcodes, vec![0x0C03, 0x1009, 0x0C24, 0x0C13, 0x0C1A]);
    }

    #[test]
    fn test_stack_rejects_operations_before_ready() {
        let mut stack = BtStack::new(MockTransport::new(), StackConfig::default());
        assert!(stack.start_inquiry(8).is_err());
        assert!(stack.connect(BdAddr([1, 2, 3, 4, 5, 6])).is_err());
    }

    #[test]
    fn test_stack_fragmented_event_delivery() {
        let mut stack = BtStack::new(MockTransport::new(), StackConfig::default());
        let mut rx = stack.rx_handle();
        stack.power_on().unwrap();

        // A command complete split across three deliveries still lands
        let packet = cmd_complete(0x0C03, 0, &[]);
        rx.receive(HCI_EVENT_PKT, &packet[..2]);
        rx.receive(HCI_EVENT_PKT, &packet[2..4]);
        rx.receive(HCI_EVENT_PKT, &packet[4..]);
        stack.poll().unwrap();

        // Reset completed, so ReadBdAddr went out
        let last = stack.transport_mut().sent.last().unwrap().clone();
        assert_eq!(sent_opcode(&last), 0x1009);
    }
}
