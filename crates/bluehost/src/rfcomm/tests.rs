//! Tests for the RFCOMM implementation: frame codec, multiplexer messages,
//! and the channel handshake ordering

use super::constants::*;
use super::frame::*;
use super::session::{RfcommEvent, RfcommLayer};
use crate::config::{FcsPolicy, StackConfig};
use crate::hci::constants::{EVT_CMD_COMPLETE, EVT_CONN_COMPLETE, HCI_ACL_PKT};
use crate::hci::device::BdAddr;
use crate::hci::layer::HciLayer;
use crate::hci::packet::AclPacket;
use crate::l2cap::constants::*;
use crate::l2cap::layer::{ChannelEvent, L2capLayer};
use crate::l2cap::packet::L2capPacket;
use crate::l2cap::signaling::SignalingMessage;
use crate::l2cap::types::{ChannelId, ConfigOptions};
use crate::transport::MockTransport;

const HANDLE: u16 = 0x0042;
const REMOTE_CID: u16 = 0x0050;

fn test_addr() -> BdAddr {
    BdAddr([0x10, 0x20, 0x30, 0x40, 0x50, 0x60])
}

fn ready_hci_with_link(addr: BdAddr) -> HciLayer {
    let config = StackConfig {
        initial_data_credits: 64,
        ..StackConfig::default()
    };
    let mut hci = HciLayer::new(config, None);
    let mut transport = MockTransport::new();
    hci.start_bringup();
    hci.pump_outbound(&mut transport).unwrap();
    for completed in [0x0C03u16, 0x1009, 0x0C24, 0x0C13, 0x0C1A] {
        let op = completed.to_le_bytes();
        let mut packet = vec![EVT_CMD_COMPLETE, 4, 1, op[0], op[1], 0];
        if completed == 0x1009 {
            packet[1] = 10;
            packet.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        }
        hci.process_event(&packet);
        hci.pump_outbound(&mut transport).unwrap();
    }

    let mut packet = vec![EVT_CONN_COMPLETE, 11, 0x00];
    packet.extend_from_slice(&HANDLE.to_le_bytes());
    packet.extend_from_slice(&addr.0);
    packet.extend_from_slice(&[0x01, 0x00]);
    hci.process_event(&packet);
    hci
}

fn inbound_acl(cid: u16, payload: &[u8]) -> Vec<u8> {
    let l2cap = L2capPacket::new(cid, payload.to_vec());
    AclPacket::new(HANDLE, l2cap.to_bytes()).to_packet()[1..].to_vec()
}

/// Pump the HCI outbound queue and return RFCOMM frames sent to the peer
fn sent_frames(hci: &mut HciLayer) -> Vec<RfcommFrame> {
    let mut transport = MockTransport::new();
    hci.pump_outbound(&mut transport).unwrap();
    transport
        .sent
        .iter()
        .filter(|p| p[0] == HCI_ACL_PKT)
        .filter_map(|p| {
            let acl = AclPacket::parse(&p[1..]).unwrap();
            let l2cap = L2capPacket::parse(&acl.data).unwrap();
            if l2cap.header.channel_id == REMOTE_CID {
                Some(RfcommFrame::parse(&l2cap.payload).unwrap())
            } else {
                None
            }
        })
        .collect()
}

struct Harness {
    hci: HciLayer,
    l2cap: L2capLayer,
    rfcomm: RfcommLayer,
    local_cid: ChannelId,
}

impl Harness {
    /// Bring up HCI + L2CAP and deliver the channel-open event to RFCOMM
    fn new_outgoing(channel: u8, policy: FcsPolicy) -> Self {
        let addr = test_addr();
        let mut hci = ready_hci_with_link(addr);
        let mut l2cap = L2capLayer::new();
        let mut rfcomm = RfcommLayer::new(policy);

        rfcomm
            .open_channel(&mut l2cap, &mut hci, addr, channel)
            .unwrap();

        // Find our local CID from the connection request that went out
        let mut transport = MockTransport::new();
        hci.pump_outbound(&mut transport).unwrap();
        let local_cid = transport
            .sent
            .iter()
            .filter(|p| p[0] == HCI_ACL_PKT)
            .find_map(|p| {
                let acl = AclPacket::parse(&p[1..]).unwrap();
                let l2cap = L2capPacket::parse(&acl.data).unwrap();
                match SignalingMessage::parse(&l2cap.payload) {
                    Ok(SignalingMessage::ConnectionRequest { source_cid, .. }) => Some(source_cid),
                    _ => None,
                }
            })
            .expect("no L2CAP connection request sent");

        // Peer accepts and configuration completes in both directions
        let mut events = Vec::new();
        events.extend(l2cap.process_data(
            &mut hci,
            &inbound_acl(
                L2CAP_SIGNALING_CID,
                &SignalingMessage::ConnectionResponse {
                    identifier: 1,
                    destination_cid: REMOTE_CID,
                    source_cid: local_cid,
                    result: L2CAP_CONN_SUCCESS,
                    status: 0,
                }
                .serialize(),
            ),
        ));
        events.extend(l2cap.process_data(
            &mut hci,
            &inbound_acl(
                L2CAP_SIGNALING_CID,
                &SignalingMessage::ConfigureRequest {
                    identifier: 2,
                    destination_cid: local_cid,
                    flags: 0,
                    options: ConfigOptions::default(),
                }
                .serialize(),
            ),
        ));
        events.extend(l2cap.process_data(
            &mut hci,
            &inbound_acl(
                L2CAP_SIGNALING_CID,
                &SignalingMessage::ConfigureResponse {
                    identifier: 3,
                    source_cid: local_cid,
                    flags: 0,
                    result: L2CAP_CONF_SUCCESS,
                    options: ConfigOptions::default(),
                }
                .serialize(),
            ),
        ));

        let mut rf_events = Vec::new();
        for event in events {
            rf_events.extend(rfcomm.on_channel_event(&mut l2cap, &mut hci, event));
        }
        assert!(rf_events.is_empty());

        Self {
            hci,
            l2cap,
            rfcomm,
            local_cid,
        }
    }

    /// Inject one RFCOMM frame as if the peer had sent it
    fn inject(&mut self, frame: &RfcommFrame) -> Vec<RfcommEvent> {
        self.inject_raw(&frame.serialize())
    }

    fn inject_raw(&mut self, payload: &[u8]) -> Vec<RfcommEvent> {
        let events = self
            .l2cap
            .process_data(&mut self.hci, &inbound_acl(self.local_cid, payload));
        let mut rf_events = Vec::new();
        for event in events {
            rf_events.extend(
                self.rfcomm
                    .on_channel_event(&mut self.l2cap, &mut self.hci, event),
            );
        }
        rf_events
    }

    fn inject_mux(&mut self, mcc_type: u8, command: bool, values: Vec<u8>) -> Vec<RfcommEvent> {
        let payload = MuxCommand::new(mcc_type, command, values).serialize();
        self.inject(&RfcommFrame::new(0, true, FrameType::Uih, false, payload))
    }

    fn sent(&mut self) -> Vec<RfcommFrame> {
        sent_frames(&mut self.hci)
    }

    fn channel_open(&self, channel: u8) -> bool {
        self.rfcomm.is_channel_open(&test_addr(), channel)
    }
}

#[test]
fn test_frame_roundtrip_sabm() {
    let frame = RfcommFrame::new(2, true, FrameType::Sabm, true, Vec::new());
    let bytes = frame.serialize();

    // address: EA | C/R | channel << 3
    assert_eq!(bytes[0], 0x01 | 0x02 | (2 << 3));
    assert_eq!(bytes[1], FRAME_SABM | CONTROL_PF);
    assert_eq!(bytes[2], 0x01); // zero length, EA set

    let parsed = RfcommFrame::parse(&bytes).unwrap();
    assert_eq!(parsed.channel, 2);
    assert!(parsed.command);
    assert_eq!(parsed.frame_type, FrameType::Sabm);
    assert!(parsed.poll_final);
    assert!(parsed.payload.is_empty());
    assert!(parsed.fcs_valid);
}

#[test]
fn test_frame_roundtrip_uih_payload() {
    let frame = RfcommFrame::new(1, true, FrameType::Uih, false, vec![0xDE, 0xAD, 0xBE]);
    let bytes = frame.serialize();

    let parsed = RfcommFrame::parse(&bytes).unwrap();
    assert_eq!(parsed.frame_type, FrameType::Uih);
    assert_eq!(parsed.payload, vec![0xDE, 0xAD, 0xBE]);
    assert!(parsed.fcs_valid);
}

#[test]
fn test_frame_two_byte_length() {
    let payload = vec![0x55; 200];
    let frame = RfcommFrame::new(1, true, FrameType::Uih, false, payload.clone());
    let bytes = frame.serialize();

    // EA clear on the first length byte
    assert_eq!(bytes[2] & 0x01, 0);

    let parsed = RfcommFrame::parse(&bytes).unwrap();
    assert_eq!(parsed.payload, payload);
    assert!(parsed.fcs_valid);
}

#[test]
fn test_frame_detects_bad_fcs() {
    let frame = RfcommFrame::new(1, true, FrameType::Sabm, true, Vec::new());
    let mut bytes = frame.serialize();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let parsed = RfcommFrame::parse(&bytes).unwrap();
    assert!(!parsed.fcs_valid);
}

#[test]
fn test_frame_rejects_truncation() {
    let frame = RfcommFrame::new(1, true, FrameType::Uih, false, vec![1, 2, 3]);
    let bytes = frame.serialize();
    assert!(RfcommFrame::parse(&bytes[..bytes.len() - 2]).is_err());
    assert!(RfcommFrame::parse(&[]).is_err());
    assert!(RfcommFrame::parse(&[0x03, 0x2F, 0x01]).is_err());
}

#[test]
fn test_mux_command_roundtrip() {
    let command = MuxCommand::new(MCC_PN, true, pn_values(2, 0, 127));
    let bytes = command.serialize();
    assert_eq!(bytes[0], (MCC_PN << 2) | 0x02 | 0x01);

    let parsed = MuxCommand::parse(&bytes).unwrap();
    assert_eq!(parsed, command);

    let response = MuxCommand::new(MCC_MSC, false, msc_values(2, MSC_DEFAULT_SIGNALS));
    let parsed = MuxCommand::parse(&response.serialize()).unwrap();
    assert!(!parsed.command);
    assert_eq!(msc_fields(&parsed.values), Some((2, MSC_DEFAULT_SIGNALS)));
}

#[test]
fn test_outgoing_channel_handshake_ordering() {
    let mut harness = Harness::new_outgoing(2, FcsPolicy::default());

    // L2CAP open triggered the control channel SABM
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].frame_type, FrameType::Sabm);
    assert_eq!(sent[0].channel, 0);
    assert!(!harness.channel_open(2));

    // Control UA -> parameter negotiation for the queued channel
    let events = harness.inject(&RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()));
    assert!(events.is_empty());
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    let pn = MuxCommand::parse(&sent[0].payload).unwrap();
    assert_eq!(pn.mcc_type, MCC_PN);
    assert!(pn.command);
    assert_eq!(pn_channel(&pn.values), Some(2));
    assert!(!harness.channel_open(2));

    // PN response -> SABM for the data channel
    let events = harness.inject_mux(MCC_PN, false, pn_values(2, 0, 127));
    assert!(events.is_empty());
    let sent = harness.sent();
    assert_eq!(sent[0].frame_type, FrameType::Sabm);
    assert_eq!(sent[0].channel, 2);
    assert!(!harness.channel_open(2));

    // Data channel UA -> our modem status command
    let events = harness.inject(&RfcommFrame::new(2, false, FrameType::Ua, true, Vec::new()));
    assert!(events.is_empty());
    let sent = harness.sent();
    let msc = MuxCommand::parse(&sent[0].payload).unwrap();
    assert_eq!(msc.mcc_type, MCC_MSC);
    assert!(msc.command);
    assert!(!harness.channel_open(2));

    // Peer's modem status command: we answer, still not open
    let events = harness.inject_mux(MCC_MSC, true, msc_values(2, MSC_DEFAULT_SIGNALS));
    assert!(events.is_empty());
    let sent = harness.sent();
    let msc_rsp = MuxCommand::parse(&sent[0].payload).unwrap();
    assert_eq!(msc_rsp.mcc_type, MCC_MSC);
    assert!(!msc_rsp.command);
    assert!(!harness.channel_open(2));

    // Peer answers our modem status: both directions done -> RPN goes out,
    // but the channel is still not open
    let events = harness.inject_mux(MCC_MSC, false, msc_values(2, MSC_DEFAULT_SIGNALS));
    assert!(events.is_empty());
    let sent = harness.sent();
    let rpn = MuxCommand::parse(&sent[0].payload).unwrap();
    assert_eq!(rpn.mcc_type, MCC_RPN);
    assert!(rpn.command);
    assert!(!harness.channel_open(2));

    // RPN response completes the sequence
    let events = harness.inject_mux(MCC_RPN, false, rpn_values(2));
    assert_eq!(
        events,
        vec![RfcommEvent::ChannelOpen {
            addr: test_addr(),
            channel: 2,
        }]
    );
    assert!(harness.channel_open(2));
}

#[test]
fn test_outgoing_channel_msc_interleaving() {
    // Peer's MSC command arrives before its UA-triggered response round;
    // the channel must still never open before both directions complete
    let mut harness = Harness::new_outgoing(2, FcsPolicy::default());
    harness.sent();

    harness.inject(&RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()));
    harness.sent();
    harness.inject_mux(MCC_PN, false, pn_values(2, 0, 127));
    harness.sent();

    // Peer MSC command arrives before our data-channel UA
    let events = harness.inject_mux(MCC_MSC, true, msc_values(2, MSC_DEFAULT_SIGNALS));
    assert!(events.is_empty());
    assert!(!harness.channel_open(2));
    harness.sent();

    harness.inject(&RfcommFrame::new(2, false, FrameType::Ua, true, Vec::new()));
    assert!(!harness.channel_open(2));
    harness.sent();

    let events = harness.inject_mux(MCC_MSC, false, msc_values(2, MSC_DEFAULT_SIGNALS));
    assert!(events.is_empty());
    assert!(!harness.channel_open(2));
    harness.sent();

    let events = harness.inject_mux(MCC_RPN, false, rpn_values(2));
    assert_eq!(
        events,
        vec![RfcommEvent::ChannelOpen {
            addr: test_addr(),
            channel: 2,
        }]
    );
}

#[test]
fn test_channel_deferred_until_control_open() {
    // Opening a data channel before channel 0 is up must not emit any data
    // channel traffic; the request parks until the control UA arrives
    let mut harness = Harness::new_outgoing(2, FcsPolicy::default());

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, 0);
    assert_eq!(sent[0].frame_type, FrameType::Sabm);
    assert!(!harness.channel_open(2));

    // Nothing further until the control channel opens
    assert!(harness.sent().is_empty());

    harness.inject(&RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()));
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    let pn = MuxCommand::parse(&sent[0].payload).unwrap();
    assert_eq!(pn.mcc_type, MCC_PN);
}

#[test]
fn test_incoming_channel_opens_after_both_msc_directions() {
    let addr = test_addr();
    let mut harness = Harness::new_outgoing(2, FcsPolicy::default());
    harness.sent();

    // Peer's control SABM (it considers itself the multiplexer initiator)
    let events = harness.inject(&RfcommFrame::new(0, true, FrameType::Sabm, true, Vec::new()));
    assert!(events.is_empty());
    let sent = harness.sent();
    assert!(sent.iter().any(|f| f.frame_type == FrameType::Ua && f.channel == 0));

    // Incoming SABM for channel 1: accepted immediately, our MSC follows
    let events = harness.inject(&RfcommFrame::new(1, true, FrameType::Sabm, true, Vec::new()));
    assert!(events.is_empty());
    let sent = harness.sent();
    assert!(sent.iter().any(|f| f.frame_type == FrameType::Ua && f.channel == 1));
    let msc_sent = sent.iter().any(|f| {
        f.frame_type == FrameType::Uih
            && f.channel == 0
            && MuxCommand::parse(&f.payload)
                .map(|c| c.mcc_type == MCC_MSC && c.command)
                .unwrap_or(false)
    });
    assert!(msc_sent);
    assert!(!harness.channel_open(1));

    // Peer's MSC command: answered, still closed (our direction pending)
    harness.inject_mux(MCC_MSC, true, msc_values(1, MSC_DEFAULT_SIGNALS));
    assert!(!harness.channel_open(1));
    harness.sent();

    // Peer answers our MSC: open, with no PN or RPN required
    let events = harness.inject_mux(MCC_MSC, false, msc_values(1, MSC_DEFAULT_SIGNALS));
    assert_eq!(
        events,
        vec![RfcommEvent::ChannelOpen { addr, channel: 1 }]
    );
}

#[test]
fn test_data_only_delivered_on_open_channels() {
    let mut harness = Harness::new_outgoing(2, FcsPolicy::default());
    harness.sent();
    harness.inject(&RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()));
    harness.sent();

    // Channel 2 is mid-handshake: UIH data for it is dropped
    let events = harness.inject(&RfcommFrame::new(2, true, FrameType::Uih, false, vec![1, 2]));
    assert!(events.is_empty());
}

#[test]
fn test_open_channel_delivers_and_sends_data() {
    let mut harness = Harness::new_outgoing(2, FcsPolicy::default());
    complete_outgoing_handshake(&mut harness, 2);

    let events = harness.inject(&RfcommFrame::new(2, true, FrameType::Uih, false, vec![7, 8, 9]));
    assert_eq!(
        events,
        vec![RfcommEvent::Data {
            addr: test_addr(),
            channel: 2,
            payload: vec![7, 8, 9],
        }]
    );

    harness
        .rfcomm
        .send_data(
            &mut harness.l2cap,
            &mut harness.hci,
            &test_addr(),
            2,
            b"hello",
        )
        .unwrap();
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].frame_type, FrameType::Uih);
    assert_eq!(sent[0].channel, 2);
    assert_eq!(sent[0].payload, b"hello");

    // Sending on a closed channel fails
    let bad = harness.rfcomm.send_data(
        &mut harness.l2cap,
        &mut harness.hci,
        &test_addr(),
        5,
        b"x",
    );
    assert!(bad.is_err());
}

#[test]
fn test_remote_disconnect_closes_channel() {
    let mut harness = Harness::new_outgoing(2, FcsPolicy::default());
    complete_outgoing_handshake(&mut harness, 2);

    let events = harness.inject(&RfcommFrame::new(2, true, FrameType::Disc, true, Vec::new()));
    assert_eq!(
        events,
        vec![RfcommEvent::ChannelClosed {
            addr: test_addr(),
            channel: 2,
        }]
    );
    assert!(!harness.channel_open(2));
    let sent = harness.sent();
    assert!(sent.iter().any(|f| f.frame_type == FrameType::Ua && f.channel == 2));
}

#[test]
fn test_dm_refuses_channel() {
    let mut harness = Harness::new_outgoing(2, FcsPolicy::default());
    harness.sent();
    harness.inject(&RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()));
    harness.sent();
    harness.inject_mux(MCC_PN, false, pn_values(2, 0, 127));
    harness.sent();

    // Peer refuses the data channel
    let events = harness.inject(&RfcommFrame::new(2, false, FrameType::Dm, true, Vec::new()));
    assert_eq!(
        events,
        vec![RfcommEvent::ChannelClosed {
            addr: test_addr(),
            channel: 2,
        }]
    );
}

#[test]
fn test_fcs_policy_reject_drops_frame() {
    let mut harness = Harness::new_outgoing(2, FcsPolicy::Reject);
    harness.sent();

    let mut bytes = RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()).serialize();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    harness.inject_raw(&bytes);

    // The corrupted UA was dropped: the pending channel never negotiates
    assert!(harness.sent().is_empty());
}

#[test]
fn test_fcs_policy_lenient_processes_frame() {
    let mut harness = Harness::new_outgoing(2, FcsPolicy::LogOnly);
    harness.sent();

    let mut bytes = RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()).serialize();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    harness.inject_raw(&bytes);

    // Processed despite the checksum: parameter negotiation starts
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        MuxCommand::parse(&sent[0].payload).unwrap().mcc_type,
        MCC_PN
    );
}

#[test]
fn test_invalid_channel_numbers_rejected() {
    let addr = test_addr();
    let mut hci = ready_hci_with_link(addr);
    let mut l2cap = L2capLayer::new();
    let mut rfcomm = RfcommLayer::new(FcsPolicy::default());

    assert!(rfcomm.open_channel(&mut l2cap, &mut hci, addr, 0).is_err());
    assert!(rfcomm
        .open_channel(&mut l2cap, &mut hci, addr, RFCOMM_MAX_CHANNELS as u8)
        .is_err());
}

/// Drive the full outgoing handshake for `channel` to the open state
fn complete_outgoing_handshake(harness: &mut Harness, channel: u8) {
    harness.sent();
    harness.inject(&RfcommFrame::new(0, false, FrameType::Ua, true, Vec::new()));
    harness.sent();
    harness.inject_mux(MCC_PN, false, pn_values(channel, 0, 127));
    harness.sent();
    harness.inject(&RfcommFrame::new(channel, false, FrameType::Ua, true, Vec::new()));
    harness.sent();
    harness.inject_mux(MCC_MSC, true, msc_values(channel, MSC_DEFAULT_SIGNALS));
    harness.sent();
    harness.inject_mux(MCC_MSC, false, msc_values(channel, MSC_DEFAULT_SIGNALS));
    harness.sent();
    let events = harness.inject_mux(MCC_RPN, false, rpn_values(channel));
    assert_eq!(
        events,
        vec![RfcommEvent::ChannelOpen {
            addr: test_addr(),
            channel,
        }]
    );
    harness.sent();
}
