//! Tests for the L2CAP implementation

use super::constants::*;
use super::layer::{ChannelEvent, L2capLayer};
use super::packet::*;
use super::signaling::SignalingMessage;
use super::types::*;
use crate::config::StackConfig;
use crate::hci::constants::{EVT_CMD_COMPLETE, EVT_CONN_COMPLETE, HCI_ACL_PKT};
use crate::hci::device::BdAddr;
use crate::hci::layer::{HciLayer, LinkEvent};
use crate::hci::packet::AclPacket;
use crate::transport::MockTransport;

const HANDLE: u16 = 0x0042;

fn test_addr() -> BdAddr {
    BdAddr([0x10, 0x20, 0x30, 0x40, 0x50, 0x60])
}

/// HCI layer driven through bring-up, with an open link to `addr`
fn ready_hci_with_link(addr: BdAddr) -> HciLayer {
    let mut hci = HciLayer::new(StackConfig::default(), None);
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
    assert!(hci.is_ready());

    let mut packet = vec![EVT_CONN_COMPLETE, 11, 0x00];
    packet.extend_from_slice(&HANDLE.to_le_bytes());
    packet.extend_from_slice(&addr.0);
    packet.extend_from_slice(&[0x01, 0x00]);
    hci.process_event(&packet);
    assert_eq!(hci.handle_for(&addr), Some(HANDLE));
    hci
}

/// Raw inbound ACL bytes (no H4 prefix) carrying one signaling command
fn signaling_acl(message: &SignalingMessage) -> Vec<u8> {
    let l2cap = L2capPacket::new(L2CAP_SIGNALING_CID, message.serialize());
    AclPacket::new(HANDLE, l2cap.to_bytes()).to_packet()[1..].to_vec()
}

/// Raw inbound ACL bytes (no H4 prefix) carrying data for a channel
fn data_acl(cid: u16, payload: &[u8]) -> Vec<u8> {
    let l2cap = L2capPacket::new(cid, payload.to_vec());
    AclPacket::new(HANDLE, l2cap.to_bytes()).to_packet()[1..].to_vec()
}

/// Decode a signaling command the layer queued for sending
fn sent_signaling(packet: &[u8]) -> SignalingMessage {
    assert_eq!(packet[0], HCI_ACL_PKT);
    let acl = AclPacket::parse(&packet[1..]).unwrap();
    let l2cap = L2capPacket::parse(&acl.data).unwrap();
    assert_eq!(l2cap.header.channel_id, L2CAP_SIGNALING_CID);
    SignalingMessage::parse(&l2cap.payload).unwrap()
}

fn drain_sent(hci: &mut HciLayer) -> Vec<Vec<u8>> {
    let mut transport = MockTransport::new();
    hci.pump_outbound(&mut transport).unwrap();
    transport.sent
}

/// Drive an outgoing channel to Open; returns its local CID
fn open_outgoing_channel(hci: &mut HciLayer, l2cap: &mut L2capLayer, psm: u16) -> ChannelId {
    let addr = test_addr();
    let cid = l2cap.start_connection(hci, addr, psm).unwrap();

    let sent = drain_sent(hci);
    match sent_signaling(&sent[0]) {
        SignalingMessage::ConnectionRequest {
            psm: sent_psm,
            source_cid,
            ..
        } => {
            assert_eq!(sent_psm, psm);
            assert_eq!(source_cid, cid);
        }
        other => panic!("expected ConnectionRequest, got {other:?}"),
    }

    // Peer accepts
    let events = l2cap.process_data(
        hci,
        &signaling_acl(&SignalingMessage::ConnectionResponse {
            identifier: 1,
            destination_cid: 0x0050,
            source_cid: cid,
            result: L2CAP_CONN_SUCCESS,
            status: 0,
        }),
    );
    assert!(events.is_empty());

    // Our configure request went out
    let sent = drain_sent(hci);
    assert!(matches!(
        sent_signaling(&sent[0]),
        SignalingMessage::ConfigureRequest { destination_cid: 0x0050, .. }
    ));

    // Peer configures us; we answer and the handshake completes with the
    // peer's response to our request
    let events = l2cap.process_data(
        hci,
        &signaling_acl(&SignalingMessage::ConfigureRequest {
            identifier: 7,
            destination_cid: cid,
            flags: 0,
            options: ConfigOptions {
                mtu: Some(512),
                flush_timeout: None,
            },
        }),
    );
    assert!(events.is_empty());

    let sent = drain_sent(hci);
    match sent_signaling(&sent[0]) {
        SignalingMessage::ConfigureResponse {
            identifier,
            source_cid,
            result,
            ..
        } => {
            assert_eq!(identifier, 7);
            assert_eq!(source_cid, 0x0050);
            assert_eq!(result, L2CAP_CONF_SUCCESS);
        }
        other => panic!("expected ConfigureResponse, got {other:?}"),
    }

    let events = l2cap.process_data(
        hci,
        &signaling_acl(&SignalingMessage::ConfigureResponse {
            identifier: 2,
            source_cid: cid,
            flags: 0,
            result: L2CAP_CONF_SUCCESS,
            options: ConfigOptions::default(),
        }),
    );
    assert_eq!(
        events,
        vec![ChannelEvent::Open {
            cid,
            addr,
            psm,
            initiator: true,
        }]
    );
    assert_eq!(
        l2cap.connection(cid).unwrap().state,
        L2capChannelState::Open
    );
    cid
}

#[test]
fn test_l2cap_header_roundtrip() {
    let header = L2capHeader::new(10, 0x0040);
    let bytes = header.to_bytes();
    let parsed = L2capHeader::parse(&bytes).unwrap();
    assert_eq!(parsed.length, 10);
    assert_eq!(parsed.channel_id, 0x0040);
}

#[test]
fn test_l2cap_packet_roundtrip() {
    let data = vec![1, 2, 3, 4];
    let packet = L2capPacket::new(0x0040, data.clone());
    assert_eq!(packet.header.length, 4);

    let bytes = packet.to_bytes();
    let parsed = L2capPacket::parse(&bytes).unwrap();
    assert_eq!(parsed.header.channel_id, 0x0040);
    assert_eq!(parsed.payload, data);

    // Truncated payload is rejected
    assert!(L2capPacket::parse(&bytes[..bytes.len() - 1]).is_none());
}

#[test]
fn test_signaling_connection_request_roundtrip() {
    let request = SignalingMessage::ConnectionRequest {
        identifier: 1,
        psm: PSM_SDP,
        source_cid: 0x0040,
    };
    assert_eq!(request.command_code(), L2CAP_CONNECTION_REQUEST);

    let bytes = request.serialize();
    let parsed = SignalingMessage::parse(&bytes).unwrap();
    assert_eq!(parsed, request);
}

#[test]
fn test_signaling_configure_request_roundtrip() {
    let request = SignalingMessage::ConfigureRequest {
        identifier: 2,
        destination_cid: 0x0041,
        flags: 0,
        options: ConfigOptions {
            mtu: Some(128),
            flush_timeout: None,
        },
    };

    let bytes = request.serialize();
    match SignalingMessage::parse(&bytes).unwrap() {
        SignalingMessage::ConfigureRequest {
            identifier,
            destination_cid,
            options,
            ..
        } => {
            assert_eq!(identifier, 2);
            assert_eq!(destination_cid, 0x0041);
            assert_eq!(options.mtu, Some(128));
        }
        other => panic!("expected ConfigureRequest, got {other:?}"),
    }
}

#[test]
fn test_signaling_rejects_short_input() {
    assert!(SignalingMessage::parse(&[]).is_err());
    assert!(SignalingMessage::parse(&[L2CAP_CONNECTION_REQUEST, 1]).is_err());
    // Header claims more parameters than present
    assert!(SignalingMessage::parse(&[L2CAP_CONNECTION_REQUEST, 1, 4, 0, 0x01]).is_err());
}

#[test]
fn test_outgoing_connection_reaches_open() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();
    open_outgoing_channel(&mut hci, &mut l2cap, PSM_SDP);
}

#[test]
fn test_start_connection_is_idempotent() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();
    let cid1 = l2cap.start_connection(&mut hci, test_addr(), PSM_SDP).unwrap();
    let cid2 = l2cap.start_connection(&mut hci, test_addr(), PSM_SDP).unwrap();
    assert_eq!(cid1, cid2);
}

#[test]
fn test_connection_parks_until_link_connects() {
    let addr = test_addr();
    // Link is up for the registry, but we use a fresh device with no link
    let mut hci = ready_hci_with_link(BdAddr([9; 6]));
    let mut l2cap = L2capLayer::new();

    let cid = l2cap.start_connection(&mut hci, addr, PSM_RFCOMM).unwrap();
    assert_eq!(
        l2cap.connection(cid).unwrap().state,
        L2capChannelState::WaitConnect
    );

    // No L2CAP signaling yet, only the HCI CreateConnection
    let sent = drain_sent(&mut hci);
    assert!(sent.iter().all(|p| p[0] != HCI_ACL_PKT));

    // Link comes up: the parked request goes out
    let events = l2cap.on_link_event(
        &mut hci,
        &LinkEvent::Connected {
            addr,
            handle: 0x0099,
        },
    );
    assert!(events.is_empty());
    assert_eq!(
        l2cap.connection(cid).unwrap().state,
        L2capChannelState::WaitConnectRsp
    );

    let sent = drain_sent(&mut hci);
    let signaling: Vec<&Vec<u8>> = sent.iter().filter(|p| p[0] == HCI_ACL_PKT).collect();
    assert_eq!(signaling.len(), 1);
    assert!(matches!(
        sent_signaling(signaling[0]),
        SignalingMessage::ConnectionRequest { psm: PSM_RFCOMM, .. }
    ));
}

#[test]
fn test_connection_refused_by_peer() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();
    let cid = l2cap.start_connection(&mut hci, test_addr(), PSM_SDP).unwrap();
    drain_sent(&mut hci);

    let events = l2cap.process_data(
        &mut hci,
        &signaling_acl(&SignalingMessage::ConnectionResponse {
            identifier: 1,
            destination_cid: 0,
            source_cid: cid,
            result: L2CAP_CONN_REFUSED_PSM,
            status: 0,
        }),
    );
    assert_eq!(
        events,
        vec![ChannelEvent::ConnectFailed {
            cid,
            addr: test_addr(),
            psm: PSM_SDP,
            result: L2CAP_CONN_REFUSED_PSM,
        }]
    );
    assert!(l2cap.connection(cid).is_none());
}

#[test]
fn test_incoming_connection_for_registered_psm() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();
    l2cap.register_psm(PSM_RFCOMM);

    let events = l2cap.process_data(
        &mut hci,
        &signaling_acl(&SignalingMessage::ConnectionRequest {
            identifier: 5,
            psm: PSM_RFCOMM,
            source_cid: 0x0070,
        }),
    );
    assert!(events.is_empty());

    let sent = drain_sent(&mut hci);
    let response = sent_signaling(&sent[0]);
    let local_cid = match response {
        SignalingMessage::ConnectionResponse {
            identifier,
            destination_cid,
            source_cid,
            result,
            ..
        } => {
            assert_eq!(identifier, 5);
            assert_eq!(source_cid, 0x0070);
            assert_eq!(result, L2CAP_CONN_SUCCESS);
            destination_cid
        }
        other => panic!("expected ConnectionResponse, got {other:?}"),
    };
    // And our own configure request follows
    assert!(matches!(
        sent_signaling(&sent[1]),
        SignalingMessage::ConfigureRequest { destination_cid: 0x0070, .. }
    ));
    assert_eq!(
        l2cap.connection(local_cid).unwrap().state,
        L2capChannelState::WaitConfig
    );
}

#[test]
fn test_incoming_connection_for_unknown_psm_is_refused() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();

    l2cap.process_data(
        &mut hci,
        &signaling_acl(&SignalingMessage::ConnectionRequest {
            identifier: 5,
            psm: 0x0019,
            source_cid: 0x0070,
        }),
    );

    let sent = drain_sent(&mut hci);
    assert!(matches!(
        sent_signaling(&sent[0]),
        SignalingMessage::ConnectionResponse {
            result: L2CAP_CONN_REFUSED_PSM,
            destination_cid: 0,
            ..
        }
    ));
}

#[test]
fn test_data_routing_to_open_channel() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();
    let cid = open_outgoing_channel(&mut hci, &mut l2cap, PSM_SDP);

    let events = l2cap.process_data(&mut hci, &data_acl(cid, &[0xDE, 0xAD]));
    assert_eq!(
        events,
        vec![ChannelEvent::Data {
            cid,
            addr: test_addr(),
            psm: PSM_SDP,
            payload: vec![0xDE, 0xAD],
        }]
    );

    // Data for a CID nobody owns is dropped
    let events = l2cap.process_data(&mut hci, &data_acl(0x0666, &[1]));
    assert!(events.is_empty());
}

#[test]
fn test_send_data_frames_for_remote_cid() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();
    let cid = open_outgoing_channel(&mut hci, &mut l2cap, PSM_SDP);

    l2cap.send_data(&mut hci, cid, &[9, 9, 9]).unwrap();
    let sent = drain_sent(&mut hci);
    let acl = AclPacket::parse(&sent[0][1..]).unwrap();
    let packet = L2capPacket::parse(&acl.data).unwrap();
    assert_eq!(packet.header.channel_id, 0x0050);
    assert_eq!(packet.header.length, 3);
    assert_eq!(packet.payload, vec![9, 9, 9]);

    // Closed channel rejects sends
    let bad = l2cap.send_data(&mut hci, 0x0666, &[1]);
    assert!(matches!(bad, Err(L2capError::ChannelNotFound)));
}

#[test]
fn test_echo_request_is_answered() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();

    l2cap.process_data(
        &mut hci,
        &signaling_acl(&SignalingMessage::EchoRequest {
            identifier: 9,
            data: vec![0xAA],
        }),
    );

    let sent = drain_sent(&mut hci);
    assert_eq!(
        sent_signaling(&sent[0]),
        SignalingMessage::EchoResponse {
            identifier: 9,
            data: vec![0xAA],
        }
    );
}

#[test]
fn test_information_request_is_answered() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();

    l2cap.process_data(
        &mut hci,
        &signaling_acl(&SignalingMessage::InformationRequest {
            identifier: 3,
            info_type: L2CAP_INFO_EXTENDED_FEATURES,
        }),
    );

    let sent = drain_sent(&mut hci);
    match sent_signaling(&sent[0]) {
        SignalingMessage::InformationResponse {
            identifier,
            info_type,
            result,
            data,
        } => {
            assert_eq!(identifier, 3);
            assert_eq!(info_type, L2CAP_INFO_EXTENDED_FEATURES);
            assert_eq!(result, L2CAP_INFO_SUCCESS);
            assert_eq!(data, vec![0, 0, 0, 0]);
        }
        other => panic!("expected InformationResponse, got {other:?}"),
    }
}

#[test]
fn test_remote_disconnect_closes_channel() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();
    let cid = open_outgoing_channel(&mut hci, &mut l2cap, PSM_SDP);

    let events = l2cap.process_data(
        &mut hci,
        &signaling_acl(&SignalingMessage::DisconnectionRequest {
            identifier: 4,
            destination_cid: cid,
            source_cid: 0x0050,
        }),
    );
    assert_eq!(
        events,
        vec![ChannelEvent::Closed {
            cid,
            addr: test_addr(),
            psm: PSM_SDP,
        }]
    );
    assert!(l2cap.connection(cid).is_none());

    let sent = drain_sent(&mut hci);
    assert!(matches!(
        sent_signaling(&sent[0]),
        SignalingMessage::DisconnectionResponse { identifier: 4, .. }
    ));
}

#[test]
fn test_hci_disconnect_deletes_connections() {
    let addr = test_addr();
    let mut hci = ready_hci_with_link(addr);
    let mut l2cap = L2capLayer::new();
    let cid = open_outgoing_channel(&mut hci, &mut l2cap, PSM_SDP);

    let events = l2cap.on_link_event(
        &mut hci,
        &LinkEvent::Disconnected {
            addr,
            handle: HANDLE,
            reason: 0x13,
        },
    );
    assert_eq!(
        events,
        vec![ChannelEvent::Closed {
            cid,
            addr,
            psm: PSM_SDP,
        }]
    );
    assert!(l2cap.connection(cid).is_none());
}

#[test]
fn test_two_signaling_commands_in_one_packet() {
    let mut hci = ready_hci_with_link(test_addr());
    let mut l2cap = L2capLayer::new();

    let mut payload = SignalingMessage::EchoRequest {
        identifier: 1,
        data: vec![],
    }
    .serialize();
    payload.extend_from_slice(
        &SignalingMessage::InformationRequest {
            identifier: 2,
            info_type: L2CAP_INFO_EXTENDED_FEATURES,
        }
        .serialize(),
    );
    let l2 = L2capPacket::new(L2CAP_SIGNALING_CID, payload);
    let acl = AclPacket::new(HANDLE, l2.to_bytes()).to_packet()[1..].to_vec();

    l2cap.process_data(&mut hci, &acl);
    let sent = drain_sent(&mut hci);
    assert_eq!(sent.len(), 2);
    assert!(matches!(
        sent_signaling(&sent[0]),
        SignalingMessage::EchoResponse { identifier: 1, .. }
    ));
    assert!(matches!(
        sent_signaling(&sent[1]),
        SignalingMessage::InformationResponse { identifier: 2, .. }
    ));
}
