//! End-to-end protocol exchanges between hand-driven nodes

use binmesh_core::mesh::{
    Ack, CapacityAlert, MeshError, Node, NodeAnnounce, NodeConfig, NodeEvent, NodeId, Packet, SimRadio,
};
use std::time::{Duration, Instant};

fn n(id: u8) -> NodeId {
    NodeId::new(id)
}

fn node(id: u8) -> Node {
    Node::new(NodeConfig::new(n(id))).unwrap()
}

fn decode_all(node: &Node, frames: &[Vec<u8>]) -> Vec<Packet> {
    frames.iter().map(|f| node.codec().decode(f).unwrap()).collect()
}

/// Teach `node` a forward node without going over the air
fn learn(node: &mut Node, radio: &mut SimRadio, forward: u8, now: Instant) {
    node.handle_packet(radio, Packet::ForwardNodeResponse(NodeAnnounce::new(n(forward))), now);
}

#[test]
fn test_alert_relay_and_ack_chain() {
    let now = Instant::now();
    let mut root = Node::new(NodeConfig::root()).unwrap();
    let mut relay = node(1);
    let mut origin = node(2);
    let (mut root_radio, mut relay_radio, mut origin_radio) = (SimRadio::new(), SimRadio::new(), SimRadio::new());

    // Origin knows the relay; the relay knows nothing yet
    learn(&mut origin, &mut origin_radio, 1, now);
    origin.update_capacity(&mut origin_radio, 85, now);
    let frames = origin_radio.take_sent();
    assert_eq!(
        decode_all(&origin, &frames),
        vec![Packet::CapacityAlert(CapacityAlert::new(n(2), n(2), n(1), 85))]
    );

    // Relay takes custody without a route: origin is released, discovery goes out
    relay.handle_frame(&mut relay_radio, &frames[0], now).unwrap();
    assert_eq!(relay.queue().pending_count(), 1);
    let frames = relay_radio.take_sent();
    assert_eq!(
        decode_all(&relay, &frames),
        vec![
            Packet::Ack(Ack::succeed(n(2), n(2))),
            Packet::ForwardNodeRequest(NodeAnnounce::new(n(1))),
        ]
    );

    origin.handle_frame(&mut origin_radio, &frames[0], now).unwrap();
    assert!(origin.queue().is_empty());
    assert!(origin.take_events().contains(&NodeEvent::AlertAcknowledged {
        alert_node: n(2),
        next_hop: n(1),
    }));

    // Relay learns the root and forwards on the next service pass
    learn(&mut relay, &mut relay_radio, 0, now);
    relay.service(&mut relay_radio, now);
    let frames = relay_radio.take_sent();
    assert_eq!(
        decode_all(&relay, &frames),
        vec![Packet::CapacityAlert(CapacityAlert::new(n(2), n(1), NodeId::ROOT, 85))]
    );
    assert!(relay.queue().iter().all(|e| e.is_awaiting_ack()));

    // Root consumes and acknowledges the relay
    root.handle_frame(&mut root_radio, &frames[0], now).unwrap();
    let root_events = root.take_events();
    assert!(root_events.contains(&NodeEvent::AlertDelivered {
        alert_node: n(2),
        from: n(1),
        bin_capacity: 85,
    }));
    let frames = root_radio.take_sent();
    assert_eq!(decode_all(&root, &frames), vec![Packet::Ack(Ack::succeed(n(2), n(1)))]);

    // Relay drops its copy; the origin was already released
    relay.handle_frame(&mut relay_radio, &frames[0], now).unwrap();
    assert!(relay.queue().is_empty());
    assert!(relay_radio.sent().is_empty());
    assert_eq!(origin.stats().alerts_forwarded, 1);
}

#[test]
fn test_failure_with_single_route_gives_up() {
    let now = Instant::now();
    let mut relay = node(1);
    let mut radio = SimRadio::new();
    learn(&mut relay, &mut radio, 0, now);
    relay.handle_packet(&mut radio, Packet::CapacityAlert(CapacityAlert::new(n(2), n(2), n(1), 90)), now);
    radio.take_sent();

    relay.handle_packet(&mut radio, Packet::Ack(Ack::failure(n(2), n(1))), now);

    assert!(relay.queue().is_empty());
    assert_eq!(relay.stats().alerts_failed, 1);
    // Custody was acked on receipt; the failure stays local
    assert!(radio.sent().is_empty());
    assert!(relay.take_events().iter().any(|e| matches!(
        e,
        NodeEvent::AlertFailed { alert_node, reason: MeshError::AckFailure(hop) }
            if *alert_node == n(2) && *hop == NodeId::ROOT
    )));
}

#[test]
fn test_failure_retries_once_via_alternate() {
    let now = Instant::now();
    let mut relay = node(1);
    let mut radio = SimRadio::new();
    learn(&mut relay, &mut radio, 0, now);
    learn(&mut relay, &mut radio, 5, now);
    relay.handle_packet(&mut radio, Packet::CapacityAlert(CapacityAlert::new(n(2), n(2), n(1), 90)), now);
    radio.take_sent();

    relay.handle_packet(&mut radio, Packet::Ack(Ack::failure(n(2), n(1))), now);
    assert_eq!(
        decode_all(&relay, &radio.take_sent()),
        vec![Packet::CapacityAlert(CapacityAlert::new(n(2), n(1), n(5), 90))]
    );
    assert_eq!(relay.queue().len(), 1);

    // Second failure: retry already spent
    relay.handle_packet(&mut radio, Packet::Ack(Ack::failure(n(2), n(1))), now);
    assert!(relay.queue().is_empty());
    assert_eq!(relay.stats().alerts_failed, 1);
}

#[test]
fn test_redelivered_ack_is_noop() {
    let now = Instant::now();
    let mut relay = node(1);
    let mut radio = SimRadio::new();
    learn(&mut relay, &mut radio, 0, now);
    relay.handle_packet(&mut radio, Packet::CapacityAlert(CapacityAlert::new(n(2), n(2), n(1), 90)), now);
    relay.handle_packet(&mut radio, Packet::Ack(Ack::succeed(n(2), n(1))), now);
    radio.take_sent();
    let stats_before = relay.stats().alerts_acknowledged;

    relay.handle_packet(&mut radio, Packet::Ack(Ack::succeed(n(2), n(1))), now);

    assert!(relay.queue().is_empty());
    assert!(radio.sent().is_empty());
    assert_eq!(relay.stats().alerts_acknowledged, stats_before);
    assert_eq!(relay.stats().acks_unmatched, 1);
}

#[test]
fn test_ack_for_other_node_ignored() {
    let now = Instant::now();
    let mut relay = node(1);
    let mut radio = SimRadio::new();
    learn(&mut relay, &mut radio, 0, now);
    relay.handle_packet(&mut radio, Packet::CapacityAlert(CapacityAlert::new(n(2), n(2), n(1), 90)), now);

    relay.handle_packet(&mut radio, Packet::Ack(Ack::succeed(n(2), n(7))), now);

    assert_eq!(relay.queue().len(), 1);
    assert_eq!(relay.stats().acks_received, 0);
}

#[test]
fn test_full_queue_drops_incoming_alert() {
    let now = Instant::now();
    let mut relay = Node::new(NodeConfig::new(n(1)).with_max_capacity_packets(2)).unwrap();
    let mut radio = SimRadio::new();

    for origin in 2..5 {
        relay.handle_packet(
            &mut radio,
            Packet::CapacityAlert(CapacityAlert::new(n(origin), n(origin), n(1), 90)),
            now,
        );
    }

    assert_eq!(relay.queue().len(), 2);
    assert_eq!(relay.stats().alerts_dropped, 1);
    let origins: Vec<_> = relay.queue().iter().map(|e| e.alert.alert_node()).collect();
    assert_eq!(origins, vec![n(2), n(3)]);
    assert!(relay
        .take_events()
        .contains(&NodeEvent::AlertDropped { alert_node: n(4) }));
}

#[test]
fn test_relay_never_sends_back_upstream() {
    let now = Instant::now();
    let mut relay = node(2);
    let mut radio = SimRadio::new();
    // Upstream neighbor was learned first
    learn(&mut relay, &mut radio, 3, now);
    learn(&mut relay, &mut radio, 1, now);

    relay.handle_packet(&mut radio, Packet::CapacityAlert(CapacityAlert::new(n(3), n(3), n(2), 95)), now);

    assert_eq!(
        decode_all(&relay, &radio.take_sent()),
        vec![
            Packet::Ack(Ack::succeed(n(3), n(3))),
            Packet::CapacityAlert(CapacityAlert::new(n(3), n(2), n(1), 95)),
        ]
    );
}

#[test]
fn test_timeout_retries_alternate_then_fails() {
    let start = Instant::now();
    let config = NodeConfig::new(n(1)).with_ack_timeout(Duration::from_secs(10));
    let mut relay = Node::new(config).unwrap();
    let mut radio = SimRadio::new();
    learn(&mut relay, &mut radio, 0, start);
    learn(&mut relay, &mut radio, 4, start);
    relay.handle_packet(&mut radio, Packet::CapacityAlert(CapacityAlert::new(n(2), n(2), n(1), 90)), start);
    radio.take_sent();

    relay.service(&mut radio, start + Duration::from_secs(11));
    assert!(decode_all(&relay, &radio.take_sent())
        .contains(&Packet::CapacityAlert(CapacityAlert::new(n(2), n(1), n(4), 90))));

    relay.service(&mut radio, start + Duration::from_secs(22));
    assert!(relay.queue().is_empty());
    assert_eq!(relay.stats().alerts_failed, 1);
}

#[test]
fn test_root_local_alert_is_delivered_in_place() {
    let mut root = Node::new(NodeConfig::root()).unwrap();
    let mut radio = SimRadio::new();

    let events = root.poll(&mut radio, &mut 95u8, Instant::now());

    assert!(events.contains(&NodeEvent::AlertDelivered {
        alert_node: NodeId::ROOT,
        from: NodeId::ROOT,
        bin_capacity: 95,
    }));
    assert!(root.queue().is_empty());
    assert!(radio.sent().is_empty());
}

#[test]
fn test_late_route_at_relay_delivers_once() {
    let start = Instant::now();
    let mut root = Node::new(NodeConfig::root()).unwrap();
    let mut relay = node(1);
    let mut other_relay = node(3);
    let mut origin = node(2);
    let (mut root_radio, mut relay_radio, mut other_radio, mut origin_radio) =
        (SimRadio::new(), SimRadio::new(), SimRadio::new(), SimRadio::new());

    learn(&mut origin, &mut origin_radio, 1, start);
    learn(&mut origin, &mut origin_radio, 3, start);
    learn(&mut other_relay, &mut other_radio, 0, start);

    // Origin hands the alert to the relay, which has no route yet
    origin.update_capacity(&mut origin_radio, 90, start);
    let frames = origin_radio.take_sent();
    relay.handle_frame(&mut relay_radio, &frames[0], start).unwrap();
    assert_eq!(relay.queue().pending_count(), 1);
    for frame in relay_radio.take_sent() {
        origin.handle_frame(&mut origin_radio, &frame, start).unwrap();
    }

    // Past the ack timeout the origin has nothing left to retry
    let later = start + Duration::from_secs(31);
    origin.service(&mut origin_radio, later);
    assert!(origin.queue().is_empty());
    assert!(origin_radio
        .take_sent()
        .iter()
        .all(|f| !matches!(origin.codec().decode(f), Ok(Packet::CapacityAlert(_)))));
    assert!(other_relay.queue().is_empty());

    // The relay's route shows up late and the alert goes through once
    let late = start + Duration::from_secs(35);
    learn(&mut relay, &mut relay_radio, 0, late);
    relay.service(&mut relay_radio, late);
    for frame in relay_radio.take_sent() {
        let _ = root.handle_frame(&mut root_radio, &frame, late);
    }

    assert_eq!(root.stats().alerts_delivered, 1);
    assert_eq!(origin.stats().alerts_forwarded, 1);
    assert_eq!(origin.stats().alerts_failed, 0);
}
