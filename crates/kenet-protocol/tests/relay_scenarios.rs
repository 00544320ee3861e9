/// Relay scenarios driven through `RelaySession` directly.
///
/// Frames produced by one session are encoded and fed to the next, the
/// way the link would carry them. Layout used throughout (one degree of
/// latitude is ~111 km):
///
///   A (0.0, 0) ── C (0.5, 0) ── B (1.0, 0)
use std::sync::Arc;

use kenet_metrics::RelayStats;
use kenet_protocol::{
    DedupGuard, DeliveryStatus, DiscoveryPayload, DropReason, GeoPoint, KenetError, KeyPair,
    LocalIdentity, MessagePayload, NodeId, Packet, PacketKind, RelayEvent, RelaySession, RuntimeConfig,
    RuntimeEffect, SendHint, StaticConnectivity,
};
use kenet_protocol::types::FLOOD_TTL;

// ── Harness ─────────────────────────────────────────────────────────────

fn node(name: &str, lat: f32, lng: f32) -> RelaySession {
    node_with(name, lat, lng, false, RuntimeConfig::default())
}

fn node_with(name: &str, lat: f32, lng: f32, online: bool, config: RuntimeConfig) -> RelaySession {
    let identity = LocalIdentity {
        id: NodeId::new(name),
        position: GeoPoint::new(lat, lng),
        keys: KeyPair::generate(),
    };
    RelaySession::new(
        identity,
        config,
        Arc::new(StaticConnectivity::new(online)),
        Arc::new(DedupGuard::default()),
        Arc::new(RelayStats::default()),
    )
}

fn sent(effects: &[RuntimeEffect]) -> Vec<(Packet, SendHint)> {
    effects
        .iter()
        .filter_map(|e| match e {
            RuntimeEffect::Send { packet, hint } => Some((packet.clone(), hint.clone())),
            _ => None,
        })
        .collect()
}

fn frames(effects: &[RuntimeEffect]) -> Vec<Vec<u8>> {
    sent(effects)
        .into_iter()
        .map(|(p, _)| p.encode().unwrap())
        .collect()
}

fn events(effects: &[RuntimeEffect]) -> Vec<RelayEvent> {
    effects
        .iter()
        .filter_map(|e| match e {
            RuntimeEffect::Emit(ev) => Some(ev.clone()),
            _ => None,
        })
        .collect()
}

/// Feed every frame to `to`, collecting the effects.
fn deliver(frames: Vec<Vec<u8>>, to: &mut RelaySession) -> Vec<RuntimeEffect> {
    frames.iter().flat_map(|f| to.handle_frame(f)).collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[test]
fn message_crosses_a_dead_end_and_ack_flows_back() {
    init_tracing();
    let mut a = node("alice", 0.0, 0.0);
    let mut c = node("carol", 0.5, 0.0);
    let mut b = node("bob", 1.0, 0.0);
    let b_id = b.local_id().clone();

    // A hears C's beacon; A already knows where B lives.
    deliver(frames(&c.hello_beacon()), &mut a);
    a.remember_contact(b_id.clone(), b.position());

    let (msg_id, effects) = a.send_message(b_id.clone(), &b.public_key(), b"merhaba").unwrap();
    let out = sent(&effects);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, SendHint::Toward(NodeId::new("carol")));
    assert!(effects
        .iter()
        .any(|e| matches!(e, RuntimeEffect::StoreOutbound { packet_id, .. } if *packet_id == msg_id)));
    assert_eq!(a.tracker().status(&msg_id), Some(DeliveryStatus::Forwarded));

    // C is a local maximum: no neighbor closer to B than itself.
    let at_c = deliver(frames(&effects), &mut c);
    assert!(sent(&at_c).is_empty());
    assert_eq!(c.held_count(), 1);
    assert!(events(&at_c)
        .iter()
        .any(|e| matches!(e, RelayEvent::Held { key } if key.id == msg_id)));

    // B comes into range: its beacon opens the route and releases the message.
    let released = deliver(frames(&b.hello_beacon()), &mut c);
    let out = sent(&released);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, SendHint::Toward(b_id.clone()));
    assert_eq!(out[0].0.ttl(), kenet_protocol::types::MESSAGE_TTL - 1);
    assert_eq!(c.held_count(), 0);

    // B opens it, stores it, and acks.
    let at_b = deliver(frames(&released), &mut b);
    assert!(events(&at_b).iter().any(|e| matches!(
        e,
        RelayEvent::MessageReceived { packet_id, plaintext, .. }
            if *packet_id == msg_id && plaintext.as_slice() == b"merhaba"
    )));
    assert!(at_b
        .iter()
        .any(|e| matches!(e, RuntimeEffect::StoreInbound { sender, .. } if sender.as_str() == "alice")));
    let acks = sent(&at_b);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].0.kind(), PacketKind::Ack);
    assert_eq!(acks[0].0.packet_id(), msg_id);

    // The ack goes back through C to A.
    let at_c = deliver(frames(&at_b), &mut c);
    let ack_frames = frames(&at_c);
    assert_eq!(ack_frames.len(), 1);

    let at_a = deliver(ack_frames.clone(), &mut a);
    assert!(at_a
        .iter()
        .any(|e| matches!(e, RuntimeEffect::MarkDelivered(id) if *id == msg_id)));
    assert!(events(&at_a)
        .iter()
        .any(|e| matches!(e, RelayEvent::DeliveryConfirmed { packet_id } if *packet_id == msg_id)));
    assert!(a.tracker().is_delivered(&msg_id));

    // A duplicate ack changes nothing.
    assert!(deliver(ack_frames, &mut a).is_empty());
    assert_eq!(a.stats().snapshot().acks_confirmed, 1);
}

#[test]
fn discovery_is_answered_and_location_learned() {
    let mut a = node("alice", 0.0, 0.0);
    let mut c = node("carol", 0.5, 0.0);
    let mut b = node("bob", 1.0, 0.0);

    let discovery = a.discover(NodeId::new("BOB"));
    let flooded = deliver(frames(&discovery), &mut c);
    let out = sent(&flooded);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, SendHint::Flood);
    assert_eq!(out[0].0.ttl(), kenet_protocol::types::FLOOD_TTL - 1);

    let at_b = deliver(frames(&flooded), &mut b);
    let replies = sent(&at_b);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0.kind(), PacketKind::Reply);
    assert_eq!(replies[0].0.packet_id(), sent(&discovery)[0].0.packet_id());
    assert!(b.neighbors().get(&NodeId::new("alice")).is_some());

    let back = deliver(frames(&at_b), &mut c);
    let at_a = deliver(frames(&back), &mut a);
    assert!(at_a.iter().any(|e| matches!(
        e,
        RuntimeEffect::UpdateContactLocation { peer, position }
            if peer.as_str() == "bob" && *position == GeoPoint::new(1.0, 0.0)
    )));
    assert!(events(&at_a)
        .iter()
        .any(|e| matches!(e, RelayEvent::LocationLearned { peer, .. } if peer.as_str() == "bob")));
    assert_eq!(
        a.contact_location(&NodeId::new("bob")),
        Some(GeoPoint::new(1.0, 0.0))
    );
}

#[test]
fn unlocated_recipient_is_held_then_released_by_reply() {
    let mut a = node("alice", 0.0, 0.0);
    let mut c = node("carol", 0.5, 0.0);
    let b = node("bob", 1.0, 0.0);
    deliver(frames(&c.hello_beacon()), &mut a);

    let (msg_id, effects) = a
        .send_message(b.local_id().clone(), &b.public_key(), b"hi")
        .unwrap();
    let out = sent(&effects);
    assert_eq!(out.len(), 1, "only the discovery goes out");
    assert_eq!(out[0].0.kind(), PacketKind::Discovery);
    assert_eq!(a.tracker().status(&msg_id), Some(DeliveryStatus::Held));
    assert_eq!(a.held_count(), 1);

    let discovery = match &out[0].0 {
        Packet::Discovery(d) => d.clone(),
        other => panic!("expected discovery, got {other:?}"),
    };
    let reply = discovery.reply_from(b.local_id().clone(), b.position(), FLOOD_TTL);
    let released = a.handle_packet(Packet::Reply(reply));
    let out = sent(&released);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, SendHint::Toward(NodeId::new("carol")));
    assert_eq!(out[0].0.routing_target(), Some(b.position()));
    assert_eq!(a.tracker().status(&msg_id), Some(DeliveryStatus::Forwarded));
    assert_eq!(a.held_count(), 0);
}

#[test]
fn duplicate_frames_are_processed_once() {
    let mut a = node("alice", 0.0, 0.0);
    let mut c = node("carol", 0.5, 0.0);
    let frame = frames(&a.discover(NodeId::new("bob"))).remove(0);

    assert_eq!(sent(&c.handle_frame(&frame)).len(), 1);
    assert!(c.handle_frame(&frame).is_empty());
    let stats = c.stats().snapshot();
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.forwarded, 1);
}

#[test]
fn own_packets_echoed_back_are_ignored() {
    let mut a = node("alice", 0.0, 0.0);
    let frame = frames(&a.discover(NodeId::new("bob"))).remove(0);
    assert!(a.handle_frame(&frame).is_empty());
}

#[test]
fn reply_for_someone_else_is_flooded_on() {
    let mut c = node("carol", 0.5, 0.0);
    let discovery =
        DiscoveryPayload::new(NodeId::new("alice"), GeoPoint::new(0.0, 0.0), NodeId::new("bob"), 5);
    let reply = discovery.reply_from(NodeId::new("bob"), GeoPoint::new(1.0, 0.0), 4);

    let effects = c.handle_packet(Packet::Reply(reply.clone()));
    let out = sent(&effects);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, SendHint::Flood);
    match &out[0].0 {
        Packet::Reply(r) => {
            assert_eq!(r.packet_id, reply.packet_id);
            assert_eq!(r.ttl, 3);
        }
        other => panic!("expected reply, got {other:?}"),
    }
    assert!(!events(&effects)
        .iter()
        .any(|e| matches!(e, RelayEvent::LocationLearned { .. })));
}

#[test]
fn exhausted_reply_is_dropped() {
    let mut c = node("carol", 0.5, 0.0);
    let discovery =
        DiscoveryPayload::new(NodeId::new("alice"), GeoPoint::new(0.0, 0.0), NodeId::new("bob"), 5);
    let reply = discovery.reply_from(NodeId::new("bob"), GeoPoint::new(1.0, 0.0), 0);

    let effects = c.handle_packet(Packet::Reply(reply));
    assert!(sent(&effects).is_empty());
    assert!(events(&effects).iter().any(|e| matches!(
        e,
        RelayEvent::Dropped { reason: DropReason::TtlExpired, kind: Some(PacketKind::Reply), .. }
    )));
    assert_eq!(c.stats().snapshot().ttl_expired, 1);
}

#[test]
fn message_past_the_tracker_limit_is_refused() {
    let config = RuntimeConfig {
        tracker_capacity: 1,
        ..RuntimeConfig::default()
    };
    let mut a = node_with("alice", 0.0, 0.0, false, config);
    let b = node("bob", 1.0, 0.0);

    a.send_message(b.local_id().clone(), &b.public_key(), b"bir").unwrap();
    let err = a
        .send_message(b.local_id().clone(), &b.public_key(), b"iki")
        .unwrap_err();
    assert!(matches!(err, KenetError::TrackerFull(1)));
    assert_eq!(a.tracker().len(), 1);
}

#[test]
fn exhausted_discovery_is_not_flooded() {
    let mut c = node("carol", 0.5, 0.0);
    let discovery =
        DiscoveryPayload::new(NodeId::new("alice"), GeoPoint::new(0.0, 0.0), NodeId::new("bob"), 0);

    let effects = c.handle_packet(Packet::Discovery(discovery));
    assert!(sent(&effects).is_empty());
    assert!(events(&effects).iter().any(|e| matches!(
        e,
        RelayEvent::Dropped { reason: DropReason::TtlExpired, .. }
    )));
    assert_eq!(c.stats().snapshot().ttl_expired, 1);
}

#[test]
fn exhausted_message_is_still_delivered_at_target() {
    let a = node("alice", 0.0, 0.0);
    let mut b = node("bob", 1.0, 0.0);
    let sealed = kenet_protocol::crypto::seal(b"last hop", &b.public_key()).unwrap();
    let msg = MessagePayload::new(
        a.local_id().clone(),
        a.position(),
        b.local_id().clone(),
        b.position(),
        sealed,
        0,
    );

    let effects = b.handle_packet(Packet::Message(msg));
    assert!(events(&effects)
        .iter()
        .any(|e| matches!(e, RelayEvent::MessageReceived { .. })));
}

#[test]
fn exhausted_message_in_transit_is_dropped() {
    let mut c = node("carol", 0.5, 0.0);
    let b = node("bob", 1.0, 0.0);
    let sealed = kenet_protocol::crypto::seal(b"x", &b.public_key()).unwrap();
    let msg = MessagePayload::new(
        NodeId::new("alice"),
        GeoPoint::new(0.0, 0.0),
        b.local_id().clone(),
        b.position(),
        sealed,
        0,
    );

    let effects = c.handle_packet(Packet::Message(msg));
    assert!(sent(&effects).is_empty());
    assert_eq!(c.held_count(), 0);
    assert_eq!(c.stats().snapshot().ttl_expired, 1);
}

#[test]
fn undecryptable_message_is_dropped_without_ack() {
    let mut b = node("bob", 1.0, 0.0);
    let eve = KeyPair::generate();
    let sealed = kenet_protocol::crypto::seal(b"not for bob", &eve.public_key()).unwrap();
    let msg = MessagePayload::new(
        NodeId::new("alice"),
        GeoPoint::new(0.0, 0.0),
        b.local_id().clone(),
        b.position(),
        sealed,
        kenet_protocol::types::MESSAGE_TTL,
    );

    let effects = b.handle_packet(Packet::Message(msg));
    assert!(sent(&effects).is_empty());
    assert!(!effects
        .iter()
        .any(|e| matches!(e, RuntimeEffect::StoreInbound { .. })));
    assert!(events(&effects).iter().any(|e| matches!(
        e,
        RelayEvent::Dropped { reason: DropReason::DecryptFailed(_), .. }
    )));
    assert_eq!(b.stats().snapshot().decrypt_failures, 1);
}

#[test]
fn missing_crypto_fields_count_as_decrypt_failure() {
    let mut b = node("bob", 1.0, 0.0);
    let sealed = kenet_protocol::crypto::seal(b"x", &b.public_key()).unwrap();
    let mut msg = MessagePayload::new(
        NodeId::new("alice"),
        GeoPoint::new(0.0, 0.0),
        b.local_id().clone(),
        b.position(),
        sealed,
        kenet_protocol::types::MESSAGE_TTL,
    );
    msg.integrity_tag.clear();

    let frame = Packet::Message(msg).encode().unwrap();
    let effects = b.handle_frame(&frame);
    assert!(sent(&effects).is_empty());
    assert_eq!(b.stats().snapshot().decrypt_failures, 1);
}

#[test]
fn hello_beacon_updates_neighbors_and_is_not_reflooded() {
    let mut a = node("alice", 0.0, 0.0);
    let mut c = node("carol", 0.5, 0.0);

    let beacon = a.hello_beacon();
    let out = sent(&beacon);
    assert_eq!(out[0].0.ttl(), kenet_protocol::types::BEACON_TTL);

    let effects = deliver(frames(&beacon), &mut c);
    assert!(sent(&effects).is_empty());
    assert_eq!(
        c.neighbors().get(&NodeId::new("alice")).map(|r| r.position),
        Some(GeoPoint::new(0.0, 0.0))
    );
    assert!(events(&effects)
        .iter()
        .any(|e| matches!(e, RelayEvent::NeighborUpdated { peer, .. } if peer.as_str() == "alice")));
}

#[test]
fn gateway_packet_is_bridged_when_online() {
    let server = KeyPair::generate();
    let config = RuntimeConfig {
        gateway_public_key: Some(server.public_key()),
        ..RuntimeConfig::default()
    };
    let mut a = node_with("alice", 0.0, 0.0, false, config);
    let mut online = node_with("carol", 0.5, 0.0, true, RuntimeConfig::default());
    let mut offline = node("dave", 0.5, 0.0);

    let (sms_id, effects) = a.send_gateway_sms("+905551112233".into(), "selam").unwrap();
    let out = sent(&effects);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, SendHint::Flood);
    let frame = out[0].0.encode().unwrap();

    let bridged = online.handle_frame(&frame);
    let handoff = bridged
        .iter()
        .find_map(|e| match e {
            RuntimeEffect::GatewayHandoff(p) => Some(p.clone()),
            _ => None,
        })
        .expect("handoff");
    assert_eq!(handoff.packet_id, sms_id);
    assert_eq!(handoff.target_phone, "+905551112233");
    let text = kenet_protocol::crypto::open(
        &handoff.encrypted_payload,
        &handoff.integrity_tag,
        &handoff.nonce,
        &handoff.ephemeral_public_key,
        &server,
    )
    .unwrap();
    assert_eq!(text, b"selam");
    assert!(sent(&bridged).is_empty());

    let flooded = offline.handle_frame(&frame);
    let out = sent(&flooded);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, SendHint::Flood);
    assert_eq!(out[0].0.ttl(), kenet_protocol::types::GATEWAY_TTL - 1);
}

#[test]
fn gateway_sms_without_server_key_is_a_config_error() {
    let mut a = node("alice", 0.0, 0.0);
    let err = a.send_gateway_sms("+90".into(), "x").unwrap_err();
    assert!(matches!(err, kenet_protocol::KenetError::Config(_)));
}

#[test]
fn garbage_frame_is_counted_and_dropped() {
    let mut c = node("carol", 0.5, 0.0);
    let effects = c.handle_frame(&[0xff, 0x00, 0x01]);
    assert!(sent(&effects).is_empty());
    assert!(events(&effects).iter().any(|e| matches!(
        e,
        RelayEvent::Dropped { reason: DropReason::Malformed(_), .. }
    )));
    assert_eq!(c.stats().snapshot().decode_errors, 1);
}

#[test]
fn held_packets_expire_on_cleanup() {
    let mut c = node("carol", 0.5, 0.0);
    let b = node("bob", 1.0, 0.0);
    let sealed = kenet_protocol::crypto::seal(b"x", &b.public_key()).unwrap();
    let msg = MessagePayload::new(
        NodeId::new("alice"),
        GeoPoint::new(0.0, 0.0),
        b.local_id().clone(),
        b.position(),
        sealed,
        kenet_protocol::types::MESSAGE_TTL,
    );
    c.handle_packet(Packet::Message(msg));
    assert_eq!(c.held_count(), 1);

    let later = kenet_protocol::now_ms() + 2 * 60 * 60 * 1000;
    let effects = c.tick_cleanup(later);
    assert!(events(&effects).iter().any(|e| matches!(
        e,
        RelayEvent::Dropped { reason: DropReason::HoldExpired, .. }
    )));
    assert_eq!(c.held_count(), 0);
    // The stale neighbor went with it.
    assert!(c.neighbors().is_empty());
}

#[test]
fn moving_closer_releases_held_packets() {
    let mut c = node("carol", 0.5, 0.0);
    let b = node("bob", 1.0, 0.0);
    // D is between A and C, so it only helps once C moves west of it.
    let mut d = node("dave", 0.2, 0.0);
    deliver(frames(&d.hello_beacon()), &mut c);

    let sealed = kenet_protocol::crypto::seal(b"x", &b.public_key()).unwrap();
    let msg = MessagePayload::new(
        NodeId::new("alice"),
        GeoPoint::new(-1.0, 0.0),
        b.local_id().clone(),
        b.position(),
        sealed,
        kenet_protocol::types::MESSAGE_TTL,
    );
    c.handle_packet(Packet::Message(msg));
    assert_eq!(c.held_count(), 1);

    let effects = c.set_position(GeoPoint::new(0.0, 0.0));
    let out = sent(&effects);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1, SendHint::Toward(NodeId::new("dave")));
}

#[test]
fn node_ids_match_regardless_of_case() {
    let mut a = node("Alice", 0.0, 0.0);
    let mut b = node("bob", 1.0, 0.0);
    let discovery = a.discover(NodeId::new("BOB"));
    let at_b = deliver(frames(&discovery), &mut b);
    assert_eq!(sent(&at_b)[0].0.kind(), PacketKind::Reply);
}
