use kenet_protocol::{
    crypto, AckPayload, DecodeError, DiscoveryPayload, GatewayPayload, GeoPoint, KeyPair,
    MessagePayload, NodeId, Packet,
};
use proptest::prelude::*;

fn arb_node_id() -> impl Strategy<Value = NodeId> {
    "[a-z0-9_-]{1,24}".prop_map(|s| NodeId::new(&s))
}

fn arb_position() -> impl Strategy<Value = GeoPoint> {
    (-90.0f32..90.0, -180.0f32..180.0).prop_map(|(lat, lng)| GeoPoint::new(lat, lng))
}

/// Strategy covering every packet kind.
fn arb_packet() -> impl Strategy<Value = Packet> {
    let discovery = (arb_node_id(), arb_position(), arb_node_id(), 0..70u32)
        .prop_map(|(s, pos, t, ttl)| Packet::Discovery(DiscoveryPayload::new(s, pos, t, ttl)));

    let reply = (arb_node_id(), arb_position(), arb_node_id(), arb_position(), 0..70u32)
        .prop_map(|(s, s_pos, me, my_pos, ttl)| {
            let discovery = DiscoveryPayload::new(s, s_pos, me.clone(), 64);
            Packet::Reply(discovery.reply_from(me, my_pos, ttl))
        });

    let message = (
        arb_node_id(),
        arb_position(),
        arb_node_id(),
        arb_position(),
        prop::collection::vec(any::<u8>(), 0..2048),
        0..16u32,
    )
        .prop_map(|(s, s_pos, t, t_pos, body, ttl)| {
            let keys = KeyPair::from_secret_bytes([7u8; 32]);
            let sealed = crypto::seal(&body, &keys.public_key()).expect("seal");
            Packet::Message(MessagePayload::new(s, s_pos, t, t_pos, sealed, ttl))
        });

    let ack = (arb_node_id(), arb_position(), arb_node_id(), arb_position(), 0..16u32).prop_map(
        |(s, s_pos, me, my_pos, ttl)| {
            let keys = KeyPair::from_secret_bytes([8u8; 32]);
            let sealed = crypto::seal(b"ok", &keys.public_key()).expect("seal");
            let msg = MessagePayload::new(s, s_pos, me.clone(), my_pos, sealed, 10);
            let ack: AckPayload = msg.ack_from(me, my_pos, ttl);
            Packet::Ack(ack)
        },
    );

    let gateway = (arb_node_id(), "\\+[0-9]{6,15}", "[ -~]{0,160}").prop_map(|(s, phone, text)| {
        let server = KeyPair::from_secret_bytes([9u8; 32]);
        let sealed = crypto::seal(text.as_bytes(), &server.public_key()).expect("seal");
        Packet::GatewayRelay(GatewayPayload::new(s, phone, sealed, 20))
    });

    prop_oneof![discovery, reply, message, ack, gateway]
}

proptest! {
    /// Any valid packet survives encode→decode unchanged.
    #[test]
    fn roundtrip_any_packet(packet in arb_packet()) {
        let frame = packet.encode().expect("encode");
        prop_assert_eq!(frame[0], packet.kind().tag());
        let decoded = Packet::decode(&frame).expect("decode");
        prop_assert_eq!(&decoded, &packet);
    }

    /// Arbitrary bytes never panic the decoder.
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let _ = Packet::decode(&bytes);
    }

    /// Random bytes behind a valid kind byte never panic either.
    #[test]
    fn decode_with_valid_header_never_panics(
        kind in 1..=5u8,
        body in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let mut frame = vec![kind];
        frame.extend(body);
        let _ = Packet::decode(&frame);
    }

    /// Every strict prefix of a valid frame is rejected.
    #[test]
    fn truncated_frames_are_rejected(packet in arb_packet(), cut in any::<prop::sample::Index>()) {
        let frame = packet.encode().expect("encode");
        let len = cut.index(frame.len());
        prop_assert!(Packet::decode(&frame[..len]).is_err());
    }

    /// Bytes appended after a valid frame are reported, not ignored.
    #[test]
    fn trailing_bytes_are_rejected(
        packet in arb_packet(),
        extra in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let mut frame = packet.encode().expect("encode");
        frame.extend_from_slice(&extra);
        prop_assert_eq!(
            Packet::decode(&frame),
            Err(DecodeError::TrailingBytes(extra.len()))
        );
    }

    /// A kind byte that disagrees with the payload is caught.
    #[test]
    fn mismatched_kind_byte_is_rejected(packet in arb_packet(), shift in 1..5u8) {
        let mut frame = packet.encode().expect("encode");
        frame[0] = (frame[0] - 1 + shift) % 5 + 1;
        let is_mismatch = matches!(
            Packet::decode(&frame),
            Err(DecodeError::KindMismatch { .. })
        );
        prop_assert!(is_mismatch);
    }
}
