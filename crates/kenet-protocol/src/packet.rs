//! Kenet wire packets.
//!
//! A frame is one kind byte followed by the MessagePack encoding of a
//! [`Packet`]. The kind byte lets a receiver reject unknown traffic before
//! touching the payload, and is cross-checked against the decoded variant.

use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::crypto::SealedBox;
use crate::error::{DecodeError, KenetError};
use crate::types::{now_ms, GeoPoint, NodeId, PacketId};

/// Kind byte that prefixes every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketKind {
    Discovery = 1,
    Reply = 2,
    Message = 3,
    Ack = 4,
    GatewayRelay = 5,
}

impl PacketKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Discovery),
            2 => Some(Self::Reply),
            3 => Some(Self::Message),
            4 => Some(Self::Ack),
            5 => Some(Self::GatewayRelay),
            _ => None,
        }
    }
}

/// Dedup / hold-store key. Acks reuse their Message's id, so the kind is
/// part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketKey {
    pub kind: PacketKind,
    pub id: PacketId,
}

/// Smallest frame worth handing to the deserializer: kind byte + one byte.
pub const MIN_FRAME_LEN: usize = 2;

// ── Payloads ────────────────────────────────────────────────────────────

/// "Where is `target_id`?" Flooded until it reaches the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    pub packet_id: PacketId,
    pub sender_id: NodeId,
    pub target_id: NodeId,
    pub sender_lat: f32,
    pub sender_lng: f32,
    pub ttl: u32,
    pub timestamp: u64,
}

impl DiscoveryPayload {
    pub fn new(sender_id: NodeId, sender_pos: GeoPoint, target_id: NodeId, ttl: u32) -> Self {
        Self {
            packet_id: PacketId::random(),
            sender_id,
            target_id,
            sender_lat: sender_pos.lat,
            sender_lng: sender_pos.lng,
            ttl,
            timestamp: now_ms(),
        }
    }

    pub fn sender_position(&self) -> GeoPoint {
        GeoPoint::new(self.sender_lat, self.sender_lng)
    }

    /// The answer the target sends back: same id, roles swapped, aimed at
    /// the discoverer's position, with a fresh hop budget of `ttl`.
    pub fn reply_from(&self, me: NodeId, my_pos: GeoPoint, ttl: u32) -> ReplyPayload {
        ReplyPayload {
            packet_id: self.packet_id,
            sender_id: me,
            target_id: self.sender_id.clone(),
            sender_lat: my_pos.lat,
            sender_lng: my_pos.lng,
            target_lat: self.sender_lat,
            target_lng: self.sender_lng,
            ttl,
            timestamp: now_ms(),
        }
    }
}

/// Answer to a Discovery, carrying the responder's position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub packet_id: PacketId,
    pub sender_id: NodeId,
    pub target_id: NodeId,
    pub sender_lat: f32,
    pub sender_lng: f32,
    pub target_lat: f32,
    pub target_lng: f32,
    pub ttl: u32,
    pub timestamp: u64,
}

impl ReplyPayload {
    pub fn sender_position(&self) -> GeoPoint {
        GeoPoint::new(self.sender_lat, self.sender_lng)
    }
}

/// End-to-end encrypted chat message, routed greedily toward the target
/// position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub packet_id: PacketId,
    pub sender_id: NodeId,
    pub target_id: NodeId,
    pub sender_lat: f32,
    pub sender_lng: f32,
    pub target_lat: f32,
    pub target_lng: f32,
    pub ttl: u32,
    pub timestamp: u64,
    #[serde(with = "serde_bytes")]
    pub encrypted_payload: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub ephemeral_public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub integrity_tag: Vec<u8>,
}

impl MessagePayload {
    pub fn new(
        sender_id: NodeId,
        sender_pos: GeoPoint,
        target_id: NodeId,
        target_pos: GeoPoint,
        sealed: SealedBox,
        ttl: u32,
    ) -> Self {
        Self {
            packet_id: PacketId::random(),
            sender_id,
            target_id,
            sender_lat: sender_pos.lat,
            sender_lng: sender_pos.lng,
            target_lat: target_pos.lat,
            target_lng: target_pos.lng,
            ttl,
            timestamp: now_ms(),
            encrypted_payload: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
            ephemeral_public_key: sealed.ephemeral_public_key.to_vec(),
            integrity_tag: sealed.tag.to_vec(),
        }
    }

    pub fn sender_position(&self) -> GeoPoint {
        GeoPoint::new(self.sender_lat, self.sender_lng)
    }

    pub fn target_position(&self) -> GeoPoint {
        GeoPoint::new(self.target_lat, self.target_lng)
    }

    pub fn set_target_position(&mut self, pos: GeoPoint) {
        self.target_lat = pos.lat;
        self.target_lng = pos.lng;
    }

    /// Acknowledgment for this message: same id, aimed back at the sender.
    pub fn ack_from(&self, me: NodeId, my_pos: GeoPoint, ttl: u32) -> AckPayload {
        AckPayload {
            packet_id: self.packet_id,
            sender_id: me,
            target_id: self.sender_id.clone(),
            sender_lat: my_pos.lat,
            sender_lng: my_pos.lng,
            target_lat: self.sender_lat,
            target_lng: self.sender_lng,
            ttl,
            timestamp: now_ms(),
        }
    }
}

/// Delivery confirmation, routed like a Message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub packet_id: PacketId,
    pub sender_id: NodeId,
    pub target_id: NodeId,
    pub sender_lat: f32,
    pub sender_lng: f32,
    pub target_lat: f32,
    pub target_lng: f32,
    pub ttl: u32,
    pub timestamp: u64,
}

impl AckPayload {
    pub fn target_position(&self) -> GeoPoint {
        GeoPoint::new(self.target_lat, self.target_lng)
    }
}

/// SMS bound for the internet gateway. Flooded until a node with
/// connectivity hands it off. Only the gateway server can open it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub packet_id: PacketId,
    pub sender_id: NodeId,
    pub target_phone: String,
    pub ttl: u32,
    pub timestamp: u64,
    #[serde(with = "serde_bytes")]
    pub encrypted_payload: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub ephemeral_public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub integrity_tag: Vec<u8>,
}

impl GatewayPayload {
    pub fn new(sender_id: NodeId, target_phone: String, sealed: SealedBox, ttl: u32) -> Self {
        Self {
            packet_id: PacketId::random(),
            sender_id,
            target_phone,
            ttl,
            timestamp: now_ms(),
            encrypted_payload: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
            ephemeral_public_key: sealed.ephemeral_public_key.to_vec(),
            integrity_tag: sealed.tag.to_vec(),
        }
    }
}

// ── Packet ──────────────────────────────────────────────────────────────

/// One unit of Kenet traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Discovery(DiscoveryPayload),
    Reply(ReplyPayload),
    Message(MessagePayload),
    Ack(AckPayload),
    GatewayRelay(GatewayPayload),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Discovery(_) => PacketKind::Discovery,
            Packet::Reply(_) => PacketKind::Reply,
            Packet::Message(_) => PacketKind::Message,
            Packet::Ack(_) => PacketKind::Ack,
            Packet::GatewayRelay(_) => PacketKind::GatewayRelay,
        }
    }

    pub fn packet_id(&self) -> PacketId {
        match self {
            Packet::Discovery(p) => p.packet_id,
            Packet::Reply(p) => p.packet_id,
            Packet::Message(p) => p.packet_id,
            Packet::Ack(p) => p.packet_id,
            Packet::GatewayRelay(p) => p.packet_id,
        }
    }

    pub fn key(&self) -> PacketKey {
        PacketKey {
            kind: self.kind(),
            id: self.packet_id(),
        }
    }

    pub fn sender_id(&self) -> &NodeId {
        match self {
            Packet::Discovery(p) => &p.sender_id,
            Packet::Reply(p) => &p.sender_id,
            Packet::Message(p) => &p.sender_id,
            Packet::Ack(p) => &p.sender_id,
            Packet::GatewayRelay(p) => &p.sender_id,
        }
    }

    pub fn ttl(&self) -> u32 {
        match self {
            Packet::Discovery(p) => p.ttl,
            Packet::Reply(p) => p.ttl,
            Packet::Message(p) => p.ttl,
            Packet::Ack(p) => p.ttl,
            Packet::GatewayRelay(p) => p.ttl,
        }
    }

    fn ttl_mut(&mut self) -> &mut u32 {
        match self {
            Packet::Discovery(p) => &mut p.ttl,
            Packet::Reply(p) => &mut p.ttl,
            Packet::Message(p) => &mut p.ttl,
            Packet::Ack(p) => &mut p.ttl,
            Packet::GatewayRelay(p) => &mut p.ttl,
        }
    }

    /// Copy to put back on the air, one hop spent. `None` once the hop
    /// budget is exhausted.
    pub fn forwarded(&self) -> Option<Packet> {
        let ttl = self.ttl().checked_sub(1)?;
        let mut next = self.clone();
        *next.ttl_mut() = ttl;
        Some(next)
    }

    /// Position greedy routing aims at. Only routed kinds have one.
    pub fn routing_target(&self) -> Option<GeoPoint> {
        match self {
            Packet::Message(p) => Some(p.target_position()),
            Packet::Ack(p) => Some(p.target_position()),
            _ => None,
        }
    }

    /// Kind byte followed by the MessagePack payload.
    pub fn encode(&self) -> Result<Vec<u8>, KenetError> {
        let mut frame = vec![self.kind().tag()];
        rmp_serde::encode::write(&mut frame, self)?;
        Ok(frame)
    }

    /// Parse one frame. Every malformed input maps to a [`DecodeError`];
    /// nothing here panics on adversarial bytes.
    pub fn decode(frame: &[u8]) -> Result<Packet, DecodeError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(DecodeError::Truncated { len: frame.len() });
        }
        let header = PacketKind::from_tag(frame[0]).ok_or(DecodeError::UnknownKind(frame[0]))?;
        let body = &frame[1..];

        let mut cursor = Cursor::new(body);
        let packet = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            Packet::deserialize(&mut de).map_err(|e| decode_failure(e, frame.len()))?
        };
        let consumed = cursor.position() as usize;
        if consumed < body.len() {
            return Err(DecodeError::TrailingBytes(body.len() - consumed));
        }
        if packet.kind() != header {
            return Err(DecodeError::KindMismatch {
                header,
                payload: packet.kind(),
            });
        }
        packet.validate()?;
        Ok(packet)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.sender_id().as_str().is_empty() {
            return Err(DecodeError::InvalidField {
                field: "sender_id",
                reason: "empty",
            });
        }
        let positions: Vec<(f32, f32)> = match self {
            Packet::Discovery(p) => vec![(p.sender_lat, p.sender_lng)],
            Packet::Reply(p) => vec![(p.sender_lat, p.sender_lng), (p.target_lat, p.target_lng)],
            Packet::Message(p) => vec![(p.sender_lat, p.sender_lng), (p.target_lat, p.target_lng)],
            Packet::Ack(p) => vec![(p.sender_lat, p.sender_lng), (p.target_lat, p.target_lng)],
            Packet::GatewayRelay(_) => Vec::new(),
        };
        for (lat, lng) in positions {
            if !lat.is_finite() || !lng.is_finite() {
                return Err(DecodeError::InvalidField {
                    field: "position",
                    reason: "not a finite coordinate",
                });
            }
        }
        Ok(())
    }
}

fn decode_failure(err: rmp_serde::decode::Error, len: usize) -> DecodeError {
    use rmp_serde::decode::Error;
    match &err {
        Error::InvalidMarkerRead(io) | Error::InvalidDataRead(io)
            if io.kind() == std::io::ErrorKind::UnexpectedEof =>
        {
            DecodeError::Truncated { len }
        }
        _ => DecodeError::Malformed(err.to_string()),
    }
}

impl From<DiscoveryPayload> for Packet {
    fn from(p: DiscoveryPayload) -> Self {
        Packet::Discovery(p)
    }
}

impl From<ReplyPayload> for Packet {
    fn from(p: ReplyPayload) -> Self {
        Packet::Reply(p)
    }
}

impl From<MessagePayload> for Packet {
    fn from(p: MessagePayload) -> Self {
        Packet::Message(p)
    }
}

impl From<AckPayload> for Packet {
    fn from(p: AckPayload) -> Self {
        Packet::Ack(p)
    }
}

impl From<GatewayPayload> for Packet {
    fn from(p: GatewayPayload) -> Self {
        Packet::GatewayRelay(p)
    }
}
