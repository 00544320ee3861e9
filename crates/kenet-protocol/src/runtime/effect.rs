use crate::packet::{GatewayPayload, Packet};
use crate::types::{GeoPoint, NodeId, PacketId};

use super::RelayEvent;

/// Where an outgoing packet should go.
///
/// The link layer has a single peer, so both variants end up on the same
/// wire; the hint is kept for transports that can fan out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendHint {
    /// Every reachable neighbor.
    Flood,
    /// The next hop picked by the geographic router.
    Toward(NodeId),
}

/// Intent produced by the pure [`RelaySession`](super::RelaySession)
/// handlers. The executor turns each one into I/O.
#[derive(Debug)]
pub enum RuntimeEffect {
    /// Encode and write a packet to the link.
    Send { packet: Packet, hint: SendHint },

    /// Persist a message opened here.
    StoreInbound {
        packet_id: PacketId,
        sender: NodeId,
        plaintext: Vec<u8>,
        timestamp: u64,
    },

    /// Persist a message originated here.
    StoreOutbound {
        packet_id: PacketId,
        recipient: NodeId,
        plaintext: Vec<u8>,
        timestamp: u64,
    },

    /// Flip a stored outbound message to delivered.
    MarkDelivered(PacketId),

    /// Persist a contact's position learned from a Reply.
    UpdateContactLocation { peer: NodeId, position: GeoPoint },

    /// Hand a gateway packet to the SMS bridge.
    GatewayHandoff(GatewayPayload),

    /// Surface an event to the application.
    Emit(RelayEvent),
}
