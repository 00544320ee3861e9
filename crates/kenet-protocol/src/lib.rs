//! Kenet protocol layer.
//!
//! Geographic store-and-forward relaying on top of `kenet-transport`
//! (one framed point-to-point link per device).
//!
//! Wire format: one kind byte + MessagePack payload.
//! Crypto: ephemeral X25519 + HKDF-SHA256 + XChaCha20-Poly1305 (detached tag).
//! Routing: greedy geographic forwarding, with a hold store for dead ends.

pub mod collab;
pub mod crypto;
pub mod dedup;
pub mod dtn;
pub mod error;
pub mod neighbor;
pub mod packet;
pub mod router;
pub mod runtime;
pub mod tracker;
pub mod types;

pub use collab::{
    Connectivity, GatewayClient, LocalIdentity, MemoryStore, NoGateway, Persistence,
    StaticConnectivity, StoredMessage,
};
pub use crypto::{KeyPair, SealedBox};
pub use dedup::DedupGuard;
pub use dtn::{HeldPacket, HoldStore};
pub use error::{CryptoError, DecodeError, KenetError};
pub use neighbor::{NeighborChange, NeighborRecord, NeighborTable};
pub use packet::{
    AckPayload, DiscoveryPayload, GatewayPayload, MessagePayload, Packet, PacketKey, PacketKind,
    ReplyPayload,
};
pub use router::{next_hop, RouteDecision};
pub use runtime::{
    Collaborators, DropReason, NodeState, RelayEvent, RelayMemory, RelayRuntime, RelaySession,
    RuntimeChannels, RuntimeCommand, RuntimeConfig, RuntimeEffect, RuntimeHandle, SendHint,
    SessionEnd, Transport,
};
pub use tracker::{DeliveryStatus, DeliveryTracker, StatusChange};
pub use types::{now_ms, GeoPoint, NodeId, PacketId};
