/// Relay runtime: one live session over one link.
///
/// The runtime owns the link and the session's neighbor table. Delivery
/// records, held packets and the dedup guard live in a [`NodeState`] that
/// outlives the link. The application only sees a channel-based API, never
/// frames or protocol internals.
mod effect;
mod executor;
mod r#loop;
mod memory;
mod state;
mod transport;

pub use effect::{RuntimeEffect, SendHint};
pub use memory::{NodeState, RelayMemory};
pub use state::RelaySession;
pub use transport::Transport;

#[cfg(test)]
pub(crate) use transport::mock;

use std::sync::Arc;
use std::time::Duration;

use kenet_metrics::{RelayStats, StatsSnapshot};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::collab::{Connectivity, GatewayClient, Persistence};
use crate::dedup::{DEDUP_CAPACITY, DEDUP_WINDOW};
use crate::dtn::{HOLD_CAPACITY, HOLD_MAX_AGE_MS};
use crate::error::{CryptoError, DecodeError, KenetError};
use crate::neighbor::NEIGHBOR_MAX_AGE_MS;
use crate::packet::{PacketKey, PacketKind};
use crate::tracker::{DeliveryStatus, StatusChange, MAX_TRACKED, MAX_TRACK_AGE_MS};
use crate::types::{
    GeoPoint, NodeId, PacketId, BEACON_TTL, FLOOD_TTL, GATEWAY_TTL, MESSAGE_TTL,
};

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the relay runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interval between hello beacons. The first goes out at startup.
    pub beacon_interval: Duration,
    /// Interval for re-offering held packets to the router.
    pub sweep_interval: Duration,
    /// Interval for dedup, neighbor, hold and tracker cleanup.
    pub cleanup_interval: Duration,
    /// Neighbors not heard from for this long stop being routing
    /// candidates, and are pruned at the next cleanup.
    pub neighbor_max_age: Duration,
    /// Dedup horizon.
    pub dedup_window: Duration,
    /// Dedup memory bound.
    pub dedup_capacity: usize,
    /// Held packets are dropped after this long.
    pub hold_max_age: Duration,
    /// Maximum number of held packets.
    pub hold_capacity: usize,
    /// Maximum number of tracked outgoing messages.
    pub tracker_capacity: usize,
    /// Delivery records are forgotten after this long.
    pub tracker_max_age: Duration,
    /// Hop budget for Discovery floods and the Reply sent back.
    pub discovery_ttl: u32,
    /// Hop budget for originated Messages.
    pub message_ttl: u32,
    /// Hop budget for Acks.
    pub ack_ttl: u32,
    /// Hop budget for gateway (SMS bridge) packets.
    pub gateway_ttl: u32,
    /// Hop budget for hello beacons.
    pub beacon_ttl: u32,
    /// Largest encoded packet this node originates. Must not exceed the
    /// link's max frame size.
    pub max_frame_len: usize,
    /// Public key of the SMS gateway server, needed to originate gateway SMS.
    pub gateway_public_key: Option<[u8; 32]>,
    /// Capacity of the command and event channels.
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            beacon_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(15),
            cleanup_interval: Duration::from_secs(60),
            neighbor_max_age: Duration::from_millis(NEIGHBOR_MAX_AGE_MS),
            dedup_window: DEDUP_WINDOW,
            dedup_capacity: DEDUP_CAPACITY,
            hold_max_age: Duration::from_millis(HOLD_MAX_AGE_MS),
            hold_capacity: HOLD_CAPACITY,
            tracker_capacity: MAX_TRACKED,
            tracker_max_age: Duration::from_millis(MAX_TRACK_AGE_MS),
            discovery_ttl: FLOOD_TTL,
            message_ttl: MESSAGE_TTL,
            ack_ttl: MESSAGE_TTL,
            gateway_ttl: GATEWAY_TTL,
            beacon_ttl: BEACON_TTL,
            max_frame_len: kenet_transport::DEFAULT_MAX_FRAME_SIZE,
            gateway_public_key: None,
            channel_capacity: 256,
        }
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime loop.
pub enum RuntimeCommand {
    /// Encrypt and send a chat message to a contact.
    SendMessage {
        to: NodeId,
        plaintext: Vec<u8>,
        reply: oneshot::Sender<Result<PacketId, KenetError>>,
    },
    /// Flood a Discovery for `target`.
    Discover { target: NodeId },
    /// Originate an SMS through the internet gateway.
    SendGatewaySms {
        target_phone: String,
        text: String,
        reply: oneshot::Sender<Result<PacketId, KenetError>>,
    },
    /// New GPS fix for this device.
    UpdatePosition(GeoPoint),
    /// Query: current neighbor table.
    GetNeighbors {
        reply: oneshot::Sender<Vec<(NodeId, GeoPoint)>>,
    },
    /// Query: delivery status of an originated message.
    GetStatus {
        packet_id: PacketId,
        reply: oneshot::Sender<Option<DeliveryStatus>>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// ── Events (runtime → app) ───────────────────────────────────────────

/// Why a packet was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    Malformed(DecodeError),
    TtlExpired,
    DecryptFailed(CryptoError),
    HoldExpired,
    HoldEvicted,
    /// Encoded packet exceeded the link's frame limit.
    Oversized { size: usize, max: usize },
}

/// Events the application may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A message addressed here was opened.
    MessageReceived {
        packet_id: PacketId,
        from: NodeId,
        plaintext: Vec<u8>,
        timestamp: u64,
    },
    /// A Discovery we sent was answered.
    LocationLearned { peer: NodeId, position: GeoPoint },
    /// An Ack confirmed one of our messages.
    DeliveryConfirmed { packet_id: PacketId },
    /// Delivery status of an originated message moved forward.
    StatusChanged(StatusChange),
    /// A neighbor appeared or moved.
    NeighborUpdated { peer: NodeId, position: GeoPoint },
    /// A packet left this node. `next_hop` is `None` for floods.
    Forwarded {
        key: PacketKey,
        next_hop: Option<NodeId>,
    },
    /// A routed packet hit a dead end and is waiting in the hold store.
    Held { key: PacketKey },
    /// A packet was discarded.
    Dropped {
        kind: Option<PacketKind>,
        packet_id: Option<PacketId>,
        reason: DropReason,
    },
    /// A gateway packet was handed to the SMS bridge.
    GatewayHandedOff { packet_id: PacketId },
    /// Non-fatal runtime error.
    Error { description: String },
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to a running relay runtime. Cheap to clone.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_id: NodeId,
    stats: Arc<RelayStats>,
}

impl RuntimeHandle {
    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// Send an end-to-end encrypted message. Resolves once the message is
    /// queued (forwarded or held), not when it is delivered.
    pub async fn send_message(
        &self,
        to: NodeId,
        plaintext: Vec<u8>,
    ) -> Result<PacketId, KenetError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::SendMessage {
                to,
                plaintext,
                reply,
            })
            .await
            .map_err(|_| KenetError::Shutdown)?;
        rx.await.map_err(|_| KenetError::Shutdown)?
    }

    pub async fn discover(&self, target: NodeId) -> Result<(), KenetError> {
        self.cmd_tx
            .send(RuntimeCommand::Discover { target })
            .await
            .map_err(|_| KenetError::Shutdown)
    }

    pub async fn send_gateway_sms(
        &self,
        target_phone: String,
        text: String,
    ) -> Result<PacketId, KenetError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::SendGatewaySms {
                target_phone,
                text,
                reply,
            })
            .await
            .map_err(|_| KenetError::Shutdown)?;
        rx.await.map_err(|_| KenetError::Shutdown)?
    }

    pub async fn update_position(&self, position: GeoPoint) -> Result<(), KenetError> {
        self.cmd_tx
            .send(RuntimeCommand::UpdatePosition(position))
            .await
            .map_err(|_| KenetError::Shutdown)
    }

    pub async fn neighbors(&self) -> Vec<(NodeId, GeoPoint)> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetNeighbors { reply })
            .await;
        rx.await.unwrap_or_default()
    }

    pub async fn status(&self, packet_id: PacketId) -> Option<DeliveryStatus> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(RuntimeCommand::GetStatus { packet_id, reply })
            .await;
        rx.await.ok().flatten()
    }

    /// Counters of the session behind this handle.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// How a session ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// `shutdown()` was called or every handle was dropped.
    Shutdown,
    /// The peer closed the link cleanly.
    PeerClosed,
}

/// Returned to the application when the runtime starts.
pub struct RuntimeChannels {
    pub handle: RuntimeHandle,
    pub events: mpsc::Receiver<RelayEvent>,
    /// Resolves when the session ends. A transport failure surfaces here as
    /// `Err(KenetError::Transport(_))`; the owner decides whether to
    /// reconnect.
    pub session: JoinHandle<Result<SessionEnd, KenetError>>,
}

/// External collaborators of a session.
#[derive(Clone)]
pub struct Collaborators {
    pub persistence: Arc<dyn Persistence>,
    pub connectivity: Arc<dyn Connectivity>,
    pub gateway: Arc<dyn GatewayClient>,
}

// ── RelayRuntime ─────────────────────────────────────────────────────

pub struct RelayRuntime;

impl RelayRuntime {
    /// Start a session over `transport` with fresh node state.
    pub fn spawn<T: Transport>(
        transport: Arc<T>,
        collab: Collaborators,
        config: RuntimeConfig,
    ) -> Result<RuntimeChannels, KenetError> {
        let state = Arc::new(NodeState::new(&config));
        Self::spawn_with_state(transport, collab, config, state)
    }

    /// Start a session that picks up where the previous session of this
    /// node stopped: same dedup guard, same delivery records, same held
    /// packets. The memory is handed back to `state` when the session ends.
    pub fn spawn_with_state<T: Transport>(
        transport: Arc<T>,
        collab: Collaborators,
        config: RuntimeConfig,
        state: Arc<NodeState>,
    ) -> Result<RuntimeChannels, KenetError> {
        let identity = collab.persistence.load_own_identity()?;
        let local_id = identity.id.clone();
        let stats = Arc::new(RelayStats::default());
        let memory = state.check_out(&config);
        if memory.held_count() > 0 {
            tracing::info!(held = memory.held_count(), "resuming with held packets");
        }
        let session = RelaySession::resume(
            identity,
            config.clone(),
            Arc::clone(&collab.connectivity),
            Arc::clone(state.dedup()),
            Arc::clone(&stats),
            memory,
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);

        let task = tokio::spawn(r#loop::runtime_loop(
            transport, session, state, collab, config, cmd_rx, event_tx,
        ));

        Ok(RuntimeChannels {
            handle: RuntimeHandle {
                cmd_tx,
                local_id,
                stats,
            },
            events: event_rx,
            session: task,
        })
    }
}
