use std::sync::Arc;

use kenet_metrics::RelayStats;

use crate::collab::{Connectivity, LocalIdentity};
use crate::crypto;
use crate::dedup::DedupGuard;
use crate::dtn::HeldPacket;
use crate::error::KenetError;
use crate::neighbor::NeighborTable;
use crate::packet::{
    AckPayload, DiscoveryPayload, GatewayPayload, MessagePayload, Packet, PacketKey, PacketKind,
    ReplyPayload,
};
use crate::router::{self, RouteDecision};
use crate::tracker::DeliveryTracker;
use crate::types::{now_ms, GeoPoint, NodeId, PacketId};

use super::effect::{RuntimeEffect, SendHint};
use super::memory::RelayMemory;
use super::{DropReason, RelayEvent, RuntimeConfig};

/// Complete relay state for one session. Pure logic: no async, no I/O.
///
/// Every `handle_*` / `tick_*` / origination method returns the effects the
/// executor must carry out. The dedup guard may be shared with other
/// sessions, and [`RelayMemory`] is handed from one session to the next;
/// the neighbor table belongs to this link alone.
pub struct RelaySession {
    identity: LocalIdentity,
    config: RuntimeConfig,
    neighbors: NeighborTable,
    dedup: Arc<DedupGuard<PacketKey>>,
    memory: RelayMemory,
    connectivity: Arc<dyn Connectivity>,
    stats: Arc<RelayStats>,
}

impl RelaySession {
    pub fn new(
        identity: LocalIdentity,
        config: RuntimeConfig,
        connectivity: Arc<dyn Connectivity>,
        dedup: Arc<DedupGuard<PacketKey>>,
        stats: Arc<RelayStats>,
    ) -> Self {
        let memory = RelayMemory::new(&config);
        Self::resume(identity, config, connectivity, dedup, stats, memory)
    }

    /// Start a session on top of what an earlier one left behind.
    pub fn resume(
        identity: LocalIdentity,
        config: RuntimeConfig,
        connectivity: Arc<dyn Connectivity>,
        dedup: Arc<DedupGuard<PacketKey>>,
        stats: Arc<RelayStats>,
        memory: RelayMemory,
    ) -> Self {
        Self {
            identity,
            config,
            neighbors: NeighborTable::new(),
            dedup,
            memory,
            connectivity,
            stats,
        }
    }

    /// End the session, keeping delivery records, held packets and contact
    /// locations for the next one.
    pub fn into_memory(self) -> RelayMemory {
        self.memory
    }

    pub fn local_id(&self) -> &NodeId {
        &self.identity.id
    }

    pub fn position(&self) -> GeoPoint {
        self.identity.position
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.identity.keys.public_key()
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.memory.tracker
    }

    pub fn held_count(&self) -> usize {
        self.memory.held.len()
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    pub fn contact_location(&self, peer: &NodeId) -> Option<GeoPoint> {
        self.memory.contacts.get(peer).copied()
    }

    /// Seed the contact cache, e.g. from persisted locations.
    pub fn remember_contact(&mut self, peer: NodeId, position: GeoPoint) {
        self.memory.contacts.insert(peer, position);
    }

    /// New GPS fix. Moving can turn a dead end into a route, so held
    /// packets are re-offered.
    pub fn set_position(&mut self, position: GeoPoint) -> Vec<RuntimeEffect> {
        self.identity.position = position;
        self.sweep_held()
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    /// Entry point for every frame read from the link.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Vec<RuntimeEffect> {
        self.stats.frames_received.inc();
        match Packet::decode(frame) {
            Ok(packet) => self.handle_packet(packet),
            Err(e) => {
                self.stats.decode_errors.inc();
                tracing::debug!(len = frame.len(), "dropping undecodable frame: {e}");
                vec![RuntimeEffect::Emit(RelayEvent::Dropped {
                    kind: None,
                    packet_id: None,
                    reason: DropReason::Malformed(e),
                })]
            }
        }
    }

    /// Dedup, then dispatch by kind.
    pub fn handle_packet(&mut self, packet: Packet) -> Vec<RuntimeEffect> {
        if packet.sender_id() == &self.identity.id {
            tracing::trace!(id = %packet.packet_id(), "own packet echoed back");
            self.stats.duplicates.inc();
            return Vec::new();
        }
        if !self.dedup.check_and_mark(packet.key()) {
            tracing::trace!(kind = ?packet.kind(), id = %packet.packet_id(), "duplicate");
            self.stats.duplicates.inc();
            return Vec::new();
        }

        match packet {
            Packet::Discovery(p) => self.handle_discovery(p),
            Packet::Reply(p) => self.handle_reply(p),
            Packet::Message(p) => self.handle_message(p),
            Packet::Ack(p) => self.handle_ack(p),
            Packet::GatewayRelay(p) => self.handle_gateway(p),
        }
    }

    fn handle_discovery(&mut self, p: DiscoveryPayload) -> Vec<RuntimeEffect> {
        let mut effects = self.learn_neighbor(&p.sender_id, p.sender_position());

        if p.target_id == self.identity.id {
            tracing::debug!(from = %p.sender_id.short(), "discovered, replying");
            let reply = p.reply_from(
                self.identity.id.clone(),
                self.identity.position,
                self.config.discovery_ttl,
            );
            effects.extend(self.originate(Packet::Reply(reply), SendHint::Flood));
        } else if p.target_id.is_broadcast() {
            // Hello beacon: the neighbor update above is all it is for.
        } else {
            effects.extend(self.flood_onward(Packet::Discovery(p)));
        }
        effects
    }

    fn handle_reply(&mut self, p: ReplyPayload) -> Vec<RuntimeEffect> {
        if p.target_id != self.identity.id {
            return self.flood_onward(Packet::Reply(p));
        }

        let peer = p.sender_id.clone();
        let position = p.sender_position();
        tracing::info!(peer = %peer.short(), %position, "location learned");
        self.memory.contacts.insert(peer.clone(), position);
        let located = self.memory.held.locate(&peer, position);

        let mut effects = vec![
            RuntimeEffect::UpdateContactLocation {
                peer: peer.clone(),
                position,
            },
            RuntimeEffect::Emit(RelayEvent::LocationLearned { peer, position }),
        ];
        if located > 0 {
            effects.extend(self.sweep_held());
        }
        effects
    }

    fn handle_message(&mut self, p: MessagePayload) -> Vec<RuntimeEffect> {
        let mut effects = self.learn_neighbor(&p.sender_id, p.sender_position());

        if p.target_id != self.identity.id {
            let target = p.target_position();
            let packet = Packet::Message(p);
            let key = packet.key();
            match packet.forwarded() {
                Some(next) => effects.extend(self.route_or_hold(next, Some(target), false)),
                None => effects.push(self.ttl_expired(key)),
            }
            return effects;
        }

        let opened = crypto::open(
            &p.encrypted_payload,
            &p.integrity_tag,
            &p.nonce,
            &p.ephemeral_public_key,
            &self.identity.keys,
        );
        let plaintext = match opened {
            Ok(plaintext) => plaintext,
            Err(e) => {
                self.stats.decrypt_failures.inc();
                tracing::warn!(from = %p.sender_id.short(), id = %p.packet_id, "cannot open message: {e}");
                effects.push(RuntimeEffect::Emit(RelayEvent::Dropped {
                    kind: Some(PacketKind::Message),
                    packet_id: Some(p.packet_id),
                    reason: DropReason::DecryptFailed(e),
                }));
                return effects;
            }
        };

        self.stats.delivered.inc();
        tracing::info!(from = %p.sender_id.short(), id = %p.packet_id, "message received");
        effects.push(RuntimeEffect::StoreInbound {
            packet_id: p.packet_id,
            sender: p.sender_id.clone(),
            plaintext: plaintext.clone(),
            timestamp: p.timestamp,
        });
        effects.push(RuntimeEffect::Emit(RelayEvent::MessageReceived {
            packet_id: p.packet_id,
            from: p.sender_id.clone(),
            plaintext,
            timestamp: p.timestamp,
        }));

        let ack = p.ack_from(
            self.identity.id.clone(),
            self.identity.position,
            self.config.ack_ttl,
        );
        let target = ack.target_position();
        let ack = Packet::Ack(ack);
        self.dedup.mark_seen(ack.key());
        effects.extend(self.route_or_hold(ack, Some(target), true));
        effects
    }

    fn handle_ack(&mut self, p: AckPayload) -> Vec<RuntimeEffect> {
        if p.target_id != self.identity.id {
            let target = p.target_position();
            let packet = Packet::Ack(p);
            let key = packet.key();
            return match packet.forwarded() {
                Some(next) => self.route_or_hold(next, Some(target), false),
                None => vec![self.ttl_expired(key)],
            };
        }

        let Some(change) = self.memory.tracker.record_delivered(&p.packet_id) else {
            tracing::debug!(id = %p.packet_id, "ack for unknown or already delivered message");
            return Vec::new();
        };
        self.stats.acks_confirmed.inc();
        tracing::info!(id = %p.packet_id, "delivery confirmed");
        self.memory.held.remove(&PacketKey {
            kind: PacketKind::Message,
            id: p.packet_id,
        });
        vec![
            RuntimeEffect::MarkDelivered(p.packet_id),
            RuntimeEffect::Emit(RelayEvent::StatusChanged(change)),
            RuntimeEffect::Emit(RelayEvent::DeliveryConfirmed {
                packet_id: p.packet_id,
            }),
        ]
    }

    fn handle_gateway(&mut self, p: GatewayPayload) -> Vec<RuntimeEffect> {
        if self.connectivity.has_internet() {
            self.stats.gateway_handoffs.inc();
            tracing::info!(id = %p.packet_id, "bridging gateway packet");
            let packet_id = p.packet_id;
            return vec![
                RuntimeEffect::GatewayHandoff(p),
                RuntimeEffect::Emit(RelayEvent::GatewayHandedOff { packet_id }),
            ];
        }
        self.flood_onward(Packet::GatewayRelay(p))
    }

    // ── Origination ──────────────────────────────────────────────────────

    /// Flood a Discovery looking for `target`.
    pub fn discover(&mut self, target: NodeId) -> Vec<RuntimeEffect> {
        let discovery = DiscoveryPayload::new(
            self.identity.id.clone(),
            self.identity.position,
            target,
            self.config.discovery_ttl,
        );
        self.originate(Packet::Discovery(discovery), SendHint::Flood)
    }

    /// Announce our position to direct neighbors.
    pub fn hello_beacon(&mut self) -> Vec<RuntimeEffect> {
        let beacon = DiscoveryPayload::new(
            self.identity.id.clone(),
            self.identity.position,
            NodeId::broadcast(),
            self.config.beacon_ttl,
        );
        self.originate(Packet::Discovery(beacon), SendHint::Flood)
    }

    /// Encrypt `plaintext` for `to` and route it.
    ///
    /// Without a known location for `to`, the message is held and a
    /// Discovery goes out; the Reply releases it. Refused, with nothing
    /// sent, when the packet would not fit in one frame or the tracker is
    /// full.
    pub fn send_message(
        &mut self,
        to: NodeId,
        recipient_public_key: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<(PacketId, Vec<RuntimeEffect>), KenetError> {
        let sealed = crypto::seal(plaintext, recipient_public_key)?;
        let target = self.memory.contacts.get(&to).copied();
        let message = MessagePayload::new(
            self.identity.id.clone(),
            self.identity.position,
            to.clone(),
            target.unwrap_or_default(),
            sealed,
            self.config.message_ttl,
        );
        let packet_id = message.packet_id;
        let timestamp = message.timestamp;
        let packet = Packet::Message(message);
        self.check_fits(&packet)?;
        if self.memory.tracker.track(packet_id, to.clone()).is_none() {
            tracing::warn!(
                to = %to.short(),
                tracked = self.memory.tracker.len(),
                "delivery tracker full, refusing message"
            );
            return Err(KenetError::TrackerFull(self.memory.tracker.len()));
        }
        self.dedup.mark_seen(packet.key());

        let mut effects = vec![RuntimeEffect::StoreOutbound {
            packet_id,
            recipient: to.clone(),
            plaintext: plaintext.to_vec(),
            timestamp,
        }];
        effects.extend(self.route_or_hold(packet, target, true));
        if target.is_none() {
            effects.extend(self.discover(to));
        }
        Ok((packet_id, effects))
    }

    /// Seal an SMS for the gateway server. Bridged directly when this
    /// device is online, flooded otherwise.
    pub fn send_gateway_sms(
        &mut self,
        target_phone: String,
        text: &str,
    ) -> Result<(PacketId, Vec<RuntimeEffect>), KenetError> {
        let server_key = self
            .config
            .gateway_public_key
            .ok_or_else(|| KenetError::Config("gateway public key not configured".into()))?;
        let sealed = crypto::seal(text.as_bytes(), &server_key)?;
        let payload = GatewayPayload::new(
            self.identity.id.clone(),
            target_phone,
            sealed,
            self.config.gateway_ttl,
        );
        let packet_id = payload.packet_id;
        self.check_fits(&Packet::GatewayRelay(payload.clone()))?;

        if self.connectivity.has_internet() {
            self.dedup.mark_seen(Packet::GatewayRelay(payload.clone()).key());
            self.stats.gateway_handoffs.inc();
            return Ok((
                packet_id,
                vec![
                    RuntimeEffect::GatewayHandoff(payload),
                    RuntimeEffect::Emit(RelayEvent::GatewayHandedOff { packet_id }),
                ],
            ));
        }
        Ok((
            packet_id,
            self.originate(Packet::GatewayRelay(payload), SendHint::Flood),
        ))
    }

    // ── Ticks ────────────────────────────────────────────────────────────

    /// Re-offer every held packet to the router.
    pub fn tick_sweep(&mut self) -> Vec<RuntimeEffect> {
        self.sweep_held()
    }

    /// Expire dedup entries, stale neighbors, old held packets and old
    /// tracker records.
    pub fn tick_cleanup(&mut self, now: u64) -> Vec<RuntimeEffect> {
        let pruned = self.dedup.prune();
        let max_age = self.neighbor_max_age_ms();
        let stale = self.neighbors.evict_stale(now, max_age);
        let evicted = self.memory.tracker.evict_expired(now);
        if pruned > 0 || !stale.is_empty() || evicted > 0 {
            tracing::debug!(pruned, stale = stale.len(), evicted, "cleanup");
        }

        self.memory
            .held
            .expire(now)
            .into_iter()
            .map(|entry| {
                tracing::debug!(id = %entry.packet.packet_id(), "held packet expired");
                RuntimeEffect::Emit(RelayEvent::Dropped {
                    kind: Some(entry.packet.kind()),
                    packet_id: Some(entry.packet.packet_id()),
                    reason: DropReason::HoldExpired,
                })
            })
            .collect()
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    /// An originated packet must fit in one link frame.
    fn check_fits(&self, packet: &Packet) -> Result<(), KenetError> {
        let size = packet.encode()?.len();
        let max = self.config.max_frame_len;
        if size > max {
            tracing::warn!(kind = ?packet.kind(), size, max, "refusing oversized packet");
            return Err(KenetError::TooLarge { size, max });
        }
        Ok(())
    }

    fn neighbor_max_age_ms(&self) -> u64 {
        self.config.neighbor_max_age.as_millis() as u64
    }

    /// Record a sender position; sweep held packets if the table changed.
    fn learn_neighbor(&mut self, peer: &NodeId, position: GeoPoint) -> Vec<RuntimeEffect> {
        if peer == &self.identity.id || peer.is_broadcast() {
            return Vec::new();
        }
        let change = self.neighbors.update_neighbor(peer.clone(), position);
        if !change.opens_routes() {
            return Vec::new();
        }
        tracing::debug!(peer = %peer.short(), %position, ?change, "neighbor table updated");
        let mut effects = vec![RuntimeEffect::Emit(RelayEvent::NeighborUpdated {
            peer: peer.clone(),
            position,
        })];
        effects.extend(self.sweep_held());
        effects
    }

    /// Send a packet created here, remembering it so echoes are dropped.
    fn originate(&mut self, packet: Packet, hint: SendHint) -> Vec<RuntimeEffect> {
        self.dedup.mark_seen(packet.key());
        self.send(packet, hint)
    }

    fn send(&mut self, packet: Packet, hint: SendHint) -> Vec<RuntimeEffect> {
        let key = packet.key();
        let next_hop = match &hint {
            SendHint::Flood => None,
            SendHint::Toward(peer) => Some(peer.clone()),
        };
        vec![
            RuntimeEffect::Send { packet, hint },
            RuntimeEffect::Emit(RelayEvent::Forwarded { key, next_hop }),
        ]
    }

    /// Flood a received packet on with one hop spent, or drop it.
    fn flood_onward(&mut self, packet: Packet) -> Vec<RuntimeEffect> {
        let key = packet.key();
        match packet.forwarded() {
            Some(next) => {
                self.stats.forwarded.inc();
                self.send(next, SendHint::Flood)
            }
            None => vec![self.ttl_expired(key)],
        }
    }

    fn ttl_expired(&self, key: PacketKey) -> RuntimeEffect {
        self.stats.ttl_expired.inc();
        tracing::debug!(kind = ?key.kind, id = %key.id, "hop budget exhausted");
        RuntimeEffect::Emit(RelayEvent::Dropped {
            kind: Some(key.kind),
            packet_id: Some(key.id),
            reason: DropReason::TtlExpired,
        })
    }

    /// Greedy step toward `target`; park the packet on a dead end.
    fn route_or_hold(
        &mut self,
        packet: Packet,
        target: Option<GeoPoint>,
        originated_here: bool,
    ) -> Vec<RuntimeEffect> {
        let now = now_ms();
        let max_age = self.neighbor_max_age_ms();
        let decision = target.map(|t| {
            router::route_fresh(&self.neighbors, t, self.identity.position, now, max_age)
        });
        match decision {
            Some(RouteDecision::NextHop {
                peer,
                distance_m,
                my_distance_m,
            }) => {
                tracing::debug!(
                    id = %packet.packet_id(),
                    next_hop = %peer.short(),
                    distance_m,
                    my_distance_m,
                    "routing"
                );
                let mut effects = Vec::new();
                if originated_here {
                    effects.extend(self.mark_sent(&packet));
                } else {
                    self.stats.forwarded.inc();
                }
                effects.extend(self.send(packet, SendHint::Toward(peer)));
                effects
            }
            _ => self.hold(packet, target, originated_here),
        }
    }

    fn hold(
        &mut self,
        packet: Packet,
        target: Option<GeoPoint>,
        originated_here: bool,
    ) -> Vec<RuntimeEffect> {
        let key = packet.key();
        tracing::debug!(kind = ?key.kind, id = %key.id, "no progress possible, holding");
        self.stats.held.inc();

        let mut effects = Vec::new();
        if originated_here && key.kind == PacketKind::Message {
            if let Some(change) = self.memory.tracker.record_held(&key.id) {
                effects.push(RuntimeEffect::Emit(RelayEvent::StatusChanged(change)));
            }
        }
        let evicted = self.memory.held.hold(HeldPacket {
            packet,
            target,
            held_at: now_ms(),
            originated_here,
        });
        effects.push(RuntimeEffect::Emit(RelayEvent::Held { key }));
        if let Some(old) = evicted {
            tracing::warn!(id = %old.packet.packet_id(), "hold store full, evicting oldest");
            effects.push(RuntimeEffect::Emit(RelayEvent::Dropped {
                kind: Some(old.packet.kind()),
                packet_id: Some(old.packet.packet_id()),
                reason: DropReason::HoldEvicted,
            }));
        }
        effects
    }

    fn mark_sent(&mut self, packet: &Packet) -> Option<RuntimeEffect> {
        if !matches!(packet, Packet::Message(_)) {
            return None;
        }
        self.memory
            .tracker
            .record_sent(&packet.packet_id())
            .map(|change| RuntimeEffect::Emit(RelayEvent::StatusChanged(change)))
    }

    fn sweep_held(&mut self) -> Vec<RuntimeEffect> {
        if self.memory.held.is_empty() {
            return Vec::new();
        }
        let me = self.identity.position;
        let now = now_ms();
        let max_age = self.neighbor_max_age_ms();
        let neighbors = &self.neighbors;
        let released = self.memory.held.release(|target| {
            router::route_fresh(neighbors, target, me, now, max_age).next_hop()
        });

        let mut effects = Vec::new();
        for release in released {
            let packet = release.held.packet;
            tracing::debug!(id = %packet.packet_id(), next_hop = %release.next_hop.short(), "releasing held packet");
            if release.held.originated_here {
                effects.extend(self.mark_sent(&packet));
            } else {
                self.stats.forwarded.inc();
            }
            effects.extend(self.send(packet, SendHint::Toward(release.next_hop)));
        }
        effects
    }
}
