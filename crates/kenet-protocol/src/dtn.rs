/// Hold store for packets stuck at a local maximum.
///
/// Greedy routing has no answer when no neighbor is closer to the target
/// than we are. Instead of dropping, the packet waits here and is
/// re-offered to the router whenever the neighbor table gains or moves an
/// entry, and on a periodic sweep. Entries expire after `max_age_ms`;
/// the oldest is evicted at capacity.
///
/// Pure state, no I/O.
use std::collections::HashMap;

use crate::packet::{Packet, PacketKey};
use crate::types::{GeoPoint, NodeId};

/// Default hold limit (1 hour).
pub const HOLD_MAX_AGE_MS: u64 = 60 * 60 * 1000;

/// Default number of packets kept on hold.
pub const HOLD_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
pub struct HeldPacket {
    pub packet: Packet,
    /// `None` for a locally originated message whose recipient has not
    /// been located yet.
    pub target: Option<GeoPoint>,
    pub held_at: u64,
    pub originated_here: bool,
}

impl HeldPacket {
    pub fn key(&self) -> PacketKey {
        self.packet.key()
    }
}

/// A held packet the router found a way forward for.
#[derive(Debug, Clone)]
pub struct Release {
    pub held: HeldPacket,
    pub next_hop: NodeId,
}

#[derive(Debug)]
pub struct HoldStore {
    held: HashMap<PacketKey, HeldPacket>,
    capacity: usize,
    max_age_ms: u64,
}

impl HoldStore {
    pub fn new(capacity: usize, max_age_ms: u64) -> Self {
        Self {
            held: HashMap::new(),
            capacity: capacity.max(1),
            max_age_ms,
        }
    }

    /// Put a packet on hold. A packet already held under the same key is
    /// replaced. Returns the entry evicted to make room, if any.
    pub fn hold(&mut self, entry: HeldPacket) -> Option<HeldPacket> {
        let key = entry.key();
        let mut evicted = None;
        if !self.held.contains_key(&key) && self.held.len() >= self.capacity {
            evicted = self.evict_oldest();
        }
        self.held.insert(key, entry);
        evicted
    }

    pub fn contains(&self, key: &PacketKey) -> bool {
        self.held.contains_key(key)
    }

    pub fn remove(&mut self, key: &PacketKey) -> Option<HeldPacket> {
        self.held.remove(key)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Fill in the target of originated messages to `peer` that were
    /// waiting for its location. Returns how many were updated.
    pub fn locate(&mut self, peer: &NodeId, position: GeoPoint) -> usize {
        let mut updated = 0;
        for entry in self.held.values_mut() {
            if !entry.originated_here || entry.target.is_some() {
                continue;
            }
            if let Packet::Message(msg) = &mut entry.packet {
                if &msg.target_id == peer {
                    msg.set_target_position(position);
                    entry.target = Some(position);
                    updated += 1;
                }
            }
        }
        updated
    }

    /// Take every entry `route` can place. Entries without a target, or
    /// for which `route` returns `None`, stay held. Release order is
    /// oldest first.
    pub fn release<F>(&mut self, mut route: F) -> Vec<Release>
    where
        F: FnMut(GeoPoint) -> Option<NodeId>,
    {
        let mut ready: Vec<(PacketKey, NodeId, u64)> = self
            .held
            .iter()
            .filter_map(|(key, entry)| {
                let target = entry.target?;
                route(target).map(|hop| (*key, hop, entry.held_at))
            })
            .collect();
        ready.sort_by_key(|(_, _, held_at)| *held_at);

        ready
            .into_iter()
            .filter_map(|(key, next_hop, _)| {
                self.held.remove(&key).map(|held| Release { held, next_hop })
            })
            .collect()
    }

    /// Drop entries held longer than the age limit.
    pub fn expire(&mut self, now: u64) -> Vec<HeldPacket> {
        let max_age = self.max_age_ms;
        let expired: Vec<PacketKey> = self
            .held
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.held_at) > max_age)
            .map(|(k, _)| *k)
            .collect();
        expired
            .iter()
            .filter_map(|k| self.held.remove(k))
            .collect()
    }

    fn evict_oldest(&mut self) -> Option<HeldPacket> {
        let oldest = self
            .held
            .iter()
            .min_by_key(|(_, e)| e.held_at)
            .map(|(k, _)| *k)?;
        self.held.remove(&oldest)
    }
}

impl Default for HoldStore {
    fn default() -> Self {
        Self::new(HOLD_CAPACITY, HOLD_MAX_AGE_MS)
    }
}
