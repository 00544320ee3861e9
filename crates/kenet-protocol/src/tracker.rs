/// Delivery tracker for locally originated messages.
///
/// Pipeline: Pending → Held → Forwarded → Delivered. Status only moves
/// forward; a repeated or late event is a no-op. An Ack confirms delivery
/// exactly once.
///
/// Pure logic, no I/O.
use std::collections::HashMap;

use crate::types::{now_ms, NodeId, PacketId};

/// Default maximum number of tracked messages.
pub const MAX_TRACKED: usize = 10_000;

/// Default age after which records are forgotten (24h).
pub const MAX_TRACK_AGE_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeliveryStatus {
    /// Originated, not yet handed to any link.
    Pending,
    /// No neighbor makes progress; waiting in the hold store.
    Held,
    /// Handed to a next hop.
    Forwarded,
    /// Ack received from the recipient.
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub packet_id: PacketId,
    pub previous: DeliveryStatus,
    pub current: DeliveryStatus,
}

#[derive(Debug, Clone)]
struct DeliveryRecord {
    status: DeliveryStatus,
    to: NodeId,
    created: u64,
}

#[derive(Debug)]
pub struct DeliveryTracker {
    records: HashMap<PacketId, DeliveryRecord>,
    capacity: usize,
    max_age_ms: u64,
}

impl Default for DeliveryTracker {
    fn default() -> Self {
        Self::with_limits(MAX_TRACKED, MAX_TRACK_AGE_MS)
    }
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(capacity: usize, max_age_ms: u64) -> Self {
        Self {
            records: HashMap::new(),
            capacity,
            max_age_ms,
        }
    }

    /// Start tracking an outgoing message. `None` when at capacity.
    pub fn track(&mut self, packet_id: PacketId, to: NodeId) -> Option<StatusChange> {
        self.track_at(packet_id, to, now_ms())
    }

    pub fn track_at(&mut self, packet_id: PacketId, to: NodeId, now: u64) -> Option<StatusChange> {
        if self.records.len() >= self.capacity {
            self.evict_expired(now);
            if self.records.len() >= self.capacity {
                return None;
            }
        }
        self.records.insert(
            packet_id,
            DeliveryRecord {
                status: DeliveryStatus::Pending,
                to,
                created: now,
            },
        );
        Some(StatusChange {
            packet_id,
            previous: DeliveryStatus::Pending,
            current: DeliveryStatus::Pending,
        })
    }

    pub fn record_held(&mut self, packet_id: &PacketId) -> Option<StatusChange> {
        self.advance(packet_id, DeliveryStatus::Held)
    }

    pub fn record_sent(&mut self, packet_id: &PacketId) -> Option<StatusChange> {
        self.advance(packet_id, DeliveryStatus::Forwarded)
    }

    /// Ack arrived. `Some` only on the first confirmation of a known id.
    pub fn record_delivered(&mut self, packet_id: &PacketId) -> Option<StatusChange> {
        self.advance(packet_id, DeliveryStatus::Delivered)
    }

    pub fn is_delivered(&self, packet_id: &PacketId) -> bool {
        self.status(packet_id) == Some(DeliveryStatus::Delivered)
    }

    pub fn status(&self, packet_id: &PacketId) -> Option<DeliveryStatus> {
        self.records.get(packet_id).map(|r| r.status)
    }

    pub fn recipient(&self, packet_id: &PacketId) -> Option<&NodeId> {
        self.records.get(packet_id).map(|r| &r.to)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget records older than the configured age.
    pub fn evict_expired(&mut self, now: u64) -> usize {
        let before = self.records.len();
        let max_age = self.max_age_ms;
        self.records
            .retain(|_, r| now.saturating_sub(r.created) < max_age);
        before - self.records.len()
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn advance(&mut self, packet_id: &PacketId, next: DeliveryStatus) -> Option<StatusChange> {
        let record = self.records.get_mut(packet_id)?;
        if next <= record.status {
            return None;
        }
        let previous = record.status;
        record.status = next;
        Some(StatusChange {
            packet_id: *packet_id,
            previous,
            current: next,
        })
    }
}
