//! Metrics primitives for the Kenet relay stack.
//!
//! [`Counter`] is a lock-free monotonic counter; [`RelayStats`] groups the
//! counters a relay session bumps while it processes frames.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A monotonically increasing counter backed by [`AtomicU64`].
///
/// Relaxed ordering only: values are statistics, not synchronization.
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

impl Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Counter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let counter = Self::new();
        counter.inc_by(u64::deserialize(deserializer)?);
        Ok(counter)
    }
}

/// Per-session relay counters.
///
/// Shared by reference between the dispatch path and whoever reports
/// statistics; every field is independently atomic.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RelayStats {
    /// Frames read from the link.
    pub frames_received: Counter,
    /// Frames that failed to decode.
    pub decode_errors: Counter,
    /// Packets suppressed by the dedup guard.
    pub duplicates: Counter,
    /// Packets dropped because their hop budget ran out.
    pub ttl_expired: Counter,
    /// Packets re-sent toward another node.
    pub forwarded: Counter,
    /// Packets parked in the hold store after a routing dead end.
    pub held: Counter,
    /// Messages addressed here that failed to open.
    pub decrypt_failures: Counter,
    /// Messages opened and handed to the application.
    pub delivered: Counter,
    /// Acknowledgments that confirmed one of our messages.
    pub acks_confirmed: Counter,
    /// Gateway packets handed to the internet gateway.
    pub gateway_handoffs: Counter,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.get(),
            decode_errors: self.decode_errors.get(),
            duplicates: self.duplicates.get(),
            ttl_expired: self.ttl_expired.get(),
            forwarded: self.forwarded.get(),
            held: self.held.get(),
            decrypt_failures: self.decrypt_failures.get(),
            delivered: self.delivered.get(),
            acks_confirmed: self.acks_confirmed.get(),
            gateway_handoffs: self.gateway_handoffs.get(),
        }
    }
}

/// Plain-value copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub decode_errors: u64,
    pub duplicates: u64,
    pub ttl_expired: u64,
    pub forwarded: u64,
    pub held: u64,
    pub decrypt_failures: u64,
    pub delivered: u64,
    pub acks_confirmed: u64,
    pub gateway_handoffs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basic_operations() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        c.inc();
        c.inc_by(10);
        assert_eq!(c.get(), 11);
    }

    #[test]
    fn counter_serde_roundtrip() {
        let c = Counter::new();
        c.inc_by(99);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "99");
        let c2: Counter = serde_json::from_str(&json).unwrap();
        assert_eq!(c2.get(), 99);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = RelayStats::new();
        stats.frames_received.inc_by(3);
        stats.decode_errors.inc();
        stats.forwarded.inc_by(2);

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 3);
        assert_eq!(snap.decode_errors, 1);
        assert_eq!(snap.forwarded, 2);
        assert_eq!(snap.delivered, 0);
    }

    #[test]
    fn stats_serialize_as_flat_numbers() {
        let stats = RelayStats::new();
        stats.held.inc();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["held"], 1);
        assert_eq!(json["duplicates"], 0);
    }
}
