/// Neighbor table: last known position of every node heard from.
///
/// Entries come from Discovery, Message and hello-beacon senders. Pure
/// data, no I/O; the owning session decides when to sweep and evict.
use std::collections::BTreeMap;

use crate::types::{now_ms, GeoPoint, NodeId};

/// How long a neighbor stays eligible for routing after it was last heard.
pub const NEIGHBOR_MAX_AGE_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborRecord {
    pub position: GeoPoint,
    /// Unix millis of the last packet that carried this position.
    pub last_seen: u64,
}

/// What an update did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborChange {
    Added,
    Moved,
    /// Same position, timestamp bumped.
    Refreshed,
}

impl NeighborChange {
    /// Added or moved entries can open a route for held packets.
    pub fn opens_routes(self) -> bool {
        matches!(self, NeighborChange::Added | NeighborChange::Moved)
    }
}

/// Ordered by node id so routing tie-breaks are deterministic.
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    entries: BTreeMap<NodeId, NeighborRecord>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `peer` at `position`, last writer wins.
    pub fn update_neighbor(&mut self, peer: NodeId, position: GeoPoint) -> NeighborChange {
        self.update_neighbor_at(peer, position, now_ms())
    }

    pub fn update_neighbor_at(
        &mut self,
        peer: NodeId,
        position: GeoPoint,
        now: u64,
    ) -> NeighborChange {
        let record = NeighborRecord {
            position,
            last_seen: now,
        };
        match self.entries.insert(peer, record) {
            None => NeighborChange::Added,
            Some(previous) if previous.position != position => NeighborChange::Moved,
            Some(_) => NeighborChange::Refreshed,
        }
    }

    pub fn get(&self, peer: &NodeId) -> Option<&NeighborRecord> {
        self.entries.get(peer)
    }

    pub fn remove(&mut self, peer: &NodeId) -> Option<NeighborRecord> {
        self.entries.remove(peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &NeighborRecord)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Greedy next hop toward `target` from `me`. See [`crate::router`].
    pub fn next_hop(&self, target: GeoPoint, me: GeoPoint) -> Option<NodeId> {
        crate::router::next_hop(self, target, me)
    }

    /// Drop entries not heard from within `max_age_ms`. Returns who left.
    pub fn evict_stale(&mut self, now: u64, max_age_ms: u64) -> Vec<NodeId> {
        let stale: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, r)| now.saturating_sub(r.last_seen) > max_age_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[test]
    fn add_move_refresh() {
        let mut table = NeighborTable::new();
        let p = GeoPoint::new(1.0, 2.0);
        assert_eq!(table.update_neighbor_at(id("c"), p, 10), NeighborChange::Added);
        assert_eq!(table.update_neighbor_at(id("c"), p, 20), NeighborChange::Refreshed);
        assert_eq!(
            table.update_neighbor_at(id("c"), GeoPoint::new(1.5, 2.0), 30),
            NeighborChange::Moved
        );
        assert_eq!(table.len(), 1);
        let rec = table.get(&id("c")).unwrap();
        assert_eq!(rec.position, GeoPoint::new(1.5, 2.0));
        assert_eq!(rec.last_seen, 30);
    }

    #[test]
    fn ids_are_case_insensitive_keys() {
        let mut table = NeighborTable::new();
        table.update_neighbor_at(id("Carol"), GeoPoint::new(1.0, 1.0), 0);
        assert!(table.get(&id("CAROL")).is_some());
    }

    #[test]
    fn opens_routes_only_on_add_or_move() {
        assert!(NeighborChange::Added.opens_routes());
        assert!(NeighborChange::Moved.opens_routes());
        assert!(!NeighborChange::Refreshed.opens_routes());
    }

    #[test]
    fn evict_stale_removes_only_old_entries() {
        let mut table = NeighborTable::new();
        table.update_neighbor_at(id("old"), GeoPoint::default(), 1_000);
        table.update_neighbor_at(id("new"), GeoPoint::default(), 9_000);
        let gone = table.evict_stale(10_000, 5_000);
        assert_eq!(gone, vec![id("old")]);
        assert!(table.get(&id("new")).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn iteration_is_ordered_by_id() {
        let mut table = NeighborTable::new();
        for name in ["zed", "amy", "kim"] {
            table.update_neighbor_at(id(name), GeoPoint::default(), 0);
        }
        let order: Vec<&str> = table.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["amy", "kim", "zed"]);
    }
}
