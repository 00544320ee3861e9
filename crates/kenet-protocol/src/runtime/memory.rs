/// Relay state that outlives a single link.
///
/// A device has one link at a time, and a new link is exactly the
/// topology change held packets wait for. Delivery records, held packets
/// and learned contact locations therefore move from one session to the
/// next instead of dying with the link. The neighbor table does not: its
/// entries are only reachable over the link that reported them.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::dedup::DedupGuard;
use crate::dtn::HoldStore;
use crate::packet::PacketKey;
use crate::tracker::DeliveryTracker;
use crate::types::{GeoPoint, NodeId};

use super::RuntimeConfig;

/// Per-node state a session checks out at start and hands back at exit.
#[derive(Debug)]
pub struct RelayMemory {
    pub(super) tracker: DeliveryTracker,
    pub(super) held: HoldStore,
    pub(super) contacts: HashMap<NodeId, GeoPoint>,
}

impl RelayMemory {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            tracker: DeliveryTracker::with_limits(
                config.tracker_capacity,
                config.tracker_max_age.as_millis() as u64,
            ),
            held: HoldStore::new(config.hold_capacity, config.hold_max_age.as_millis() as u64),
            contacts: HashMap::new(),
        }
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

/// Everything a node shares across its sessions: the dedup guard, and the
/// [`RelayMemory`] parked between sessions.
///
/// Sessions of one node run one after another; a session started while
/// another still holds the memory gets a fresh one.
pub struct NodeState {
    dedup: Arc<DedupGuard<PacketKey>>,
    parked: Mutex<Option<RelayMemory>>,
}

impl NodeState {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            dedup: Arc::new(DedupGuard::new(config.dedup_capacity, config.dedup_window)),
            parked: Mutex::new(None),
        }
    }

    pub fn dedup(&self) -> &Arc<DedupGuard<PacketKey>> {
        &self.dedup
    }

    /// Take the parked memory, or start an empty one.
    pub fn check_out(&self, config: &RuntimeConfig) -> RelayMemory {
        self.slot()
            .take()
            .unwrap_or_else(|| RelayMemory::new(config))
    }

    /// Park `memory` for the next session.
    pub fn check_in(&self, memory: RelayMemory) {
        *self.slot() = Some(memory);
    }

    /// Held packets waiting for the next session, if no session is running.
    pub fn parked_held_count(&self) -> Option<usize> {
        self.slot().as_ref().map(RelayMemory::held_count)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<RelayMemory>> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PacketId;

    #[test]
    fn memory_survives_check_in_and_out() {
        let config = RuntimeConfig::default();
        let state = NodeState::new(&config);
        assert_eq!(state.parked_held_count(), None);

        let mut memory = state.check_out(&config);
        let id = PacketId::random();
        memory.tracker.track(id, NodeId::new("bob"));
        state.check_in(memory);
        assert_eq!(state.parked_held_count(), Some(0));

        let memory = state.check_out(&config);
        assert!(memory.tracker().status(&id).is_some());
        assert_eq!(state.parked_held_count(), None);
    }

    #[test]
    fn overlapping_session_gets_fresh_memory() {
        let config = RuntimeConfig::default();
        let state = NodeState::new(&config);
        let mut first = state.check_out(&config);
        first.tracker.track(PacketId::random(), NodeId::new("bob"));

        let second = state.check_out(&config);
        assert!(second.tracker().is_empty());
    }
}
