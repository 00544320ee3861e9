/// Greedy geographic forwarding.
///
/// Hand the packet to the neighbor strictly closer to the target than we
/// are, picking the closest. No such neighbor means a local maximum: the
/// caller holds the packet until the table changes.
use crate::neighbor::{NeighborRecord, NeighborTable};
use crate::types::{GeoPoint, NodeId};

/// Outcome of one routing decision, with distances for logging.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    NextHop {
        peer: NodeId,
        distance_m: f64,
        my_distance_m: f64,
    },
    LocalMaximum {
        my_distance_m: f64,
    },
}

impl RouteDecision {
    pub fn next_hop(self) -> Option<NodeId> {
        match self {
            RouteDecision::NextHop { peer, .. } => Some(peer),
            RouteDecision::LocalMaximum { .. } => None,
        }
    }
}

/// Pick the neighbor minimizing distance to `target`, but only if it beats
/// our own distance. Ties keep the first (lowest id) candidate.
pub fn route(neighbors: &NeighborTable, target: GeoPoint, me: GeoPoint) -> RouteDecision {
    route_over(neighbors.iter(), target, me)
}

/// [`route`], skipping neighbors not heard from within `max_age_ms`.
pub fn route_fresh(
    neighbors: &NeighborTable,
    target: GeoPoint,
    me: GeoPoint,
    now: u64,
    max_age_ms: u64,
) -> RouteDecision {
    let fresh = neighbors
        .iter()
        .filter(|(_, record)| now.saturating_sub(record.last_seen) <= max_age_ms);
    route_over(fresh, target, me)
}

fn route_over<'a>(
    candidates: impl Iterator<Item = (&'a NodeId, &'a NeighborRecord)>,
    target: GeoPoint,
    me: GeoPoint,
) -> RouteDecision {
    let my_distance_m = me.distance_to(&target);
    let mut best: Option<(&NodeId, f64)> = None;
    let mut best_distance = my_distance_m;

    for (peer, record) in candidates {
        let d = record.position.distance_to(&target);
        if d < best_distance {
            best_distance = d;
            best = Some((peer, d));
        }
    }

    match best {
        Some((peer, distance_m)) => RouteDecision::NextHop {
            peer: peer.clone(),
            distance_m,
            my_distance_m,
        },
        None => RouteDecision::LocalMaximum { my_distance_m },
    }
}

/// Convenience wrapper over [`route`].
pub fn next_hop(neighbors: &NeighborTable, target: GeoPoint, me: GeoPoint) -> Option<NodeId> {
    route(neighbors, target, me).next_hop()
}
