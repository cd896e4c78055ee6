//! Deterministic test schedule for mesh-probe.
//!
//! The schedule is a greedy proper edge-colouring of the directed complete
//! graph over the node set, with edges out of non-initiating nodes removed.
//! Each colour becomes a slot: a matching in which no node appears twice.
//!
//! Every node runs [`build_schedule`] on its own copy of the configuration.
//! Because the node set is sorted before edges are enumerated, and the
//! greedy pass scans edges in that fixed order, all nodes arrive at the same
//! slots without exchanging a single message.

use probe_types::{Edge, NodeAddr};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Schedule construction errors.
///
/// Both variants mean the builder itself is broken. They are never
/// recoverable at runtime.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// A node appears more than once within a single slot.
    #[error("node {node} used more than once in slot {slot}")]
    NodeReused {
        /// Slot index.
        slot: usize,
        /// The double-booked node.
        node: NodeAddr,
    },

    /// The slots do not cover every candidate edge exactly once.
    #[error("schedule covers {placed} edges, expected {expected}")]
    Coverage {
        /// Distinct edges found across all slots.
        placed: usize,
        /// Candidate edges derived from the node set.
        expected: usize,
    },
}

/// One time slot: a set of disjoint directed edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Slot {
    edges: Vec<Edge>,
}

impl Slot {
    /// Create a slot from edges (unchecked; see [`Schedule::verify`]).
    pub fn new(edges: Vec<Edge>) -> Self {
        Self { edges }
    }

    /// Edges in this slot, in placement order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of edges in this slot.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns true if the slot has no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// A repeating cycle of slots.
///
/// Immutable once built. The cycle length is an output of the builder,
/// determined by node count and the non-initiator exclusions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    slots: Vec<Slot>,
}

impl Schedule {
    /// Wrap pre-built slots without verification.
    ///
    /// Use [`build_schedule`] for real schedules; this exists so that
    /// hand-made (possibly invalid) schedules can be checked.
    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// Number of slots in one cycle.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if there are no slots (fewer than two usable nodes).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Get a slot by index.
    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Iterate over slots in cycle order.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Total edges across all slots.
    pub fn edge_count(&self) -> usize {
        self.slots.iter().map(Slot::len).sum()
    }

    /// Indices of the slots in which `addr` initiates a test.
    pub fn initiator_slots(&self, addr: &NodeAddr) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.edges.iter().any(|e| &e.initiator == addr))
            .map(|(index, _)| index)
            .collect()
    }

    /// Check that no slot contains a repeated node.
    pub fn verify(&self) -> Result<(), ScheduleError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut seen = HashSet::new();
            for edge in &slot.edges {
                for node in [&edge.initiator, &edge.responder] {
                    if !seen.insert(node) {
                        return Err(ScheduleError::NodeReused {
                            slot: index,
                            node: node.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Check that the slots hold exactly `expected` distinct edges and no duplicates.
    fn verify_coverage(&self, expected: usize) -> Result<(), ScheduleError> {
        let distinct: HashSet<&Edge> = self.slots.iter().flat_map(|s| s.edges.iter()).collect();
        if distinct.len() != expected || self.edge_count() != expected {
            return Err(ScheduleError::Coverage {
                placed: distinct.len(),
                expected,
            });
        }
        Ok(())
    }

    /// Canonical JSON encoding of the slots.
    pub fn to_canonical_json(&self) -> String {
        // Plain strings and vectors: serialization cannot fail.
        serde_json::to_string(&self.slots).unwrap_or_default()
    }

    /// Short fingerprint of the schedule.
    ///
    /// First 16 hex characters of SHA-256 over the canonical JSON. Nodes
    /// that log the same fingerprint are running the same schedule.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.to_canonical_json().as_bytes());
        hex::encode(&digest[..8])
    }
}

/// Enumerate candidate edges in canonical order.
///
/// All ordered pairs `(a, b)` with `a != b` and `a` not a non-initiator,
/// sorted lexicographically by initiator and then responder.
pub fn candidate_edges(nodes: &BTreeSet<NodeAddr>, non_initiators: &BTreeSet<NodeAddr>) -> Vec<Edge> {
    nodes
        .iter()
        .filter(|a| !non_initiators.contains(*a))
        .flat_map(|a| {
            nodes
                .iter()
                .filter(move |b| *b != a)
                .map(move |b| Edge::new(a.clone(), b.clone()))
        })
        .collect()
}

/// Build the schedule for a node set.
///
/// Input order and duplicates in `nodes` do not matter. Non-initiators may
/// still be responders. With fewer than two nodes the schedule is empty.
///
/// # Errors
///
/// Returns [`ScheduleError`] if the built schedule fails verification,
/// which indicates a bug in the builder.
pub fn build_schedule(
    nodes: &[NodeAddr],
    non_initiators: &BTreeSet<NodeAddr>,
) -> Result<Schedule, ScheduleError> {
    let nodes: BTreeSet<NodeAddr> = nodes.iter().cloned().collect();
    let edges = candidate_edges(&nodes, non_initiators);

    let mut used = vec![false; edges.len()];
    let mut remaining = edges.len();
    let mut slots = Vec::new();

    while remaining > 0 {
        let mut busy: HashSet<&NodeAddr> = HashSet::new();
        let mut slot = Vec::new();

        for (index, edge) in edges.iter().enumerate() {
            if used[index] || busy.contains(&edge.initiator) || busy.contains(&edge.responder) {
                continue;
            }
            busy.insert(&edge.initiator);
            busy.insert(&edge.responder);
            used[index] = true;
            remaining -= 1;
            slot.push(edge.clone());
        }

        slots.push(Slot::new(slot));
    }

    let schedule = Schedule::from_slots(slots);
    schedule.verify()?;
    schedule.verify_coverage(edges.len())?;
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NodeAddr {
        NodeAddr::new(s).unwrap()
    }

    fn addrs(list: &[&str]) -> Vec<NodeAddr> {
        list.iter().map(|s| addr(s)).collect()
    }

    fn none() -> BTreeSet<NodeAddr> {
        BTreeSet::new()
    }

    /// Every valid pair exactly once, no node twice in a slot.
    fn assert_schedule_invariants(
        schedule: &Schedule,
        nodes: &[NodeAddr],
        non_initiators: &BTreeSet<NodeAddr>,
    ) {
        schedule.verify().unwrap();

        let mut seen = HashSet::new();
        for slot in schedule.iter() {
            assert!(!slot.is_empty(), "slots are never empty");
            for edge in slot.edges() {
                assert_ne!(edge.initiator, edge.responder);
                assert!(!non_initiators.contains(&edge.initiator));
                assert!(seen.insert(edge.clone()), "edge {edge} placed twice");
            }
        }

        let unique: BTreeSet<_> = nodes.iter().cloned().collect();
        for a in &unique {
            for b in &unique {
                if a != b && !non_initiators.contains(a) {
                    assert!(seen.contains(&Edge::new(a.clone(), b.clone())), "missing {a} -> {b}");
                }
            }
        }
    }

    #[test]
    fn empty_and_single_node_schedules_are_empty() {
        assert!(build_schedule(&[], &none()).unwrap().is_empty());
        assert!(build_schedule(&addrs(&["a"]), &none()).unwrap().is_empty());
    }

    #[test]
    fn two_nodes_alternate_directions() {
        let schedule = build_schedule(&addrs(&["b", "a"]), &none()).unwrap();
        assert_eq!(schedule.num_slots(), 2);
        assert_eq!(schedule.slot(0).unwrap().edges(), &[Edge::new(addr("a"), addr("b"))]);
        assert_eq!(schedule.slot(1).unwrap().edges(), &[Edge::new(addr("b"), addr("a"))]);
    }

    #[test]
    fn three_nodes_cover_six_edges_without_shared_endpoints() {
        let nodes = addrs(&["A", "B", "C"]);
        let schedule = build_schedule(&nodes, &none()).unwrap();

        assert_eq!(schedule.edge_count(), 6);
        for slot in schedule.iter() {
            // With three nodes any two edges share an endpoint.
            assert_eq!(slot.len(), 1, "slot {:?}", slot);
        }
        assert_schedule_invariants(&schedule, &nodes, &none());
    }

    #[test]
    fn invariants_hold_for_many_sizes() {
        for n in 2..=12 {
            let nodes: Vec<NodeAddr> = (0..n).map(|i| addr(&format!("10.0.0.{i}"))).collect();
            let schedule = build_schedule(&nodes, &none()).unwrap();
            assert_eq!(schedule.edge_count(), n * (n - 1));
            assert_schedule_invariants(&schedule, &nodes, &none());
        }
    }

    #[test]
    fn non_initiators_never_initiate() {
        let nodes = addrs(&[
            "10.19.30.100",
            "10.19.30.101",
            "10.19.30.102",
            "10.19.30.103",
            "10.19.30.104",
            "10.19.30.2",
            "10.19.30.3",
        ]);
        let excluded: BTreeSet<_> = addrs(&["10.19.30.2", "10.19.30.3"]).into_iter().collect();
        let schedule = build_schedule(&nodes, &excluded).unwrap();

        // 5 initiators, each testing the 6 other nodes.
        assert_eq!(schedule.edge_count(), 30);
        assert_schedule_invariants(&schedule, &nodes, &excluded);
        for node in &excluded {
            assert!(schedule.initiator_slots(node).is_empty());
        }
    }

    #[test]
    fn all_non_initiators_gives_empty_schedule() {
        let nodes = addrs(&["a", "b"]);
        let excluded: BTreeSet<_> = nodes.iter().cloned().collect();
        assert!(build_schedule(&nodes, &excluded).unwrap().is_empty());
    }

    #[test]
    fn input_order_and_duplicates_do_not_matter() {
        let forward = build_schedule(&addrs(&["a", "b", "c", "d"]), &none()).unwrap();
        let shuffled = build_schedule(&addrs(&["d", "b", "a", "c", "b"]), &none()).unwrap();
        assert_eq!(forward, shuffled);
        assert_eq!(forward.to_canonical_json(), shuffled.to_canonical_json());
        assert_eq!(forward.fingerprint(), shuffled.fingerprint());
    }

    #[test]
    fn independent_builds_are_byte_identical() {
        let nodes = addrs(&["10.0.0.5", "10.0.0.1", "10.0.0.3", "10.0.0.2", "10.0.0.4"]);
        let excluded: BTreeSet<_> = addrs(&["10.0.0.4"]).into_iter().collect();
        let first = build_schedule(&nodes, &excluded).unwrap();
        let second = build_schedule(&nodes, &excluded).unwrap();
        assert_eq!(first.to_canonical_json().as_bytes(), second.to_canonical_json().as_bytes());
    }

    #[test]
    fn exclusion_changes_fingerprint() {
        let nodes = addrs(&["a", "b", "c"]);
        let all = build_schedule(&nodes, &none()).unwrap();
        let excluded: BTreeSet<_> = addrs(&["c"]).into_iter().collect();
        let partial = build_schedule(&nodes, &excluded).unwrap();
        assert_ne!(all.fingerprint(), partial.fingerprint());
        assert_eq!(all.fingerprint().len(), 16);
    }

    #[test]
    fn initiator_slots_lists_every_outgoing_edge() {
        let nodes = addrs(&["a", "b", "c", "d"]);
        let schedule = build_schedule(&nodes, &none()).unwrap();
        for node in &nodes {
            assert_eq!(schedule.initiator_slots(node).len(), 3);
        }
    }

    #[test]
    fn verify_rejects_double_booked_slot() {
        let bad = Schedule::from_slots(vec![Slot::new(vec![
            Edge::new(addr("a"), addr("b")),
            Edge::new(addr("b"), addr("c")),
        ])]);
        assert_eq!(
            bad.verify(),
            Err(ScheduleError::NodeReused {
                slot: 0,
                node: addr("b"),
            })
        );
    }

    #[test]
    fn coverage_rejects_duplicate_edges() {
        let dup = Schedule::from_slots(vec![
            Slot::new(vec![Edge::new(addr("a"), addr("b"))]),
            Slot::new(vec![Edge::new(addr("a"), addr("b"))]),
        ]);
        assert!(dup.verify().is_ok());
        assert_eq!(
            dup.verify_coverage(2),
            Err(ScheduleError::Coverage {
                placed: 1,
                expected: 2,
            })
        );
    }
}
