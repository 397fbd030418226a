//! Forward-node routing table
//!
//! The table holds the neighbors that answered a forward-node request. It is
//! deliberately simple:
//!
//! - **Bounded**: never more than `capacity` entries
//! - **FIFO eviction**: learning a new neighbor while full drops the
//!   earliest-learned one
//! - **Deterministic choice**: the next hop is always the earliest-learned
//!   entry that is still present
//!
//! Entries carry no freshness metadata; a full re-discovery is the only way
//! the table changes besides explicit removal.

use super::packet::NodeId;
use std::collections::VecDeque;

/// Default number of forward nodes a node remembers
pub const DEFAULT_MAX_NODES: usize = 2;

/// Bounded, insertion-ordered set of forward-node candidates
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// Entries in insertion order (front = earliest)
    entries: VecDeque<NodeId>,
    /// Maximum number of entries
    capacity: usize,
}

impl RoutingTable {
    /// Create an empty routing table; capacity is at least one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a node if it is not already known
    ///
    /// Returns the evicted node when the table was full.
    pub fn add(&mut self, node: NodeId) -> Option<NodeId> {
        if self.contains(node) {
            return None;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(node);
        evicted
    }

    /// Remove a node; returns whether it was present
    pub fn remove(&mut self, node: NodeId) -> bool {
        match self.entries.iter().position(|&n| n == node) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Earliest-learned forward node, or `None` when there is no route
    pub fn next_hop(&self) -> Option<NodeId> {
        self.entries.front().copied()
    }

    /// Earliest-learned forward node not listed in `exclude`
    pub fn next_hop_excluding(&self, exclude: &[NodeId]) -> Option<NodeId> {
        self.entries.iter().copied().find(|n| !exclude.contains(n))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().copied()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NODES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: u8) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn test_empty_table_has_no_route() {
        let table = RoutingTable::default();
        assert!(table.is_empty());
        assert_eq!(table.next_hop(), None);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut table = RoutingTable::new(3);
        table.add(n(1));
        table.add(n(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut table = RoutingTable::new(2);
        assert_eq!(table.add(n(1)), None);
        assert_eq!(table.add(n(2)), None);
        assert_eq!(table.add(n(3)), Some(n(1)));

        assert_eq!(table.len(), 2);
        assert!(!table.contains(n(1)));
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![n(2), n(3)]);
    }

    #[test]
    fn test_re_adding_known_node_keeps_order() {
        let mut table = RoutingTable::new(2);
        table.add(n(1));
        table.add(n(2));
        table.add(n(1));
        assert_eq!(table.next_hop(), Some(n(1)));
    }

    #[test]
    fn test_next_hop_is_earliest_present() {
        let mut table = RoutingTable::new(3);
        table.add(n(4));
        table.add(n(0));
        assert_eq!(table.next_hop(), Some(n(4)));

        assert!(table.remove(n(4)));
        assert_eq!(table.next_hop(), Some(n(0)));
        assert!(!table.remove(n(4)));
    }

    #[test]
    fn test_next_hop_excluding() {
        let mut table = RoutingTable::new(3);
        table.add(n(2));
        table.add(n(0));

        assert_eq!(table.next_hop_excluding(&[n(2)]), Some(n(0)));
        assert_eq!(table.next_hop_excluding(&[n(2), n(0)]), None);
        assert_eq!(table.next_hop_excluding(&[]), Some(n(2)));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut table = RoutingTable::new(0);
        table.add(n(1));
        assert_eq!(table.capacity(), 1);
        assert_eq!(table.len(), 1);
    }
}
