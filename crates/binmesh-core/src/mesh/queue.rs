//! Bounded queue of capacity alerts held for forwarding
//!
//! Each entry is one alert this node has taken custody of, together with its
//! delivery state. The queue is strict FIFO and rejects new alerts when full;
//! older entries are never evicted to make room.
//!
//! ```text
//!   push ──► [ Pending ] ──forward──► [ AwaitingAck ] ──Ack::Succeed──► removed
//!                 ▲                          │
//!                 └──── send failed ─────────┘ (state unchanged)
//! ```

use super::packet::{CapacityAlert, NodeId};
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;

/// Default number of alerts a node can hold at once
pub const DEFAULT_MAX_CAPACITY_PACKETS: usize = 10;

/// Returned by [`CapacityAlertQueue::push`] when the queue is at capacity
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("capacity alert queue full ({capacity} entries)")]
pub struct QueueFull {
    pub capacity: usize,
}

/// Delivery state of a queued alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    /// Not yet handed to a next hop
    Pending,
    /// Sent to `next_hop` at `sent_at`, waiting for its ack
    AwaitingAck { next_hop: NodeId, sent_at: Instant },
}

/// An alert in custody of this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedAlert {
    pub alert: CapacityAlert,
    pub state: AlertState,
    /// Node that handed us this alert (`None` for locally raised alerts)
    pub upstream: Option<NodeId>,
    /// Whether the single alternate-route retry has been spent
    pub retried: bool,
    /// Next hop that failed this alert, skipped on retry
    pub failed_hop: Option<NodeId>,
}

impl QueuedAlert {
    fn new(alert: CapacityAlert, upstream: Option<NodeId>) -> Self {
        Self {
            alert,
            state: AlertState::Pending,
            upstream,
            retried: false,
            failed_hop: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == AlertState::Pending
    }

    pub fn is_awaiting_ack(&self) -> bool {
        matches!(self.state, AlertState::AwaitingAck { .. })
    }
}

/// Fixed-capacity FIFO of alerts pending forwarding or acknowledgement
#[derive(Debug, Clone)]
pub struct CapacityAlertQueue {
    entries: VecDeque<QueuedAlert>,
    capacity: usize,
}

impl CapacityAlertQueue {
    /// Create an empty queue; capacity is at least one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queue a locally raised alert
    pub fn push(&mut self, alert: CapacityAlert) -> Result<(), QueueFull> {
        self.push_from(alert, None)
    }

    /// Queue an alert received from `upstream`
    pub fn push_from(&mut self, alert: CapacityAlert, upstream: Option<NodeId>) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull { capacity: self.capacity });
        }
        self.entries.push_back(QueuedAlert::new(alert, upstream));
        Ok(())
    }

    /// Remove and return the oldest alert
    pub fn pop_front(&mut self) -> Option<CapacityAlert> {
        self.entries.pop_front().map(|entry| entry.alert)
    }

    /// Position of the entry awaiting an ack for `alert_node`
    pub fn find_awaiting_ack(&self, alert_node: NodeId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.is_awaiting_ack() && e.alert.alert_node() == alert_node)
    }

    /// Remove the entry at `idx`
    pub fn remove(&mut self, idx: usize) -> Option<QueuedAlert> {
        self.entries.remove(idx)
    }

    pub fn get(&self, idx: usize) -> Option<&QueuedAlert> {
        self.entries.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut QueuedAlert> {
        self.entries.get_mut(idx)
    }

    /// Entries oldest-first
    pub fn iter(&self) -> impl Iterator<Item = &QueuedAlert> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries still waiting for a route
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }
}

impl Default for CapacityAlertQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPACITY_PACKETS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(origin: u8) -> CapacityAlert {
        let id = NodeId::new(origin);
        CapacityAlert::new(id, id, NodeId::ROOT, 90)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = CapacityAlertQueue::new(4);
        queue.push(alert(1)).unwrap();
        queue.push(alert(2)).unwrap();
        queue.push(alert(3)).unwrap();

        assert_eq!(queue.pop_front().map(|a| a.alert_node()), Some(NodeId::new(1)));
        assert_eq!(queue.pop_front().map(|a| a.alert_node()), Some(NodeId::new(2)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_push_rejects_when_full() {
        let mut queue = CapacityAlertQueue::new(2);
        queue.push(alert(1)).unwrap();
        queue.push(alert(2)).unwrap();

        assert!(queue.is_full());
        assert_eq!(queue.push(alert(3)), Err(QueueFull { capacity: 2 }));

        let origins: Vec<_> = queue.iter().map(|e| e.alert.alert_node()).collect();
        assert_eq!(origins, vec![NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn test_default_capacity() {
        let mut queue = CapacityAlertQueue::default();
        for i in 0..DEFAULT_MAX_CAPACITY_PACKETS {
            queue.push(alert(i as u8)).unwrap();
        }
        assert!(queue.push(alert(200)).is_err());
        assert_eq!(queue.len(), 10);
    }

    #[test]
    fn test_new_entries_are_pending() {
        let mut queue = CapacityAlertQueue::default();
        queue.push_from(alert(7), Some(NodeId::new(7))).unwrap();

        let entry = queue.get(0).unwrap();
        assert!(entry.is_pending());
        assert_eq!(entry.upstream, Some(NodeId::new(7)));
        assert!(!entry.retried);
        assert_eq!(entry.failed_hop, None);
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_find_awaiting_ack_skips_pending() {
        let mut queue = CapacityAlertQueue::default();
        queue.push(alert(5)).unwrap();
        assert_eq!(queue.find_awaiting_ack(NodeId::new(5)), None);

        queue.get_mut(0).unwrap().state = AlertState::AwaitingAck {
            next_hop: NodeId::ROOT,
            sent_at: Instant::now(),
        };
        assert_eq!(queue.find_awaiting_ack(NodeId::new(5)), Some(0));
        assert_eq!(queue.find_awaiting_ack(NodeId::new(6)), None);
    }
}
