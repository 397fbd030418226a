//! Multi-Node Mesh Network Simulation
//!
//! This module provides a simulation framework for exercising the forwarding
//! engine without hardware. It models:
//!
//! - Multiple nodes with configurable positions (a line by default)
//! - A shared broadcast medium with a hard radio range and optional loss
//! - Bins that fill at a per-node rate and are emptied when full
//! - A virtual clock advanced by a fixed step
//!
//! Every step polls each node once in index order (node 0 is the root) and
//! then hands every transmitted frame to the in-range nodes, again in index
//! order. Runs are reproducible for a given seed.
//!
//! ## Example
//!
//! ```ignore
//! use binmesh_core::mesh::simulation::{MeshSimulator, SimConfig};
//!
//! let mut sim = MeshSimulator::new(SimConfig::default().with_node_count(4))?;
//! sim.run(1_000);
//! println!("{}", sim.stats());
//! ```

use super::node::{Node, NodeEvent};
use super::packet::{NodeId, MAX_BIN_CAPACITY};
use super::traits::{CapacitySensor, MeshError, MeshResult, NodeConfig, NodeStats, RadioTransport, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// In-memory radio: an inbox of received frames and a log of sent ones
#[derive(Debug, Clone, Default)]
pub struct SimRadio {
    inbox: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    busy: bool,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for the next `try_receive`
    pub fn deliver(&mut self, frame: Vec<u8>) {
        self.inbox.push_back(frame);
    }

    /// Frames sent since the last call
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }

    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// While busy every send fails with [`TransportError::Busy`]
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }
}

impl RadioTransport for SimRadio {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.busy {
            return Err(TransportError::Busy);
        }
        self.sent.push(frame.to_vec());
        Ok(())
    }

    fn try_receive(&mut self) -> Option<Vec<u8>> {
        self.inbox.pop_front()
    }
}

/// A bin that fills at a constant rate and is emptied once it reads full
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimBin {
    level: f64,
    /// Percent per reading
    fill_rate: f64,
}

impl SimBin {
    pub fn new(fill_rate: f64) -> Self {
        Self {
            level: 0.0,
            fill_rate: fill_rate.max(0.0),
        }
    }

    pub fn level(&self) -> u8 {
        self.level.round().clamp(0.0, MAX_BIN_CAPACITY as f64) as u8
    }

    pub fn fill_rate(&self) -> f64 {
        self.fill_rate
    }

    pub fn set_fill_rate(&mut self, rate: f64) {
        self.fill_rate = rate.max(0.0);
    }
}

impl CapacitySensor for SimBin {
    fn read_capacity(&mut self) -> u8 {
        if self.level >= MAX_BIN_CAPACITY as f64 {
            // Collected
            self.level = 0.0;
        } else {
            self.level = (self.level + self.fill_rate).min(MAX_BIN_CAPACITY as f64);
        }
        self.level()
    }
}

/// Node position in 2D space (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

impl NodePosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Distance to another node in meters
    pub fn distance_to(&self, other: &NodePosition) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of nodes (node 0 is the root)
    pub node_count: usize,
    /// Distance between neighbors when placed on a line (meters)
    pub spacing: f64,
    /// Explicit positions; overrides `node_count` and `spacing`
    pub positions: Option<Vec<NodePosition>>,
    /// Frames reach every node within this distance (meters)
    pub radio_range: f64,
    /// Probability that a single in-range reception is lost
    pub loss_rate: f64,
    /// Virtual time per step in milliseconds
    pub step_ms: u64,
    /// Slowest bin fill rate, percent per step
    pub fill_rate_min: f64,
    /// Fastest bin fill rate, percent per step
    pub fill_rate_max: f64,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Template for every node; `node_id` is replaced per node
    pub node: NodeConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node_count: 4,
            spacing: 1_000.0,   // 1 km
            positions: None,
            radio_range: 1_500.0, // reaches direct neighbors on a line
            loss_rate: 0.0,
            step_ms: 1_000,
            fill_rate_min: 1.0,
            fill_rate_max: 5.0,
            seed: 42,
            node: NodeConfig::default().with_sample_interval(Duration::from_secs(1)),
        }
    }
}

impl SimConfig {
    pub fn with_node_count(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    pub fn with_spacing(mut self, spacing: f64) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_positions(mut self, positions: Vec<NodePosition>) -> Self {
        self.node_count = positions.len();
        self.positions = Some(positions);
        self
    }

    pub fn with_radio_range(mut self, range: f64) -> Self {
        self.radio_range = range;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate;
        self
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step_ms = step.as_millis() as u64;
        self
    }

    pub fn with_fill_rate(mut self, min: f64, max: f64) -> Self {
        self.fill_rate_min = min;
        self.fill_rate_max = max;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_node_config(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    fn positions(&self) -> Vec<NodePosition> {
        match &self.positions {
            Some(positions) => positions.clone(),
            None => (0..self.node_count)
                .map(|i| NodePosition::new(i as f64 * self.spacing, 0.0))
                .collect(),
        }
    }

    fn validate(&self) -> MeshResult<()> {
        let count = self.positions.as_ref().map_or(self.node_count, Vec::len);
        if count == 0 || count > usize::from(u8::MAX) + 1 {
            return Err(MeshError::InvalidConfig(format!(
                "node count {} outside 1..=256",
                count
            )));
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(MeshError::InvalidConfig(format!(
                "loss rate {} outside 0..=1",
                self.loss_rate
            )));
        }
        let finite = self.fill_rate_min.is_finite() && self.fill_rate_max.is_finite();
        if !finite || !(0.0 <= self.fill_rate_min && self.fill_rate_min <= self.fill_rate_max) {
            return Err(MeshError::InvalidConfig(format!(
                "fill rate range {}..{} is empty",
                self.fill_rate_min, self.fill_rate_max
            )));
        }
        if self.step_ms == 0 {
            return Err(MeshError::InvalidConfig("step must be non-zero".into()));
        }
        self.node.validate()
    }
}

/// Simulation statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimStats {
    /// Steps run so far
    pub steps: u64,
    /// Frames put on the air
    pub packets_transmitted: u64,
    /// Frames handed to an in-range receiver
    pub packets_received: u64,
    /// In-range receptions lost to the channel
    pub packets_lost: u64,
    /// Alerts raised by bin sensors
    pub alerts_raised: u64,
    /// Alerts consumed at the root
    pub alerts_delivered: u64,
    /// Locally raised alerts acknowledged at their origin
    pub alerts_acknowledged: u64,
    /// Alerts given up on at any hop
    pub alerts_failed: u64,
    /// Alerts dropped on a full queue at any hop
    pub alerts_dropped: u64,
    /// Counters of every node, by index
    pub per_node: Vec<NodeStats>,
}

impl SimStats {
    /// Fraction of raised alerts that reached the root (0.0 - 1.0)
    pub fn delivery_rate(&self) -> f64 {
        if self.alerts_raised == 0 {
            0.0
        } else {
            self.alerts_delivered as f64 / self.alerts_raised as f64
        }
    }

    /// Fraction of in-range receptions that got through (0.0 - 1.0)
    pub fn packet_success_rate(&self) -> f64 {
        let attempts = self.packets_received + self.packets_lost;
        if attempts == 0 {
            0.0
        } else {
            self.packets_received as f64 / attempts as f64
        }
    }
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Mesh Simulation Summary ===")?;
        writeln!(f, "Steps: {}", self.steps)?;
        writeln!(f, "Nodes: {}", self.per_node.len())?;
        writeln!(f)?;
        writeln!(f, "Alerts:")?;
        writeln!(f, "  Raised: {}", self.alerts_raised)?;
        writeln!(f, "  Delivered: {}", self.alerts_delivered)?;
        writeln!(f, "  Acknowledged at origin: {}", self.alerts_acknowledged)?;
        writeln!(f, "  Failed: {}", self.alerts_failed)?;
        writeln!(f, "  Dropped: {}", self.alerts_dropped)?;
        writeln!(f, "  Delivery rate: {:.1}%", self.delivery_rate() * 100.0)?;
        writeln!(f)?;
        writeln!(f, "Packets:")?;
        writeln!(f, "  Transmitted: {}", self.packets_transmitted)?;
        writeln!(f, "  Received: {}", self.packets_received)?;
        writeln!(f, "  Lost: {}", self.packets_lost)?;
        writeln!(f)?;
        writeln!(f, "Per-node stats:")?;
        for (i, stats) in self.per_node.iter().enumerate() {
            writeln!(
                f,
                "  Node {:3}: TX={} RX={} raised={} forwarded={} acked={} failed={} routes={}",
                i,
                stats.packets_tx,
                stats.frames_rx,
                stats.alerts_raised,
                stats.alerts_forwarded,
                stats.alerts_acknowledged,
                stats.alerts_failed,
                stats.routes_learned
            )?;
        }
        Ok(())
    }
}

/// Simulation events for logging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SimEvent {
    NodeJoined {
        node_idx: usize,
        node_id: NodeId,
        position: NodePosition,
    },
    PacketTransmitted { step: u64, node_idx: usize, size: usize },
    PacketLost { step: u64, from_idx: usize, to_idx: usize },
    Node { step: u64, node_idx: usize, event: NodeEvent },
}

/// Simulated node wrapper
#[derive(Debug)]
struct SimNode {
    node: Node,
    radio: SimRadio,
    bin: SimBin,
    position: NodePosition,
}

/// Multi-node mesh network simulator
#[derive(Debug)]
pub struct MeshSimulator {
    config: SimConfig,
    nodes: Vec<SimNode>,
    step_count: u64,
    /// Virtual time origin
    start_time: Instant,
    rng: StdRng,
    stats: SimStats,
    event_log: Vec<SimEvent>,
}

impl MeshSimulator {
    /// Create a new simulator with the given configuration
    pub fn new(config: SimConfig) -> MeshResult<Self> {
        config.validate()?;
        let mut sim = Self {
            nodes: Vec::new(),
            step_count: 0,
            start_time: Instant::now(),
            rng: StdRng::seed_from_u64(config.seed),
            stats: SimStats::default(),
            event_log: Vec::new(),
            config,
        };
        sim.initialize_nodes()?;
        Ok(sim)
    }

    fn initialize_nodes(&mut self) -> MeshResult<()> {
        for (i, position) in self.config.positions().into_iter().enumerate() {
            let mut node_config = self.config.node.clone();
            node_config.node_id = NodeId::new(i as u8);
            let node = Node::new(node_config)?;

            // The root collects, it does not fill
            let fill_rate = if node.is_root() {
                0.0
            } else {
                self.rng
                    .gen_range(self.config.fill_rate_min..=self.config.fill_rate_max)
            };

            debug!(node = %node.node_id(), x = position.x, y = position.y, fill_rate, "node joined");
            self.event_log.push(SimEvent::NodeJoined {
                node_idx: i,
                node_id: node.node_id(),
                position,
            });
            self.nodes.push(SimNode {
                node,
                radio: SimRadio::new(),
                bin: SimBin::new(fill_rate),
                position,
            });
        }
        self.stats.per_node = vec![NodeStats::default(); self.nodes.len()];
        Ok(())
    }

    /// Current virtual time
    pub fn now(&self) -> Instant {
        self.start_time + self.config.step() * self.step_count as u32
    }

    /// Run one simulation step
    pub fn step(&mut self) {
        self.step_count += 1;
        let now = self.now();

        // 1. Poll every node once
        for i in 0..self.nodes.len() {
            let sim_node = &mut self.nodes[i];
            let events = sim_node.node.poll(&mut sim_node.radio, &mut sim_node.bin, now);
            for event in events {
                self.record_event(i, event);
            }
        }

        // 2. Put everything sent this step on the air
        for i in 0..self.nodes.len() {
            let frames = self.nodes[i].radio.take_sent();
            for frame in frames {
                self.broadcast(i, frame);
            }
        }

        self.refresh_stats();
    }

    fn record_event(&mut self, node_idx: usize, event: NodeEvent) {
        let node_id = self.nodes[node_idx].node.node_id();
        match &event {
            NodeEvent::AlertRaised { .. } => self.stats.alerts_raised += 1,
            NodeEvent::AlertDelivered { .. } => self.stats.alerts_delivered += 1,
            NodeEvent::AlertAcknowledged { alert_node, .. } if *alert_node == node_id => {
                self.stats.alerts_acknowledged += 1
            }
            NodeEvent::AlertFailed { .. } => self.stats.alerts_failed += 1,
            NodeEvent::AlertDropped { .. } => self.stats.alerts_dropped += 1,
            _ => {}
        }
        trace!(step = self.step_count, node = %node_id, ?event, "node event");
        self.event_log.push(SimEvent::Node {
            step: self.step_count,
            node_idx,
            event,
        });
    }

    /// Deliver a frame to every other node in range
    fn broadcast(&mut self, source_idx: usize, frame: Vec<u8>) {
        self.stats.packets_transmitted += 1;
        self.event_log.push(SimEvent::PacketTransmitted {
            step: self.step_count,
            node_idx: source_idx,
            size: frame.len(),
        });

        let source_pos = self.nodes[source_idx].position;
        for i in 0..self.nodes.len() {
            if i == source_idx || source_pos.distance_to(&self.nodes[i].position) > self.config.radio_range {
                continue;
            }
            if self.config.loss_rate > 0.0 && self.rng.gen_bool(self.config.loss_rate) {
                self.stats.packets_lost += 1;
                self.event_log.push(SimEvent::PacketLost {
                    step: self.step_count,
                    from_idx: source_idx,
                    to_idx: i,
                });
                continue;
            }
            self.stats.packets_received += 1;
            self.nodes[i].radio.deliver(frame.clone());
        }
    }

    fn refresh_stats(&mut self) {
        self.stats.steps = self.step_count;
        for (slot, sim_node) in self.stats.per_node.iter_mut().zip(&self.nodes) {
            *slot = sim_node.node.stats().clone();
        }
    }

    /// Run simulation for a number of steps
    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Run simulation until a condition is met or max steps reached
    ///
    /// Returns whether the condition was met.
    pub fn run_until<F>(&mut self, max_steps: u64, condition: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        for _ in 0..max_steps {
            self.step();
            if condition(self) {
                return true;
            }
        }
        false
    }

    /// Stop every bin from filling further
    pub fn freeze_bins(&mut self) {
        for sim_node in &mut self.nodes {
            sim_node.bin.set_fill_rate(0.0);
        }
    }

    pub fn set_fill_rate(&mut self, idx: usize, rate: f64) {
        if let Some(sim_node) = self.nodes.get_mut(idx) {
            sim_node.bin.set_fill_rate(rate);
        }
    }

    /// No alert is queued anywhere and no frame is waiting to be received
    pub fn is_idle(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| n.node.queue().is_empty() && n.radio.inbox_len() == 0 && n.node.outbox_len() == 0)
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.event_log
    }

    /// Events one node reported, in order
    pub fn node_events(&self, idx: usize) -> impl Iterator<Item = &NodeEvent> + '_ {
        self.event_log.iter().filter_map(move |e| match e {
            SimEvent::Node { node_idx, event, .. } if *node_idx == idx => Some(event),
            _ => None,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx).map(|n| &n.node)
    }

    pub fn node_position(&self, idx: usize) -> Option<NodePosition> {
        self.nodes.get(idx).map(|n| n.position)
    }

    pub fn bin_level(&self, idx: usize) -> Option<u8> {
        self.nodes.get(idx).map(|n| n.bin.level())
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Indices of the nodes within radio range of `idx`
    pub fn neighbors(&self, idx: usize) -> Vec<usize> {
        let Some(origin) = self.nodes.get(idx).map(|n| n.position) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .enumerate()
            .filter(|(j, n)| *j != idx && origin.distance_to(&n.position) <= self.config.radio_range)
            .map(|(j, _)| j)
            .collect()
    }

    /// Check if every node can reach the root over radio range
    pub fn is_connected(&self) -> bool {
        if self.nodes.is_empty() {
            return true;
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![0usize];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;

            for neighbor in self.neighbors(node) {
                if !visited[neighbor] {
                    stack.push(neighbor);
                }
            }
        }

        visited.iter().all(|&v| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_position_distance() {
        let p1 = NodePosition::new(0.0, 0.0);
        let p2 = NodePosition::new(3.0, 4.0);
        assert!((p1.distance_to(&p2) - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_sim_radio_busy() {
        let mut radio = SimRadio::new();
        radio.set_busy(true);
        assert_eq!(radio.send(&[1, 2, 3]), Err(TransportError::Busy));
        radio.set_busy(false);
        assert!(radio.send(&[1, 2, 3]).is_ok());
        assert_eq!(radio.take_sent(), vec![vec![1, 2, 3]]);
        assert!(radio.sent().is_empty());
    }

    #[test]
    fn test_sim_bin_fills_and_empties() {
        let mut bin = SimBin::new(40.0);
        assert_eq!(bin.read_capacity(), 40);
        assert_eq!(bin.read_capacity(), 80);
        assert_eq!(bin.read_capacity(), 100);
        assert_eq!(bin.read_capacity(), 0);
    }

    #[test]
    fn test_simulator_creation() {
        let sim = MeshSimulator::new(SimConfig::default().with_node_count(5)).unwrap();
        assert_eq!(sim.node_count(), 5);
        assert!(sim.node(0).unwrap().is_root());
        assert_eq!(sim.node(3).unwrap().node_id(), NodeId::new(3));
        assert!(sim.is_connected());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(MeshSimulator::new(SimConfig::default().with_node_count(0)).is_err());
        assert!(MeshSimulator::new(SimConfig::default().with_node_count(300)).is_err());
        assert!(MeshSimulator::new(SimConfig::default().with_loss_rate(1.5)).is_err());
        assert!(MeshSimulator::new(SimConfig::default().with_fill_rate(5.0, 1.0)).is_err());
        assert!(MeshSimulator::new(SimConfig::default().with_fill_rate(1.0, f64::NAN)).is_err());
        assert!(MeshSimulator::new(SimConfig::default().with_fill_rate(f64::NAN, 5.0)).is_err());
        assert!(MeshSimulator::new(SimConfig::default().with_fill_rate(1.0, f64::INFINITY)).is_err());
        assert!(MeshSimulator::new(SimConfig::default().with_loss_rate(f64::NAN)).is_err());
    }

    #[test]
    fn test_line_topology() {
        let sim = MeshSimulator::new(SimConfig::default().with_node_count(4)).unwrap();
        assert_eq!(sim.neighbors(0), vec![1]);
        assert_eq!(sim.neighbors(2), vec![1, 3]);
    }

    #[test]
    fn test_far_nodes_not_connected() {
        let config = SimConfig::default()
            .with_positions(vec![NodePosition::new(0.0, 0.0), NodePosition::new(100_000.0, 0.0)]);
        let mut sim = MeshSimulator::new(config).unwrap();
        assert!(!sim.is_connected());

        sim.run(5);
        assert!(sim.node(1).unwrap().routing_table().is_empty());
        assert_eq!(sim.stats().packets_received, 0);
    }

    #[test]
    fn test_discovery_builds_routes() {
        let mut sim = MeshSimulator::new(SimConfig::default().with_node_count(3).with_fill_rate(0.0, 0.0)).unwrap();
        sim.run(10);

        assert_eq!(sim.node(1).unwrap().routing_table().next_hop(), Some(NodeId::ROOT));
        assert_eq!(sim.node(2).unwrap().routing_table().next_hop(), Some(NodeId::new(1)));
        assert_eq!(sim.step_count(), 10);
        assert_eq!(sim.now() - sim.start_time, Duration::from_secs(10));
    }

    #[test]
    fn test_alert_reaches_root() {
        let mut sim = MeshSimulator::new(SimConfig::default().with_node_count(3).with_fill_rate(0.0, 0.0)).unwrap();
        sim.set_fill_rate(2, 10.0);

        let delivered = sim.run_until(100, |s| s.stats().alerts_delivered > 0);
        assert!(delivered);
        assert!(sim.node_events(0).any(|e| matches!(
            e,
            NodeEvent::AlertDelivered { alert_node, .. } if *alert_node == NodeId::new(2)
        )));
    }
}
