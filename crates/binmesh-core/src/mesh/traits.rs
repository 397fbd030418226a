//! Collaborator traits, errors, configuration and statistics
//!
//! The forwarding engine only needs two things from the outside world: a
//! radio that can send a frame and be polled for the next received one, and
//! a sensor that reports the local fill level. Everything else (radio driver
//! setup, displays, uplinks) stays behind these traits.

use super::packet::{DecodeError, NodeId, DEFAULT_AUTH_KEY, MAX_BIN_CAPACITY};
use super::queue::{QueueFull, DEFAULT_MAX_CAPACITY_PACKETS};
use super::routing::DEFAULT_MAX_NODES;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure to put a frame on the air
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Half-duplex link is busy (transmitting or receiving)
    #[error("radio busy")]
    Busy,
    /// Driver-level failure
    #[error("radio error: {0}")]
    Radio(String),
}

/// Errors that can occur in mesh operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Received frame could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Alert queue is at capacity
    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    /// Frame could not be sent
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Routing table has no usable forward node
    #[error("no route towards root from node {0}")]
    NoRoute(NodeId),

    /// Next hop answered with `Ack::Failure`
    #[error("next hop {0} reported failure")]
    AckFailure(NodeId),

    /// Next hop never acknowledged
    #[error("no acknowledgment from next hop {0}")]
    AckTimeout(NodeId),

    /// Configuration rejected at startup
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Raw frame access to the shared radio link
pub trait RadioTransport {
    /// Send one frame (best effort; may fail while the link is busy)
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Next received frame, if any. Never blocks.
    fn try_receive(&mut self) -> Option<Vec<u8>>;
}

/// Local fill-level sensor
pub trait CapacitySensor {
    /// Current fill level in percent (0-100)
    fn read_capacity(&mut self) -> u8;
}

impl<T: RadioTransport + ?Sized> RadioTransport for &mut T {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn try_receive(&mut self) -> Option<Vec<u8>> {
        (**self).try_receive()
    }
}

impl<S: CapacitySensor + ?Sized> CapacitySensor for &mut S {
    fn read_capacity(&mut self) -> u8 {
        (**self).read_capacity()
    }
}

/// Fixed reading, useful for tests and bench setups
impl CapacitySensor for u8 {
    fn read_capacity(&mut self) -> u8 {
        *self
    }
}

/// Per-node counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Frames pulled from the radio
    pub frames_rx: u64,
    /// Frames dropped as malformed
    pub malformed_dropped: u64,
    /// Frames dropped for a wrong auth key
    pub auth_dropped: u64,
    /// Alerts dropped because they were addressed to another node
    pub misaddressed_dropped: u64,
    /// Frames handed to the radio successfully
    pub packets_tx: u64,
    /// Sends the radio refused
    pub send_failures: u64,
    /// Alerts raised from the local sensor
    pub alerts_raised: u64,
    /// Alert transmissions towards a next hop (including retries)
    pub alerts_forwarded: u64,
    /// Alerts consumed at the root
    pub alerts_delivered: u64,
    /// Queued alerts removed after `Ack::Succeed`
    pub alerts_acknowledged: u64,
    /// Queued alerts given up on
    pub alerts_failed: u64,
    /// Incoming alerts dropped on a full queue
    pub alerts_dropped: u64,
    /// Acknowledgments sent
    pub acks_sent: u64,
    /// Acknowledgments received
    pub acks_received: u64,
    /// Acknowledgments with no matching queued alert
    pub acks_unmatched: u64,
    /// Forward-node requests broadcast
    pub discovery_requests: u64,
    /// Forward-node responses sent
    pub discovery_responses: u64,
    /// Forward nodes added to the routing table
    pub routes_learned: u64,
    /// Control packets lost because the outbox was full
    pub outbox_dropped: u64,
}

/// Configuration for a mesh node, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's ID (0 = root/collector)
    pub node_id: NodeId,
    /// Shared secret carried by every frame
    pub auth_key: u8,
    /// Routing table capacity
    pub max_nodes: usize,
    /// Alert queue capacity
    pub max_capacity_packets: usize,
    /// Fill level (percent) at which an alert is raised
    pub alert_threshold: u8,
    /// Forward-node discovery interval in seconds
    pub discovery_interval_secs: u64,
    /// How long to wait for a hop acknowledgment in milliseconds
    pub ack_timeout_ms: u64,
    /// Sensor sampling interval in milliseconds
    pub sample_interval_ms: u64,
    /// Control packets kept for retry when the radio is busy
    pub outbox_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(1),
            auth_key: DEFAULT_AUTH_KEY,
            max_nodes: DEFAULT_MAX_NODES,
            max_capacity_packets: DEFAULT_MAX_CAPACITY_PACKETS,
            alert_threshold: 80,
            discovery_interval_secs: 600, // 10 minutes
            ack_timeout_ms: 30_000,
            sample_interval_ms: 60_000,
            outbox_capacity: 16,
        }
    }
}

impl NodeConfig {
    /// Default configuration for the given node
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Default configuration for the root/collector
    pub fn root() -> Self {
        Self::new(NodeId::ROOT)
    }

    pub fn with_auth_key(mut self, auth_key: u8) -> Self {
        self.auth_key = auth_key;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_max_capacity_packets(mut self, max: usize) -> Self {
        self.max_capacity_packets = max;
        self
    }

    pub fn with_alert_threshold(mut self, threshold: u8) -> Self {
        self.alert_threshold = threshold;
        self
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval_secs = interval.as_secs();
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Reject configurations the node cannot run with
    pub fn validate(&self) -> MeshResult<()> {
        if self.max_nodes == 0 {
            return Err(MeshError::InvalidConfig("max_nodes must be at least 1".into()));
        }
        if self.max_capacity_packets == 0 {
            return Err(MeshError::InvalidConfig(
                "max_capacity_packets must be at least 1".into(),
            ));
        }
        if self.alert_threshold > MAX_BIN_CAPACITY {
            return Err(MeshError::InvalidConfig(format!(
                "alert_threshold {} exceeds {}",
                self.alert_threshold, MAX_BIN_CAPACITY
            )));
        }
        Ok(())
    }
}
