//! Bin fill-level mesh forwarding protocol
//!
//! Nodes measure a local fill level and relay capacity alerts hop by hop to a
//! single root/collector (node 0) over a shared half-duplex radio link. The
//! architecture separates concerns into:
//!
//! - **Packet**: fixed-size wire formats and the authenticating codec
//! - **Routing**: bounded table of forward-node candidates
//! - **Queue**: bounded FIFO of alerts in custody of a node
//! - **Node**: the forwarding engine driven by a polling loop
//! - **Traits**: radio/sensor seams, errors, configuration and counters
//! - **Simulation**: in-memory radio medium for many nodes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     CapacitySensor / application                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │ read_capacity
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Node (forwarding engine)                         │
//! │  ┌──────────────┐  ┌────────────────────┐  ┌─────────────────────────┐  │
//! │  │ RoutingTable │  │ CapacityAlertQueue │  │ outbox, timers, stats   │  │
//! │  └──────────────┘  └────────────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │ Packet
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  PacketCodec ([msgType, authKey, payload])              │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │ bytes
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                RadioTransport (send / try_receive)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use binmesh_core::mesh::{Node, NodeConfig, NodeId};
//!
//! let mut node = Node::new(NodeConfig::new(NodeId::new(2)))?;
//! loop {
//!     for event in node.poll(&mut radio, &mut sensor, Instant::now()) {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod traits;
pub mod packet;
pub mod routing;
pub mod queue;
pub mod node;
pub mod simulation;

// Re-export main types
pub use traits::{
    CapacitySensor, MeshError, MeshResult, NodeConfig, NodeStats, RadioTransport, TransportError,
};
pub use packet::{
    Ack, AckKind, CapacityAlert, DecodeError, MessageType, NodeAnnounce, NodeId, Packet, PacketCodec,
    DEFAULT_AUTH_KEY, MAX_BIN_CAPACITY,
};
pub use routing::{RoutingTable, DEFAULT_MAX_NODES};
pub use queue::{AlertState, CapacityAlertQueue, QueueFull, QueuedAlert, DEFAULT_MAX_CAPACITY_PACKETS};
pub use node::{Node, NodeEvent};
pub use simulation::{MeshSimulator, NodePosition, SimBin, SimConfig, SimEvent, SimRadio, SimStats};
