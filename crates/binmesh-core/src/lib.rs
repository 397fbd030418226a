//! # BinMesh Core
//!
//! Multi-hop forwarding of bin fill-level alerts over a shared long-range
//! radio link.
//!
//! ## Overview
//!
//! Every node samples a local fill level. Crossing the alert threshold
//! produces a capacity alert that travels hop by hop towards the root
//! (node 0), each hop acknowledging the previous one. Forward nodes are
//! learned with a request/response discovery exchange. This crate contains
//! the whole protocol core:
//!
//! - **Packet Codec**: fixed binary frames with a shared auth byte
//! - **Routing Table**: bounded FIFO of known forward nodes
//! - **Capacity Alert Queue**: bounded FIFO of alerts awaiting delivery
//! - **Forwarding Engine**: the per-node state machine ([`Node`])
//! - **Simulation**: many nodes on an in-memory radio medium
//!
//! ## Packet Flow
//!
//! ```text
//! sensor ≥ threshold → CapacityAlert{n,n,hop} → hop → ... → root
//! root → Ack(Succeed) → hop → Ack(Succeed) → ... → origin
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use binmesh_core::{Node, NodeConfig, NodeId, SimRadio};
//! use std::time::Instant;
//!
//! let mut node = Node::new(NodeConfig::new(NodeId::new(2))).unwrap();
//! let mut radio = SimRadio::new();
//! let mut fill_level: u8 = 85;
//!
//! let events = node.poll(&mut radio, &mut fill_level, Instant::now());
//! println!("{:?}", events);
//! ```

pub mod mesh;

// Re-export main types
pub use mesh::{
    Ack, AckKind, CapacityAlert, CapacitySensor, DecodeError, MeshError, MeshResult, MeshSimulator, Node,
    NodeConfig, NodeEvent, NodeId, NodeStats, Packet, PacketCodec, RadioTransport, SimConfig, SimRadio,
    TransportError,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::mesh::{
        CapacitySensor, MeshError, MeshResult, Node, NodeConfig, NodeEvent, NodeId, Packet, PacketCodec,
        RadioTransport,
    };
}
