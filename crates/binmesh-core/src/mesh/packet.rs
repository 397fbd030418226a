//! Mesh packet types and framing
//!
//! Every frame on the air is a fixed-size byte layout selected by its first
//! byte. The second byte is the shared authentication key; frames carrying
//! any other key are rejected before the forwarding engine ever sees them.
//!
//! ## Packet Structure
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────────────────┐
//! │ MsgType (1B) │ AuthKey (1B) │ Payload (fixed size per MsgType)     │
//! └──────────────┴──────────────┴──────────────────────────────────────┘
//!
//! CapacityAlert (3):        alert | sender | receiver | capacity   (6B)
//! Ack Succeed/Failure (4/5): alert | receiver                       (4B)
//! ForwardNode Req/Res (10/14): node                                  (3B)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default shared secret carried by every legitimate frame
pub const DEFAULT_AUTH_KEY: u8 = 0x01;

/// Highest valid fill level (percent)
pub const MAX_BIN_CAPACITY: u8 = 100;

/// Node identifier - a single byte, 0 is the root/collector
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u8);

impl NodeId {
    /// The root/collector node
    pub const ROOT: NodeId = NodeId(0);

    /// Create a NodeId from its raw byte
    pub const fn new(id: u8) -> Self {
        NodeId(id)
    }

    /// Get the raw byte
    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    /// Check if this is the root/collector node
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl From<u8> for NodeId {
    fn from(id: u8) -> Self {
        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire discriminant (first byte of every frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Fill-level alert in transit
    Capacity = 3,
    /// Hop delivered successfully
    AckSucceed = 4,
    /// Hop could not be delivered
    AckFailure = 5,
    /// Ask neighbors to announce themselves
    ForwardNodeRequest = 10,
    /// Announce self as a forwarding candidate
    ForwardNodeResponse = 14,
}

impl MessageType {
    /// Create from byte value
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            3 => Some(MessageType::Capacity),
            4 => Some(MessageType::AckSucceed),
            5 => Some(MessageType::AckFailure),
            10 => Some(MessageType::ForwardNodeRequest),
            14 => Some(MessageType::ForwardNodeResponse),
            _ => None,
        }
    }

    /// Total frame length (tag + auth key + payload) for this type
    pub fn frame_len(&self) -> usize {
        match self {
            MessageType::Capacity => CapacityAlert::FRAME_LEN,
            MessageType::AckSucceed | MessageType::AckFailure => Ack::FRAME_LEN,
            MessageType::ForwardNodeRequest | MessageType::ForwardNodeResponse => NodeAnnounce::FRAME_LEN,
        }
    }
}

/// Outcome carried by an acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckKind {
    Succeed,
    Failure,
}

impl AckKind {
    fn message_type(&self) -> MessageType {
        match self {
            AckKind::Succeed => MessageType::AckSucceed,
            AckKind::Failure => MessageType::AckFailure,
        }
    }
}

/// Forward-node discovery payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnounce {
    pub node: NodeId,
}

impl NodeAnnounce {
    pub const FRAME_LEN: usize = 3;

    pub fn new(node: NodeId) -> Self {
        Self { node }
    }
}

/// A fill-level report travelling towards the root
///
/// `alert_node` is the original reporter and never changes. `sender_node`
/// and `receiver_node` are rewritten at every hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityAlert {
    alert_node: NodeId,
    pub sender_node: NodeId,
    pub receiver_node: NodeId,
    bin_capacity: u8,
}

impl CapacityAlert {
    pub const FRAME_LEN: usize = 6;

    /// Create a new alert; capacity is clamped to 0-100
    pub fn new(alert_node: NodeId, sender_node: NodeId, receiver_node: NodeId, bin_capacity: u8) -> Self {
        Self {
            alert_node,
            sender_node,
            receiver_node,
            bin_capacity: bin_capacity.min(MAX_BIN_CAPACITY),
        }
    }

    /// Original reporter of this alert
    pub fn alert_node(&self) -> NodeId {
        self.alert_node
    }

    /// Reported fill level (percent)
    pub fn bin_capacity(&self) -> u8 {
        self.bin_capacity
    }

    /// Copy of this alert addressed for the next hop
    pub fn readdressed(&self, sender_node: NodeId, receiver_node: NodeId) -> Self {
        Self {
            sender_node,
            receiver_node,
            ..*self
        }
    }
}

/// Acknowledgement of one hop of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub alert_node: NodeId,
    pub receiver_node: NodeId,
    pub kind: AckKind,
}

impl Ack {
    pub const FRAME_LEN: usize = 4;

    pub fn succeed(alert_node: NodeId, receiver_node: NodeId) -> Self {
        Self { alert_node, receiver_node, kind: AckKind::Succeed }
    }

    pub fn failure(alert_node: NodeId, receiver_node: NodeId) -> Self {
        Self { alert_node, receiver_node, kind: AckKind::Failure }
    }
}

/// A decoded mesh packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    ForwardNodeRequest(NodeAnnounce),
    ForwardNodeResponse(NodeAnnounce),
    CapacityAlert(CapacityAlert),
    Ack(Ack),
}

impl Packet {
    /// Wire discriminant for this packet
    pub fn message_type(&self) -> MessageType {
        match self {
            Packet::ForwardNodeRequest(_) => MessageType::ForwardNodeRequest,
            Packet::ForwardNodeResponse(_) => MessageType::ForwardNodeResponse,
            Packet::CapacityAlert(_) => MessageType::Capacity,
            Packet::Ack(ack) => ack.kind.message_type(),
        }
    }

    /// Serialize to the fixed wire layout with the given auth key
    pub fn to_bytes(&self, auth_key: u8) -> Vec<u8> {
        let msg_type = self.message_type();
        let mut bytes = Vec::with_capacity(msg_type.frame_len());
        bytes.push(msg_type as u8);
        bytes.push(auth_key);
        match self {
            Packet::ForwardNodeRequest(announce) | Packet::ForwardNodeResponse(announce) => {
                bytes.push(announce.node.as_u8());
            }
            Packet::CapacityAlert(alert) => {
                bytes.push(alert.alert_node.as_u8());
                bytes.push(alert.sender_node.as_u8());
                bytes.push(alert.receiver_node.as_u8());
                bytes.push(alert.bin_capacity);
            }
            Packet::Ack(ack) => {
                bytes.push(ack.alert_node.as_u8());
                bytes.push(ack.receiver_node.as_u8());
            }
        }
        bytes
    }

    /// Deserialize from the wire, checking length and auth key
    pub fn from_bytes(bytes: &[u8], auth_key: u8) -> Result<Self, DecodeError> {
        let (&tag, _) = bytes.split_first().ok_or(DecodeError::Malformed {
            tag: None,
            len: 0,
        })?;
        let msg_type = MessageType::from_byte(tag).ok_or(DecodeError::Malformed {
            tag: Some(tag),
            len: bytes.len(),
        })?;
        if bytes.len() != msg_type.frame_len() {
            return Err(DecodeError::Malformed {
                tag: Some(tag),
                len: bytes.len(),
            });
        }
        if bytes[1] != auth_key {
            return Err(DecodeError::BadAuth { found: bytes[1] });
        }

        let packet = match msg_type {
            MessageType::ForwardNodeRequest => Packet::ForwardNodeRequest(NodeAnnounce::new(bytes[2].into())),
            MessageType::ForwardNodeResponse => Packet::ForwardNodeResponse(NodeAnnounce::new(bytes[2].into())),
            MessageType::Capacity => {
                if bytes[5] > MAX_BIN_CAPACITY {
                    return Err(DecodeError::Malformed {
                        tag: Some(tag),
                        len: bytes.len(),
                    });
                }
                Packet::CapacityAlert(CapacityAlert::new(
                    bytes[2].into(),
                    bytes[3].into(),
                    bytes[4].into(),
                    bytes[5],
                ))
            }
            MessageType::AckSucceed => Packet::Ack(Ack::succeed(bytes[2].into(), bytes[3].into())),
            MessageType::AckFailure => Packet::Ack(Ack::failure(bytes[2].into(), bytes[3].into())),
        };
        Ok(packet)
    }
}

/// Errors produced while decoding a received frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Unknown tag, wrong length for the tag, or out-of-range field
    #[error("malformed frame (tag {tag:?}, {len} bytes)")]
    Malformed { tag: Option<u8>, len: usize },

    /// Auth key does not match the shared secret
    #[error("bad auth key 0x{found:02x}")]
    BadAuth { found: u8 },
}

/// Stateless encoder/decoder bound to the mesh's shared secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    auth_key: u8,
}

impl PacketCodec {
    pub fn new(auth_key: u8) -> Self {
        Self { auth_key }
    }

    pub fn auth_key(&self) -> u8 {
        self.auth_key
    }

    pub fn encode(&self, packet: &Packet) -> Vec<u8> {
        packet.to_bytes(self.auth_key)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Packet, DecodeError> {
        Packet::from_bytes(bytes, self.auth_key)
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_KEY)
    }
}
