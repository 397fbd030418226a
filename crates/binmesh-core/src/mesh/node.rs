//! Forwarding engine
//!
//! A [`Node`] owns all protocol state of one mesh participant and is driven by
//! a single cooperative loop calling [`Node::poll`]. Each poll:
//!
//! 1. retries control packets the radio refused last time
//! 2. takes at most one received frame, decodes and dispatches it
//! 3. samples the fill-level sensor when the sample interval has elapsed
//! 4. services the alert queue: forwards `Pending` alerts, expires acks, and
//!    broadcasts a forward-node request when discovery is due
//!
//! ```text
//!        try_receive ──► decode ──► dispatch ──┬─► CapacityAlert ─► root: Ack(Succeed)
//!                                              │                    relay: queue ─► forward
//!                                              ├─► Ack ───────────► remove / retry / fail
//!                                              ├─► FwdNodeRequest ► FwdNodeResponse(self)
//!                                              └─► FwdNodeResponse► routing table
//! ```
//!
//! A relay acknowledges its upstream sender with `Succeed` as soon as it has
//! taken custody of an alert (queued it), before it has a route of its own.
//! From then on delivery is the relay's responsibility; a later failure is
//! reported locally. A full queue drops the alert silently and the sender's
//! ack timeout covers it.

use super::packet::{
    Ack, AckKind, CapacityAlert, DecodeError, NodeAnnounce, NodeId, Packet, PacketCodec, MAX_BIN_CAPACITY,
};
use super::queue::{AlertState, CapacityAlertQueue};
use super::routing::RoutingTable;
use super::traits::{
    CapacitySensor, MeshError, MeshResult, NodeConfig, NodeStats, RadioTransport, TransportError,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Something the local application may want to know about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NodeEvent {
    /// Local fill level crossed the threshold
    AlertRaised { bin_capacity: u8 },
    /// Root consumed an alert
    AlertDelivered {
        alert_node: NodeId,
        from: NodeId,
        bin_capacity: u8,
    },
    /// A queued alert was acknowledged by its next hop
    AlertAcknowledged { alert_node: NodeId, next_hop: NodeId },
    /// A queued alert was given up on
    AlertFailed {
        alert_node: NodeId,
        #[serde(skip)]
        reason: MeshError,
    },
    /// An alert could not be queued
    AlertDropped { alert_node: NodeId },
    /// A forward node was added to the routing table
    RouteLearned { node: NodeId, evicted: Option<NodeId> },
    /// A forward-node request was broadcast
    DiscoveryStarted,
}

/// One mesh participant: routing table, alert queue and protocol state
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    codec: PacketCodec,
    routing: RoutingTable,
    queue: CapacityAlertQueue,
    /// Control packets waiting for the radio
    outbox: VecDeque<Packet>,
    /// Last sampled fill level
    bin_capacity: u8,
    /// An alert was raised for the current above-threshold episode
    alert_sent: bool,
    last_discovery: Option<Instant>,
    last_sample: Option<Instant>,
    stats: NodeStats,
    events: Vec<NodeEvent>,
}

impl Node {
    /// Create a node from a validated configuration
    pub fn new(config: NodeConfig) -> MeshResult<Self> {
        config.validate()?;
        Ok(Self {
            codec: PacketCodec::new(config.auth_key),
            routing: RoutingTable::new(config.max_nodes),
            queue: CapacityAlertQueue::new(config.max_capacity_packets),
            outbox: VecDeque::with_capacity(config.outbox_capacity),
            bin_capacity: 0,
            alert_sent: false,
            last_discovery: None,
            last_sample: None,
            stats: NodeStats::default(),
            events: Vec::new(),
            config,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn is_root(&self) -> bool {
        self.config.node_id.is_root()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn queue(&self) -> &CapacityAlertQueue {
        &self.queue
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn bin_capacity(&self) -> u8 {
        self.bin_capacity
    }

    pub fn alert_sent(&self) -> bool {
        self.alert_sent
    }

    pub fn last_discovery(&self) -> Option<Instant> {
        self.last_discovery
    }

    /// Control packets still waiting for the radio
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Drain events accumulated since the last call
    pub fn take_events(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.events)
    }

    /// Run one iteration of the node's scheduling loop
    pub fn poll<R, S>(&mut self, radio: &mut R, sensor: &mut S, now: Instant) -> Vec<NodeEvent>
    where
        R: RadioTransport + ?Sized,
        S: CapacitySensor + ?Sized,
    {
        self.flush_outbox(radio);

        if let Some(frame) = radio.try_receive() {
            // Drops are counted and logged inside
            let _ = self.handle_frame(radio, &frame, now);
        }

        let sample_due = self
            .last_sample
            .map_or(true, |t| now.saturating_duration_since(t) >= self.config.sample_interval());
        if sample_due {
            let capacity = sensor.read_capacity();
            self.last_sample = Some(now);
            self.update_capacity(radio, capacity, now);
        }

        self.service(radio, now);
        self.take_events()
    }

    /// Decode a raw frame and dispatch it
    ///
    /// Frames that fail to decode are dropped without touching any state
    /// other than the drop counters.
    pub fn handle_frame<R>(&mut self, radio: &mut R, frame: &[u8], now: Instant) -> Result<(), DecodeError>
    where
        R: RadioTransport + ?Sized,
    {
        self.stats.frames_rx += 1;
        match self.codec.decode(frame) {
            Ok(packet) => {
                self.handle_packet(radio, packet, now);
                Ok(())
            }
            Err(err) => {
                match err {
                    DecodeError::Malformed { .. } => self.stats.malformed_dropped += 1,
                    DecodeError::BadAuth { .. } => self.stats.auth_dropped += 1,
                }
                debug!(node = %self.node_id(), error = %err, "dropping frame");
                Err(err)
            }
        }
    }

    /// Dispatch an authenticated packet
    pub fn handle_packet<R>(&mut self, radio: &mut R, packet: Packet, now: Instant)
    where
        R: RadioTransport + ?Sized,
    {
        trace!(node = %self.node_id(), ?packet, "received");
        match packet {
            Packet::CapacityAlert(alert) => self.on_capacity_alert(radio, alert, now),
            Packet::Ack(ack) => self.on_ack(radio, ack, now),
            Packet::ForwardNodeRequest(announce) => self.on_forward_node_request(radio, announce),
            Packet::ForwardNodeResponse(announce) => self.on_forward_node_response(announce),
        }
    }

    /// Record a new sensor reading, raising an alert on a threshold crossing
    pub fn update_capacity<R>(&mut self, radio: &mut R, capacity: u8, now: Instant)
    where
        R: RadioTransport + ?Sized,
    {
        self.bin_capacity = capacity.min(MAX_BIN_CAPACITY);
        if self.bin_capacity >= self.config.alert_threshold {
            if !self.alert_sent {
                self.raise_alert(radio, now);
            }
        } else if self.alert_sent {
            debug!(node = %self.node_id(), capacity = self.bin_capacity, "below threshold, alert cycle reset");
            self.alert_sent = false;
        }
    }

    /// Periodic work: due discovery, forwarding of pending alerts, ack expiry
    pub fn service<R>(&mut self, radio: &mut R, now: Instant)
    where
        R: RadioTransport + ?Sized,
    {
        if !self.is_root() {
            let discovery_due = self
                .last_discovery
                .map_or(true, |t| now.saturating_duration_since(t) >= self.config.discovery_interval());
            if discovery_due {
                self.start_discovery(radio, now);
            }
        }

        let ack_timeout = self.config.ack_timeout();
        let mut idx = 0;
        while let Some(entry) = self.queue.get(idx).copied() {
            match entry.state {
                AlertState::Pending => {
                    // Still no route: wait for the next discovery round
                    let _ = self.forward(radio, idx, now);
                }
                AlertState::AwaitingAck { next_hop, sent_at } => {
                    if now.saturating_duration_since(sent_at) >= ack_timeout {
                        debug!(
                            node = %self.node_id(),
                            alert = %entry.alert.alert_node(),
                            %next_hop,
                            "ack timeout"
                        );
                        if self.retry_or_fail(radio, idx, MeshError::AckTimeout(next_hop), now) {
                            continue;
                        }
                    }
                }
            }
            idx += 1;
        }
    }

    fn on_capacity_alert<R>(&mut self, radio: &mut R, alert: CapacityAlert, now: Instant)
    where
        R: RadioTransport + ?Sized,
    {
        let node_id = self.node_id();
        if alert.receiver_node != node_id {
            self.stats.misaddressed_dropped += 1;
            trace!(node = %node_id, receiver = %alert.receiver_node, "alert for another node");
            return;
        }

        if self.is_root() {
            self.stats.alerts_delivered += 1;
            info!(
                alert = %alert.alert_node(),
                from = %alert.sender_node,
                capacity = alert.bin_capacity(),
                "alert delivered to root"
            );
            self.events.push(NodeEvent::AlertDelivered {
                alert_node: alert.alert_node(),
                from: alert.sender_node,
                bin_capacity: alert.bin_capacity(),
            });
            self.send_control(radio, Packet::Ack(Ack::succeed(alert.alert_node(), alert.sender_node)));
            return;
        }

        if let Err(full) = self.queue.push_from(alert, Some(alert.sender_node)) {
            self.stats.alerts_dropped += 1;
            warn!(node = %node_id, alert = %alert.alert_node(), error = %full, "dropping incoming alert");
            self.events.push(NodeEvent::AlertDropped {
                alert_node: alert.alert_node(),
            });
            return;
        }

        // Custody taken: release the upstream hop before routing
        debug!(node = %node_id, alert = %alert.alert_node(), upstream = %alert.sender_node, "alert accepted");
        self.send_control(radio, Packet::Ack(Ack::succeed(alert.alert_node(), alert.sender_node)));

        let idx = self.queue.len() - 1;
        self.forward_now(radio, idx, now);
    }

    fn on_ack<R>(&mut self, radio: &mut R, ack: Ack, now: Instant)
    where
        R: RadioTransport + ?Sized,
    {
        let node_id = self.node_id();
        if ack.receiver_node != node_id {
            trace!(node = %node_id, receiver = %ack.receiver_node, "ack for another node");
            return;
        }
        self.stats.acks_received += 1;

        let Some(idx) = self.queue.find_awaiting_ack(ack.alert_node) else {
            self.stats.acks_unmatched += 1;
            debug!(node = %node_id, alert = %ack.alert_node, "ack with no alert awaiting it");
            return;
        };
        let next_hop = match self.queue.get(idx).map(|e| e.state) {
            Some(AlertState::AwaitingAck { next_hop, .. }) => next_hop,
            _ => return,
        };

        match ack.kind {
            AckKind::Succeed => {
                let Some(entry) = self.queue.remove(idx) else {
                    return;
                };
                self.stats.alerts_acknowledged += 1;
                debug!(node = %node_id, alert = %ack.alert_node, %next_hop, "alert acknowledged");
                self.events.push(NodeEvent::AlertAcknowledged {
                    alert_node: ack.alert_node,
                    next_hop,
                });
                trace!(node = %node_id, upstream = ?entry.upstream, "custody entry released");
            }
            AckKind::Failure => {
                self.retry_or_fail(radio, idx, MeshError::AckFailure(next_hop), now);
            }
        }
    }

    fn on_forward_node_request<R>(&mut self, radio: &mut R, announce: NodeAnnounce)
    where
        R: RadioTransport + ?Sized,
    {
        let node_id = self.node_id();
        if announce.node == node_id {
            return;
        }
        debug!(node = %node_id, requester = %announce.node, "answering forward-node request");
        self.send_control(radio, Packet::ForwardNodeResponse(NodeAnnounce::new(node_id)));
    }

    fn on_forward_node_response(&mut self, announce: NodeAnnounce) {
        let node_id = self.node_id();
        if announce.node == node_id || self.routing.contains(announce.node) {
            return;
        }
        let evicted = self.routing.add(announce.node);
        self.stats.routes_learned += 1;
        info!(node = %node_id, forward_node = %announce.node, evicted = ?evicted, "learned forward node");
        self.events.push(NodeEvent::RouteLearned {
            node: announce.node,
            evicted,
        });
    }

    fn raise_alert<R>(&mut self, radio: &mut R, now: Instant)
    where
        R: RadioTransport + ?Sized,
    {
        let node_id = self.node_id();
        self.alert_sent = true;
        self.stats.alerts_raised += 1;
        info!(node = %node_id, capacity = self.bin_capacity, "capacity threshold reached");
        self.events.push(NodeEvent::AlertRaised {
            bin_capacity: self.bin_capacity,
        });

        if self.is_root() {
            // Already at the collector
            self.stats.alerts_delivered += 1;
            self.events.push(NodeEvent::AlertDelivered {
                alert_node: node_id,
                from: node_id,
                bin_capacity: self.bin_capacity,
            });
            return;
        }

        let receiver = self.routing.next_hop().unwrap_or(node_id);
        let alert = CapacityAlert::new(node_id, node_id, receiver, self.bin_capacity);
        if let Err(full) = self.queue.push(alert) {
            self.stats.alerts_dropped += 1;
            warn!(node = %node_id, error = %full, "dropping local alert");
            self.events.push(NodeEvent::AlertDropped { alert_node: node_id });
            return;
        }

        let idx = self.queue.len() - 1;
        self.forward_now(radio, idx, now);
    }

    /// Eager forward at queue time; a missing route starts discovery
    fn forward_now<R>(&mut self, radio: &mut R, idx: usize, now: Instant)
    where
        R: RadioTransport + ?Sized,
    {
        if let Err(MeshError::NoRoute(_)) = self.forward(radio, idx, now) {
            self.start_discovery(radio, now);
        }
    }

    /// Re-address the queued alert at `idx` for its next hop and send it
    ///
    /// On success the entry moves to `AwaitingAck`. On any error it is left
    /// exactly as it was.
    fn forward<R>(&mut self, radio: &mut R, idx: usize, now: Instant) -> MeshResult<NodeId>
    where
        R: RadioTransport + ?Sized,
    {
        let node_id = self.node_id();
        let Some(entry) = self.queue.get(idx).copied() else {
            return Err(MeshError::NoRoute(node_id));
        };

        let mut exclude = vec![node_id, entry.alert.alert_node()];
        exclude.extend(entry.upstream);
        exclude.extend(entry.failed_hop);

        let Some(next_hop) = self.routing.next_hop_excluding(&exclude) else {
            debug!(node = %node_id, alert = %entry.alert.alert_node(), "no route, alert stays pending");
            return Err(MeshError::NoRoute(node_id));
        };

        let outgoing = entry.alert.readdressed(node_id, next_hop);
        self.transmit(radio, &Packet::CapacityAlert(outgoing))?;

        if let Some(entry) = self.queue.get_mut(idx) {
            entry.alert = outgoing;
            entry.state = AlertState::AwaitingAck { next_hop, sent_at: now };
        }
        self.stats.alerts_forwarded += 1;
        debug!(
            node = %node_id,
            alert = %outgoing.alert_node(),
            %next_hop,
            capacity = outgoing.bin_capacity(),
            "alert forwarded"
        );
        Ok(next_hop)
    }

    /// Handle a failed hop: one retry via an alternate route, else give up
    ///
    /// Returns `true` when the entry was removed from the queue.
    fn retry_or_fail<R>(&mut self, radio: &mut R, idx: usize, reason: MeshError, now: Instant) -> bool
    where
        R: RadioTransport + ?Sized,
    {
        let node_id = self.node_id();
        let Some(entry) = self.queue.get(idx).copied() else {
            return false;
        };
        let failed_hop = match entry.state {
            AlertState::AwaitingAck { next_hop, .. } => Some(next_hop),
            AlertState::Pending => entry.failed_hop,
        };

        let mut exclude = vec![node_id, entry.alert.alert_node()];
        exclude.extend(entry.upstream);
        exclude.extend(failed_hop);
        let alternate = if !entry.retried && self.routing.len() > 1 {
            self.routing.next_hop_excluding(&exclude)
        } else {
            None
        };

        if let Some(alternate) = alternate {
            debug!(node = %node_id, alert = %entry.alert.alert_node(), %alternate, %reason, "retrying via alternate route");
            if let Some(entry) = self.queue.get_mut(idx) {
                entry.retried = true;
                entry.failed_hop = failed_hop;
                entry.state = AlertState::Pending;
            }
            // A busy radio leaves the entry pending for the next service pass
            let _ = self.forward(radio, idx, now);
            return false;
        }

        let Some(entry) = self.queue.remove(idx) else {
            return false;
        };
        let alert_node = entry.alert.alert_node();
        self.stats.alerts_failed += 1;
        warn!(node = %node_id, alert = %alert_node, %reason, "alert failed");
        self.events.push(NodeEvent::AlertFailed { alert_node, reason });
        true
    }

    fn start_discovery<R>(&mut self, radio: &mut R, now: Instant)
    where
        R: RadioTransport + ?Sized,
    {
        debug!(node = %self.node_id(), "broadcasting forward-node request");
        self.last_discovery = Some(now);
        self.events.push(NodeEvent::DiscoveryStarted);
        self.send_control(radio, Packet::ForwardNodeRequest(NodeAnnounce::new(self.node_id())));
    }

    /// Send a control packet, keeping it for retry if the radio refuses
    fn send_control<R>(&mut self, radio: &mut R, packet: Packet)
    where
        R: RadioTransport + ?Sized,
    {
        if !self.outbox.is_empty() || self.transmit(radio, &packet).is_err() {
            if self.outbox.len() >= self.config.outbox_capacity.max(1) {
                self.outbox.pop_front();
                self.stats.outbox_dropped += 1;
                warn!(node = %self.node_id(), "outbox full, dropping oldest control packet");
            }
            self.outbox.push_back(packet);
        }
    }

    fn flush_outbox<R>(&mut self, radio: &mut R)
    where
        R: RadioTransport + ?Sized,
    {
        while let Some(packet) = self.outbox.front().copied() {
            if self.transmit(radio, &packet).is_err() {
                break;
            }
            self.outbox.pop_front();
        }
    }

    fn transmit<R>(&mut self, radio: &mut R, packet: &Packet) -> Result<(), TransportError>
    where
        R: RadioTransport + ?Sized,
    {
        let frame = self.codec.encode(packet);
        match radio.send(&frame) {
            Ok(()) => {
                self.stats.packets_tx += 1;
                match packet {
                    Packet::Ack(_) => self.stats.acks_sent += 1,
                    Packet::ForwardNodeRequest(_) => self.stats.discovery_requests += 1,
                    Packet::ForwardNodeResponse(_) => self.stats.discovery_responses += 1,
                    Packet::CapacityAlert(_) => {}
                }
                trace!(node = %self.node_id(), ?packet, "sent");
                Ok(())
            }
            Err(err) => {
                self.stats.send_failures += 1;
                debug!(node = %self.node_id(), error = %err, "send failed");
                Err(err)
            }
        }
    }
}
