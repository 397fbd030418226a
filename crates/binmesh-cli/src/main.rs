//! BinMesh Command-Line Interface
//!
//! This CLI provides tools for:
//! - Simulating a bin fill-level mesh and reporting delivery statistics
//! - Encoding protocol frames to hex
//! - Decoding captured hex frames
//! - Showing the wire format and default node configuration

use anyhow::{Context, Result};
use binmesh_core::mesh::simulation::{MeshSimulator, SimConfig, SimEvent};
use binmesh_core::mesh::{
    Ack, CapacityAlert, MessageType, NodeAnnounce, NodeConfig, NodeId, Packet, PacketCodec, DEFAULT_AUTH_KEY,
    MAX_BIN_CAPACITY,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "binmesh")]
#[command(author, version, about = "Bin fill-level mesh forwarding CLI", long_about = None)]
struct Cli {
    /// Enable verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a mesh of bins forwarding alerts to the root
    Simulate {
        /// Number of nodes, including the root (node 0)
        #[arg(short, long, default_value = "4")]
        nodes: usize,

        /// Steps to run with filling bins
        #[arg(short, long, default_value = "1000")]
        steps: u64,

        /// Extra steps with frozen bins to let in-flight alerts settle
        #[arg(long, default_value = "200")]
        drain: u64,

        /// Virtual time per step in milliseconds
        #[arg(long, default_value = "1000")]
        step_ms: u64,

        /// Distance between neighbors in meters
        #[arg(long, default_value = "1000")]
        spacing: f64,

        /// Radio range in meters
        #[arg(long, default_value = "1500")]
        range: f64,

        /// Probability of losing a single reception (0.0 - 1.0)
        #[arg(long, default_value = "0.0")]
        loss: f64,

        /// Slowest fill rate in percent per step
        #[arg(long, default_value = "1.0")]
        fill_min: f64,

        /// Fastest fill rate in percent per step
        #[arg(long, default_value = "5.0")]
        fill_max: f64,

        /// Random seed (random if omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// JSON file with a node configuration template
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Alert threshold in percent (overrides the template)
        #[arg(long)]
        threshold: Option<u8>,

        /// Routing table capacity (overrides the template)
        #[arg(long)]
        max_nodes: Option<usize>,

        /// Alert queue capacity (overrides the template)
        #[arg(long)]
        queue: Option<usize>,

        /// Print every node event
        #[arg(long)]
        events: bool,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encode a protocol frame as hex
    Encode {
        /// Shared authentication key (decimal or 0x-prefixed hex)
        #[arg(short, long, default_value = "0x01", value_parser = parse_byte)]
        auth_key: u8,

        #[command(subcommand)]
        packet: PacketArgs,
    },

    /// Decode a hex frame
    Decode {
        /// Frame bytes as hex (spaces and 0x prefix allowed)
        frame: String,

        /// Shared authentication key (decimal or 0x-prefixed hex)
        #[arg(short, long, default_value = "0x01", value_parser = parse_byte)]
        auth_key: u8,

        /// Print the packet as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show wire format and default configuration
    Info,
}

#[derive(Subcommand)]
enum PacketArgs {
    /// Capacity alert
    Alert {
        /// Node whose bin raised the alert
        #[arg(long)]
        alert_node: u8,

        /// Node transmitting this hop
        #[arg(long)]
        sender: u8,

        /// Node receiving this hop
        #[arg(long)]
        receiver: u8,

        /// Fill level in percent
        #[arg(long)]
        capacity: u8,
    },

    /// Hop acknowledgement
    Ack {
        /// Node whose alert is acknowledged
        #[arg(long)]
        alert_node: u8,

        /// Node the ack is addressed to
        #[arg(long)]
        receiver: u8,

        /// Report failure instead of success
        #[arg(long)]
        failure: bool,
    },

    /// Forward-node request
    Request {
        /// Requesting node
        #[arg(long)]
        node: u8,
    },

    /// Forward-node response
    Response {
        /// Responding node
        #[arg(long)]
        node: u8,
    },
}

impl PacketArgs {
    fn into_packet(self) -> Result<Packet> {
        Ok(match self {
            PacketArgs::Alert {
                alert_node,
                sender,
                receiver,
                capacity,
            } => {
                if capacity > MAX_BIN_CAPACITY {
                    anyhow::bail!("Invalid capacity: {}%. Must be 0-{}", capacity, MAX_BIN_CAPACITY);
                }
                Packet::CapacityAlert(CapacityAlert::new(
                    NodeId::new(alert_node),
                    NodeId::new(sender),
                    NodeId::new(receiver),
                    capacity,
                ))
            }
            PacketArgs::Ack {
                alert_node,
                receiver,
                failure,
            } => {
                let (alert_node, receiver) = (NodeId::new(alert_node), NodeId::new(receiver));
                if failure {
                    Packet::Ack(Ack::failure(alert_node, receiver))
                } else {
                    Packet::Ack(Ack::succeed(alert_node, receiver))
                }
            }
            PacketArgs::Request { node } => Packet::ForwardNodeRequest(NodeAnnounce::new(NodeId::new(node))),
            PacketArgs::Response { node } => Packet::ForwardNodeResponse(NodeAnnounce::new(NodeId::new(node))),
        })
    }
}

/// Parse a byte given as decimal or 0x-prefixed hex
fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid byte '{}': {}", s, e))
}

fn load_node_config(path: Option<&PathBuf>) -> Result<NodeConfig> {
    let Some(path) = path else {
        return Ok(NodeConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let config: NodeConfig =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse node config {}", path.display()))?;
    info!(path = %path.display(), "loaded node config template");
    Ok(config)
}

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    nodes: usize,
    steps: u64,
    drain: u64,
    step_ms: u64,
    spacing: f64,
    range: f64,
    loss: f64,
    fill_min: f64,
    fill_max: f64,
    seed: Option<u64>,
    config: Option<PathBuf>,
    threshold: Option<u8>,
    max_nodes: Option<usize>,
    queue: Option<usize>,
    show_events: bool,
    json: bool,
) -> Result<()> {
    let mut node_config = load_node_config(config.as_ref())?;
    if let Some(threshold) = threshold {
        node_config = node_config.with_alert_threshold(threshold);
    }
    if let Some(max_nodes) = max_nodes {
        node_config = node_config.with_max_nodes(max_nodes);
    }
    if let Some(queue) = queue {
        node_config = node_config.with_max_capacity_packets(queue);
    }
    // Sample once per step so thresholds are seen as soon as they are crossed
    node_config = node_config.with_sample_interval(Duration::from_millis(step_ms));

    let seed = seed.unwrap_or_else(rand::random);
    let sim_config = SimConfig::default()
        .with_node_count(nodes)
        .with_spacing(spacing)
        .with_radio_range(range)
        .with_loss_rate(loss)
        .with_step(Duration::from_millis(step_ms))
        .with_fill_rate(fill_min, fill_max)
        .with_seed(seed)
        .with_node_config(node_config);

    let mut sim = MeshSimulator::new(sim_config).context("Invalid simulation configuration")?;
    if !sim.is_connected() {
        warn!("some nodes are out of radio range of the root; their alerts cannot be delivered");
    }

    if !json {
        println!("=== BinMesh Network Simulation ===");
        println!();
        println!("Nodes:   {}", sim.node_count());
        println!("Steps:   {} (+{} drain)", steps, drain);
        println!("Step:    {} ms", step_ms);
        println!("Range:   {:.0} m (spacing {:.0} m)", range, spacing);
        println!("Loss:    {:.1}%", loss * 100.0);
        println!("Seed:    {}", seed);
        println!();
    }

    let started = Instant::now();
    sim.run(steps);
    sim.freeze_bins();
    let settled = sim.run_until(drain, MeshSimulator::is_idle);
    info!(elapsed_ms = started.elapsed().as_millis() as u64, settled, "simulation finished");

    if show_events {
        for event in sim.events() {
            if let SimEvent::Node { step, node_idx, event } = event {
                println!("[{:>6}] node {:>3}: {:?}", step, node_idx, event);
            }
        }
        println!();
    }

    if json {
        let report = serde_json::to_string_pretty(sim.stats()).context("Failed to serialize statistics")?;
        println!("{}", report);
    } else {
        print!("{}", sim.stats());
        if !settled {
            println!();
            println!("Network still busy after {} drain steps", drain);
        }
    }

    Ok(())
}

fn cmd_encode(auth_key: u8, packet: PacketArgs) -> Result<()> {
    let packet = packet.into_packet()?;
    let bytes = PacketCodec::new(auth_key).encode(&packet);
    println!("{}", hex::encode(bytes));
    Ok(())
}

fn cmd_decode(frame: String, auth_key: u8, json: bool) -> Result<()> {
    let cleaned: String = frame
        .split_whitespace()
        .map(|part| part.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    let bytes = hex::decode(&cleaned).with_context(|| format!("Invalid hex frame: {}", frame))?;

    let packet = PacketCodec::new(auth_key)
        .decode(&bytes)
        .with_context(|| format!("Failed to decode {} byte frame", bytes.len()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&packet).context("Failed to serialize packet")?);
        return Ok(());
    }

    println!("=== BinMesh Frame Decode ===");
    println!();
    println!("Type:        {:?} ({})", packet.message_type(), packet.message_type() as u8);
    match packet {
        Packet::CapacityAlert(alert) => {
            println!("Alert node:  {}", alert.alert_node());
            println!("Sender:      {}", alert.sender_node);
            println!("Receiver:    {}", alert.receiver_node);
            println!("Capacity:    {}%", alert.bin_capacity());
        }
        Packet::Ack(ack) => {
            println!("Alert node:  {}", ack.alert_node);
            println!("Receiver:    {}", ack.receiver_node);
            println!("Outcome:     {:?}", ack.kind);
        }
        Packet::ForwardNodeRequest(announce) | Packet::ForwardNodeResponse(announce) => {
            println!("Node:        {}", announce.node);
        }
    }

    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("=== BinMesh Wire Format ===");
    println!();
    println!("Every frame: [msgType (1B)] [authKey (1B)] [payload]");
    println!();
    println!("{:<22} {:<5} {:<6} {}", "Type", "Tag", "Bytes", "Payload");
    println!("{}", "-".repeat(72));
    let kinds = [
        (MessageType::Capacity, "alertNode, senderNode, receiverNode, binCapacity"),
        (MessageType::AckSucceed, "alertNode, receiverNode"),
        (MessageType::AckFailure, "alertNode, receiverNode"),
        (MessageType::ForwardNodeRequest, "node"),
        (MessageType::ForwardNodeResponse, "node"),
    ];
    for (kind, payload) in kinds {
        println!(
            "{:<22} {:<5} {:<6} {}",
            format!("{:?}", kind),
            kind as u8,
            kind.frame_len(),
            payload
        );
    }
    println!();
    println!("Default auth key: 0x{:02x}", DEFAULT_AUTH_KEY);
    println!();
    println!("Default node configuration:");
    println!(
        "{}",
        serde_json::to_string_pretty(&NodeConfig::default()).context("Failed to serialize config")?
    );
    println!();
    println!("Examples:");
    println!("  binmesh simulate --nodes 6 --steps 2000 --seed 7");
    println!("  binmesh encode alert --alert-node 2 --sender 2 --receiver 1 --capacity 85");
    println!("  binmesh decode 030102020155");

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over -v
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate {
            nodes,
            steps,
            drain,
            step_ms,
            spacing,
            range,
            loss,
            fill_min,
            fill_max,
            seed,
            config,
            threshold,
            max_nodes,
            queue,
            events,
            json,
        } => cmd_simulate(
            nodes, steps, drain, step_ms, spacing, range, loss, fill_min, fill_max, seed, config, threshold,
            max_nodes, queue, events, json,
        ),

        Commands::Encode { auth_key, packet } => cmd_encode(auth_key, packet),

        Commands::Decode { frame, auth_key, json } => cmd_decode(frame, auth_key, json),

        Commands::Info => cmd_info(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0x01"), Ok(1));
        assert_eq!(parse_byte("0XfF"), Ok(255));
        assert_eq!(parse_byte("42"), Ok(42));
        assert!(parse_byte("256").is_err());
        assert!(parse_byte("0xzz").is_err());
    }

    #[test]
    fn test_alert_args_into_packet() {
        let packet = PacketArgs::Alert {
            alert_node: 2,
            sender: 2,
            receiver: 1,
            capacity: 85,
        }
        .into_packet()
        .unwrap();
        assert_eq!(hex::encode(PacketCodec::default().encode(&packet)), "030102020155");
    }

    #[test]
    fn test_capacity_over_100_rejected() {
        let result = PacketArgs::Alert {
            alert_node: 2,
            sender: 2,
            receiver: 1,
            capacity: 120,
        }
        .into_packet();
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parses_encode() {
        let cli = Cli::try_parse_from([
            "binmesh", "encode", "--auth-key", "0x07", "ack", "--alert-node", "3", "--receiver", "2", "--failure",
        ])
        .unwrap();
        match cli.command {
            Commands::Encode { auth_key, packet } => {
                assert_eq!(auth_key, 7);
                let expected = Packet::Ack(Ack::failure(NodeId::new(3), NodeId::new(2)));
                assert_eq!(packet.into_packet().unwrap(), expected);
            }
            _ => panic!("expected encode"),
        }
    }
}
