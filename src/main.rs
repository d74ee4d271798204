//! Entry point for `stcp-sip`.
//!
//! Builds an in-process overlay from a topology file and runs a routing
//! node per node id. `simulate` then moves a payload from a client node to
//! a server node over STCP; `routes` only lets routing converge and prints
//! the tables. All protocol work lives in the library.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{duplex, DuplexStream};

use stcp_sip::client::StcpClient;
use stcp_sip::config::{FaultConfig, FaultSide, StackConfig};
use stcp_sip::overlay::Mesh;
use stcp_sip::server::StcpServer;
use stcp_sip::simulator::Simulator;
use stcp_sip::sip::{SipHandle, SipNode};
use stcp_sip::topology::Topology;
use stcp_sip::{NodeId, Port};

/// Reliable transport over a distance-vector routed overlay.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Transfer a payload from a client node to a server node.
    Simulate {
        #[command(flatten)]
        overlay: OverlayArgs,
        /// Node running the STCP client.
        #[arg(long)]
        client_node: NodeId,
        /// Node running the STCP server.
        #[arg(long)]
        server_node: NodeId,
        #[arg(long, default_value_t = 87)]
        client_port: Port,
        #[arg(long, default_value_t = 88)]
        server_port: Port,
        /// Payload size in bytes.
        #[arg(long, default_value_t = 20_000)]
        bytes: usize,
        /// Probability that a segment is lost or corrupted.
        #[arg(long, default_value_t = 0.1)]
        loss_rate: f64,
        /// Apply faults where segments are sent instead of where they arrive.
        #[arg(long)]
        sender_side_faults: bool,
        /// Seed for reproducible faults.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Let routing converge and print every node's tables.
    Routes {
        #[command(flatten)]
        overlay: OverlayArgs,
    },
}

#[derive(Args)]
struct OverlayArgs {
    /// Topology file: one `hostA hostB cost` line per link.
    #[arg(short, long, default_value = "demos/topology.dat")]
    topology: PathBuf,
    /// Time given to routing before traffic starts.
    #[arg(long, default_value_t = 6000)]
    settle_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Simulate {
            overlay,
            client_node,
            server_node,
            client_port,
            server_port,
            bytes,
            loss_rate,
            sender_side_faults,
            seed,
        } => {
            ensure!(
                (0.0..=1.0).contains(&loss_rate),
                "loss rate {loss_rate} is not a probability"
            );
            let mut config = StackConfig::default();
            config.fault = FaultConfig {
                loss_rate,
                side: if sender_side_faults {
                    FaultSide::Sender
                } else {
                    FaultSide::Receiver
                },
                seed,
            };
            simulate(
                &overlay,
                &config,
                (client_node, client_port),
                (server_node, server_port),
                bytes,
            )
            .await
        }
        Mode::Routes { overlay } => {
            let config = StackConfig::default();
            let (_, nodes) = boot(&overlay, &config, &[]).await?;
            print_tables(&nodes);
            Ok(())
        }
    }
}

/// Start a routing node for every node in the topology. Nodes listed in
/// `local` get a transport pipe, returned in the same order.
async fn boot(
    args: &OverlayArgs,
    config: &StackConfig,
    local: &[NodeId],
) -> Result<(Vec<DuplexStream>, Vec<SipHandle>)> {
    let text = std::fs::read_to_string(&args.topology)
        .with_context(|| format!("reading {}", args.topology.display()))?;
    let topo = Topology::parse(0, &text).context("parsing topology")?;
    let ids = topo.node_ids();
    for n in local {
        if !ids.contains(n) {
            bail!("node {n} is not in {}", args.topology.display());
        }
    }

    let mesh = Mesh::new(&topo);
    let mut pipes: Vec<Option<DuplexStream>> = local.iter().map(|_| None).collect();
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        let node = Arc::new(SipNode::new(&topo.with_node(id), config.routing.clone()));
        let port = mesh.attach(id);
        let handle = match local.iter().position(|&n| n == id) {
            Some(i) => {
                let (stcp_end, sip_end) = duplex(64 * 1024);
                pipes[i] = Some(stcp_end);
                node.start_with_transport(port, sip_end)
            }
            None => node.start(port),
        };
        nodes.push(handle);
    }

    log::info!("waiting {} ms for routes to settle", args.settle_ms);
    tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;

    let pipes = pipes.into_iter().flatten().collect();
    Ok((pipes, nodes))
}

fn print_tables(nodes: &[SipHandle]) {
    for h in nodes {
        println!("{}", h.node().dump_tables());
    }
}

async fn simulate(
    args: &OverlayArgs,
    config: &StackConfig,
    (client_node, client_port): (NodeId, Port),
    (server_node, server_port): (NodeId, Port),
    bytes: usize,
) -> Result<()> {
    ensure!(
        client_node != server_node,
        "client and server must run on different nodes"
    );
    ensure!(
        bytes <= config.transport.recv_buf_size,
        "payload of {bytes} bytes exceeds the receive buffer"
    );

    let (pipes, nodes) = boot(args, config, &[client_node, server_node]).await?;
    let [client_pipe, server_pipe]: [DuplexStream; 2] = pipes
        .try_into()
        .map_err(|_| anyhow::anyhow!("transport pipes missing"))?;

    let fault = &config.fault;
    let server_sim = Simulator::new(FaultConfig {
        seed: fault.seed.map(|s| s.wrapping_add(1)),
        ..fault.clone()
    });
    let server = StcpServer::start(server_pipe, config.transport.clone(), server_sim);
    let client = StcpClient::start(
        client_pipe,
        config.transport.clone(),
        Simulator::new(fault.clone()),
    );

    let receiving = tokio::spawn(async move {
        let sock = server.sock(server_port)?;
        server.accept(sock).await?;
        let (node, port) = server.peer(sock)?;
        log::info!("accepted connection from node {node} port {port}");
        let data = server.recv(sock, bytes).await?;
        server.close(sock).await?;
        Ok::<_, anyhow::Error>((server, data))
    });

    let payload: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
    let sock = client.sock(client_port)?;
    client
        .connect(sock, server_node, server_port)
        .await
        .context("connecting")?;
    client.send(sock, &payload)?;
    client.disconnect(sock).await.context("disconnecting")?;
    client.close(sock)?;

    let (_server, received) = receiving.await.context("server task")??;
    ensure!(received == payload, "received bytes differ from what was sent");
    println!("transferred {bytes} bytes from node {client_node} to node {server_node}");

    print_tables(&nodes);
    Ok(())
}
