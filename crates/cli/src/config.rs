//! CLI flags for running a single elan node.

use clap::Parser;
use corelib::ring::DEFAULT_TOKENS;

/// Run a node in the elan blob-storage cluster.
#[derive(Debug, Parser)]
#[command(name = "elan", about = "distributed content-addressed blob store")]
pub struct Config {
    /// Stable, globally unique name for this node. Also its gossip peer
    /// identity, so it must stay the same across restarts.
    #[arg(long)]
    pub node_name: String,

    /// Address other nodes use to reach this node's blob store and gossip
    /// layer. An IP literal -- gossip peer addresses are parsed as
    /// `SocketAddr` directly, with no hostname resolution.
    #[arg(long)]
    pub advertise_addr: String,

    /// UDP port the gossip (SWIM) layer binds and advertises.
    #[arg(long, default_value_t = 7946)]
    pub discovery_port: u16,

    /// Port the blob RPC surface is reachable on. Wiring an actual
    /// listener for it is left to the external consumer; elan records it
    /// as part of this node's advertised address.
    #[arg(long, default_value_t = 7947)]
    pub data_port: u16,

    /// Replication factor `R`: the primary plus `R - 1` replicas.
    #[arg(long, default_value_t = 3)]
    pub replicas: usize,

    /// Number of ring tokens this node generates on first-time init.
    #[arg(long, default_value_t = DEFAULT_TOKENS)]
    pub tokens: usize,

    /// Directory holding this node's persisted state and blob files.
    #[arg(long)]
    pub data_dir: std::path::PathBuf,

    /// Largest blob accepted by `Put`, in bytes. Unset means unlimited.
    #[arg(long)]
    pub max_size: Option<i64>,

    /// Seed peer to gossip-join at startup, as `ip:port` (parsed directly
    /// as a `SocketAddr`, no hostname resolution). Repeatable.
    #[arg(long = "peer")]
    pub peers: Vec<String>,
}

impl Config {
    /// Initialise logging, bootstrap the node, and block until shutdown.
    /// Returns an error only if bootstrap itself failed -- once the node
    /// has joined the cluster, a clean shutdown always returns `Ok`.
    pub fn run(self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(crate::bootstrap::run(self))
    }
}
