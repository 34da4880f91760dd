//! Startup/shutdown sequencing for a single elan node: load persisted
//! state, bind the gossip transport, connect to the cluster, wire the
//! blob façade, and run until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use corelib::{Node, NodeHandle, NodeId, Persistence, PersistedState, Ring};
use membership::{
    AdapterConfig, FocaTransport, GossipTransport, MembershipAdapter, PeerIdentity, RingDataSource,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use blob::{BlobService, ClientFactory, LocalDirTransport};

use crate::config::Config;

/// Builds client handles for the one node whose bytes we actually have a
/// transport for: ourselves. Every other node is left handle-less until
/// an external consumer wires a real network transport (gRPC, QUIC, ...)
/// in its place -- see `blob::transport`'s doc comment.
struct LocalOnlyClientFactory {
    local_id: NodeId,
    data_dir: PathBuf,
}

impl ClientFactory for LocalOnlyClientFactory {
    fn build(&self, node: &Node) -> Option<Arc<dyn NodeHandle>> {
        if node.id != self.local_id {
            return None;
        }
        match LocalDirTransport::new(&self.data_dir) {
            Ok(transport) => Some(Arc::new(transport)),
            Err(e) => {
                warn!(error = %e, "failed to open local blob store");
                None
            }
        }
    }
}

fn persisted_state_for(ring: &Ring, local_id: &NodeId) -> PersistedState {
    PersistedState {
        this_node: ring.node(local_id).map(|n| n.to_wire()),
        nodes: ring.export().iter().map(|n| n.to_wire()).collect(),
        initialised: ring.node(local_id).map(|n| !n.ranges.is_empty()).unwrap_or(false),
    }
}

pub async fn run(config: Config) -> Result<()> {
    let local_id = NodeId::from(config.node_name.clone());
    // The blob-RPC data address: purely informational here (logged at
    // startup for an external consumer's benefit) -- wiring a listener on
    // it is that consumer's job, and nothing in this subsystem ever
    // dials a peer on it, so it is never stored on the node record.
    let data_address = format!("{}:{}", config.advertise_addr, config.data_port);
    let persistence = Persistence::new(&config.data_dir);
    let ring = Arc::new(Ring::new());

    let remembered = match persistence.load().context("loading persisted state")? {
        Some(state) => {
            let nodes: Vec<Node> = state.nodes.iter().map(Node::from_wire).collect();
            if let Some(wire) = &state.this_node {
                let this_node = Node::from_wire(wire);
                if !this_node.ranges.is_empty() {
                    ring.update(&this_node)
                        .context("reinstating persisted local node")?;
                }
            }
            nodes
        }
        None => Vec::new(),
    };

    let gossip_addr: SocketAddr = format!("{}:{}", config.advertise_addr, config.discovery_port)
        .parse()
        .context("parsing advertise address")?;
    let gossip_address = gossip_addr.to_string();
    let identity = PeerIdentity {
        name: config.node_name.clone(),
        addr: gossip_addr,
    };
    let data_source = Arc::new(RingDataSource {
        ring: ring.clone(),
        local_id: local_id.clone(),
    });
    let (transport, events_rx) = FocaTransport::bind(identity, data_source)
        .await
        .context("binding gossip transport")?;

    let (raw_tx, mut raw_rx) = mpsc::channel::<Node>(10);
    let transport: Arc<dyn GossipTransport> = transport;
    let adapter = MembershipAdapter::new(
        ring.clone(),
        transport,
        events_rx,
        raw_tx,
        AdapterConfig {
            local_id: local_id.clone(),
            local_address: gossip_address.clone(),
            tokens: config.tokens,
        },
        remembered,
    );

    adapter
        .connect(&config.peers)
        .await
        .context("joining the cluster")?;

    let client_factory: Arc<dyn ClientFactory> = Arc::new(LocalOnlyClientFactory {
        local_id: local_id.clone(),
        data_dir: config.data_dir.clone(),
    });
    if let Some(local_handle) = client_factory.build(
        &ring
            .node(&local_id)
            .unwrap_or_else(|| Node::new(local_id.clone(), gossip_address.clone())),
    ) {
        ring.update_node(&local_id, true, Some(local_handle))
            .context("installing local client handle")?;
    }
    persistence
        .save(&persisted_state_for(&ring, &local_id))
        .context("saving initial state")?;

    // The adapter's change channel is consumed here, fanned out to the
    // façade (client-handle refresh) and to persistence (anything that
    // changes the local view is saved immediately, per the persistence
    // contract); the façade must never block on disk I/O so this task
    // does the saving, not `BlobService` itself.
    let (facade_tx, facade_rx) = mpsc::channel::<Node>(10);
    let persist_ring = ring.clone();
    let persist_local_id = local_id.clone();
    let persist_handle = persistence;
    tokio::spawn(async move {
        while let Some(node) = raw_rx.recv().await {
            if let Err(e) =
                persist_handle.save(&persisted_state_for(&persist_ring, &persist_local_id))
            {
                warn!(error = %e, "failed to persist ring change");
            }
            let _ = facade_tx.try_send(node);
        }
    });

    let cancel = CancellationToken::new();
    let service = BlobService::new(
        ring.clone(),
        local_id.clone(),
        config.replicas,
        config.max_size,
        facade_rx,
        client_factory,
        cancel.clone(),
    );
    let _service = service;

    info!(
        node = %local_id,
        gossip_address = %gossip_address,
        data_address = %data_address,
        segments = ring.segments_snapshot().len(),
        "elan node is up"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!(node = %local_id, "shutdown requested");

    cancel.cancel();
    adapter.shutdown().await;
    let persistence = Persistence::new(&config.data_dir);
    persistence
        .save(&persisted_state_for(&ring, &local_id))
        .context("saving final state")?;
    Ok(())
}
