//! Drives the ring from the gossip collaborator and publishes per-node
//! change notifications to whatever is listening downstream (the blob
//! façade, in production).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use corelib::{Node, NodeId, Ring};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::codec;
use crate::error::Result;
use crate::gossip::{GossipEvent, GossipTransport, LocalDataSource};
use crate::protocol::{MetaPayload, StatePayload, UnicastMessage};

const CONVERGENCE_QUIESCENCE: Duration = Duration::from_secs(5);
const CONVERGENCE_CAP: Duration = Duration::from_secs(60);
const CONVERGENCE_POLL: Duration = Duration::from_secs(1);
const LEAVE_GRACE: Duration = Duration::from_secs(2);

/// Configuration the adapter needs at construction time; everything else
/// comes from the ring and the transport.
pub struct AdapterConfig {
    pub local_id: NodeId,
    /// The address this node gossips/receives reliable unicasts on --
    /// i.e. the `GossipTransport`'s own bind address, not the blob-RPC
    /// data address (the façade never routes to `Node.address`, so it
    /// never needs to be anything else).
    pub local_address: String,
    pub tokens: usize,
}

/// Drives `Ring` reconciliation off an abstract [`GossipTransport`] and
/// forwards every node-level change to `change_tx`.
pub struct MembershipAdapter {
    ring: Arc<Ring>,
    transport: Arc<dyn GossipTransport>,
    change_tx: Mutex<Option<mpsc::Sender<Node>>>,
    last_update: Mutex<Instant>,
    /// Meta/state payloads seen for peers we haven't reconciled into the
    /// ring yet this session, keyed by node id.
    known_meta: Mutex<HashMap<NodeId, Node>>,
    /// Nodes persisted from a previous run, kept around so `Connect` can
    /// reinject them and the forgotten-peer recovery path has something to
    /// answer with.
    remembered: Mutex<HashMap<NodeId, Node>>,
    config: AdapterConfig,
}

impl MembershipAdapter {
    /// Build the adapter and start its background event-processing loop.
    /// Does not join the cluster yet -- call [`Self::connect`] for that.
    pub fn new(
        ring: Arc<Ring>,
        transport: Arc<dyn GossipTransport>,
        events: mpsc::Receiver<GossipEvent>,
        change_tx: mpsc::Sender<Node>,
        config: AdapterConfig,
        remembered: Vec<Node>,
    ) -> Arc<Self> {
        let adapter = Arc::new(Self {
            ring,
            transport,
            change_tx: Mutex::new(Some(change_tx)),
            last_update: Mutex::new(Instant::now()),
            known_meta: Mutex::new(HashMap::new()),
            remembered: Mutex::new(
                remembered.into_iter().map(|n| (n.id.clone(), n)).collect(),
            ),
            config,
        });
        adapter.clone().spawn_event_loop(events);
        adapter
    }

    fn spawn_event_loop(self: Arc<Self>, mut events: mpsc::Receiver<GossipEvent>) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(event).await;
            }
        });
    }

    #[instrument(skip(self, event), fields(node = %self.config.local_id))]
    async fn handle_event(&self, event: GossipEvent) {
        match event {
            GossipEvent::Joined { peer } => self.on_notify_join_or_update(&peer).await,
            GossipEvent::Left { peer } => self.on_notify_leave(&peer).await,
            GossipEvent::Updated { peer } => self.on_notify_join_or_update(&peer).await,
            GossipEvent::MetaReceived { bytes } => self.on_meta_received(&bytes),
            GossipEvent::StateReceived { bytes } => self.on_state_received(&bytes).await,
            GossipEvent::UnicastReceived { bytes } => self.on_unicast_received(&bytes),
        }
    }

    /// `Connect`: join the seeds, wait for gossip to settle, then
    /// establish our own ring membership or reinject what we remember.
    #[instrument(skip(self, peers), fields(node = %self.config.local_id))]
    pub async fn connect(self: &Arc<Self>, peers: &[String]) -> Result<()> {
        let contacted = self.transport.join(peers).await?;
        info!(contacted, "issued join to seed peers");
        self.wait_for_convergence().await;

        let local_empty = self
            .ring
            .node(&self.config.local_id)
            .map(|n| n.ranges.is_empty())
            .unwrap_or(true);

        if local_empty {
            let node = Node::new(self.config.local_id.clone(), self.config.local_address.clone());
            let node = self.ring.add_local(node, self.config.tokens)?;
            self.broadcast_local_meta(&node);
        } else {
            let remembered: Vec<Node> = self.remembered.lock().values().cloned().collect();
            for node in remembered {
                if self.ring.node(&node.id).is_none() {
                    if let Err(e) = self.ring.update(&node) {
                        warn!(peer = %node.id, error = %e, "failed to reinject remembered peer");
                    }
                }
            }
        }

        let members = self.transport.members();
        let cached: HashMap<NodeId, Node> = self.known_meta.lock().clone();
        for name in members {
            if let Some(node) = cached.get(&NodeId::from(name.as_str())) {
                self.reconcile(node);
            }
        }
        Ok(())
    }

    async fn wait_for_convergence(&self) {
        let deadline = Instant::now() + CONVERGENCE_CAP;
        loop {
            let quiet_for = self.last_update.lock().elapsed();
            if quiet_for > CONVERGENCE_QUIESCENCE || Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(CONVERGENCE_POLL).await;
        }
    }

    fn broadcast_local_meta(&self, node: &Node) {
        let payload = MetaPayload(node.to_wire());
        match codec::encode(&payload) {
            Ok(bytes) => self.transport.broadcast_meta(bytes),
            Err(e) => warn!(error = %e, "failed to encode local meta payload"),
        }
    }

    /// Merge one peer node into the ring; emit on the change channel if
    /// anything actually changed. Errors are logged and swallowed -- never
    /// propagated out of a gossip callback.
    fn reconcile(&self, node: &Node) {
        match self.ring.update(node) {
            Ok(true) => self.emit(node.clone()),
            Ok(false) => {}
            Err(e) => warn!(peer = %node.id, error = %e, "ring rejected peer update"),
        }
    }

    fn emit(&self, node: Node) {
        // A full or closed channel is dropped silently: the façade
        // will pick up the authoritative state on its next snapshot.
        if let Some(tx) = self.change_tx.lock().as_ref() {
            let _ = tx.try_send(node);
        }
    }

    fn touch_last_update(&self) {
        *self.last_update.lock() = Instant::now();
    }

    fn on_meta_received(&self, bytes: &[u8]) {
        let payload: MetaPayload = match codec::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to decode meta payload");
                return;
            }
        };
        self.touch_last_update();
        let node = Node::from_wire(&payload.0);
        self.known_meta.lock().insert(node.id.clone(), node.clone());

        if self.ring.node(&node.id).is_some() {
            self.reconcile(&node);
        } else if node.ranges.is_empty() {
            self.reply_with_historical_state(&node);
        } else {
            self.reconcile(&node);
        }
    }

    async fn on_state_received(&self, bytes: &[u8]) {
        let payload: StatePayload = match codec::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to decode state payload");
                return;
            }
        };
        self.touch_last_update();
        for wire in &payload.0 {
            let node = Node::from_wire(wire);
            if self.ring.node(&node.id).is_some() {
                self.reconcile(&node);
            } else if node.ranges.is_empty() {
                self.reply_with_historical_state(&node);
            } else {
                self.reconcile(&node);
            }
        }
    }

    fn on_unicast_received(&self, bytes: &[u8]) {
        let message: UnicastMessage = match codec::decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to decode unicast message");
                return;
            }
        };
        match message {
            UnicastMessage::AuthoritativeState(StatePayload(nodes)) => {
                for wire in nodes {
                    self.reconcile(&Node::from_wire(&wire));
                }
            }
        }
    }

    /// The "a peer has forgotten itself" recovery path: we know its real
    /// tokens from a previous session even though the ring (or this
    /// session's gossip) has no current record for it. Replies to the
    /// peer's own currently-advertised gossip address, not wherever we
    /// last persisted it, in case it rejoined from somewhere new.
    fn reply_with_historical_state(&self, current: &Node) {
        let historical = self.remembered.lock().get(&current.id).cloned();
        let Some(historical) = historical.filter(|n| !n.ranges.is_empty()) else {
            return;
        };
        let payload = UnicastMessage::AuthoritativeState(StatePayload(vec![historical.to_wire()]));
        let Ok(bytes) = codec::encode(&payload) else {
            return;
        };
        let transport = self.transport.clone();
        let target = current.address.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send_reliable(&target, bytes).await {
                warn!(peer = %target, error = %e, "failed to send forgotten-peer recovery state");
            }
        });
    }

    async fn on_notify_join_or_update(&self, peer: &str) {
        let id = NodeId::from(peer);
        let address = match self.ring.update_node(&id, true, None) {
            Ok((node, changed)) => {
                let address = node.address.clone();
                if changed {
                    self.emit(node);
                }
                address
            }
            Err(e) => {
                warn!(%peer, error = %e, "NotifyJoin/Update for unknown peer");
                return;
            }
        };
        self.send_full_state_to(&address).await;
    }

    async fn on_notify_leave(&self, peer: &str) {
        let id = NodeId::from(peer);
        match self.ring.update_node(&id, false, None) {
            Ok((node, changed)) => {
                if changed {
                    self.emit(node);
                }
            }
            Err(e) => warn!(%peer, error = %e, "NotifyLeave for unknown peer"),
        }
    }

    async fn send_full_state_to(&self, peer: &str) {
        let nodes: Vec<_> = self.ring.export().iter().map(|n| n.to_wire()).collect();
        let payload = UnicastMessage::AuthoritativeState(StatePayload(nodes));
        let bytes = match codec::encode(&payload) {
            Ok(b) => b,
            Err(e) => {
                warn!(%peer, error = %e, "failed to encode full ring export");
                return;
            }
        };
        if let Err(e) = self.transport.send_reliable(peer, bytes).await {
            warn!(%peer, error = %e, "failed to send full ring export to new peer");
        }
    }

    /// Close the notification channel, leave the cluster with a 2s grace
    /// period, then shut down the transport.
    #[instrument(skip(self), fields(node = %self.config.local_id))]
    pub async fn shutdown(&self) {
        // Drop our half of the notification channel so the façade's
        // receiver observes a clean close rather than waiting forever.
        self.change_tx.lock().take();
        if let Err(e) = self.transport.leave(LEAVE_GRACE).await {
            warn!(error = %e, "error leaving gossip cluster cleanly");
        }
        self.transport.shutdown().await;
    }
}

/// Marker so `foca_transport::FocaTransport::bind` can be handed a
/// `LocalDataSource` built from this adapter once it has a ring and local
/// id -- kept here rather than in `gossip.rs` since it's adapter-specific
/// wiring, not part of the abstraction itself.
pub struct RingDataSource {
    pub ring: Arc<Ring>,
    pub local_id: NodeId,
}

impl LocalDataSource for RingDataSource {
    fn local_meta(&self) -> Vec<u8> {
        let node = self
            .ring
            .node(&self.local_id)
            .unwrap_or_else(|| Node::new(self.local_id.clone(), String::new()));
        codec::encode(&MetaPayload(node.to_wire())).unwrap_or_default()
    }

    fn local_state(&self) -> Vec<u8> {
        let nodes: Vec<_> = self.ring.export().iter().map(|n| n.to_wire()).collect();
        codec::encode(&StatePayload(nodes)).unwrap_or_default()
    }
}
