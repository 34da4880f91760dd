//! Drives `MembershipAdapter` off an in-memory `GossipTransport` double --
//! no real gossip, but the full connect/reconcile/shutdown path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corelib::{Node, NodeId, Ring, WireNode};
use membership::{AdapterConfig, GossipEvent, GossipTransport, MembershipAdapter};
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct MockTransport {
    join_result: usize,
    members: Mutex<Vec<String>>,
    broadcasts: Mutex<Vec<Vec<u8>>>,
    unicasts: Mutex<Vec<(String, Vec<u8>)>>,
    left: Mutex<bool>,
    shut: Mutex<bool>,
}

impl MockTransport {
    fn new(join_result: usize) -> Self {
        Self {
            join_result,
            ..Default::default()
        }
    }
}

#[async_trait]
impl GossipTransport for MockTransport {
    async fn join(&self, _peers: &[String]) -> membership::Result<usize> {
        Ok(self.join_result)
    }

    fn broadcast_meta(&self, bytes: Vec<u8>) {
        self.broadcasts.lock().push(bytes);
    }

    fn members(&self) -> Vec<String> {
        self.members.lock().clone()
    }

    async fn send_reliable(&self, target: &str, bytes: Vec<u8>) -> membership::Result<()> {
        self.unicasts.lock().push((target.to_string(), bytes));
        Ok(())
    }

    async fn leave(&self, _grace: Duration) -> membership::Result<()> {
        *self.left.lock() = true;
        Ok(())
    }

    async fn shutdown(&self) {
        *self.shut.lock() = true;
    }
}

fn config(name: &str) -> AdapterConfig {
    AdapterConfig {
        local_id: NodeId::from(name),
        local_address: "127.0.0.1:9000".to_string(),
        tokens: 4,
    }
}

#[tokio::test(start_paused = true)]
async fn connect_on_empty_ring_self_initialises_and_broadcasts_meta() {
    let ring = Arc::new(Ring::new());
    let transport = Arc::new(MockTransport::new(0));
    let (_event_tx, event_rx) = mpsc::channel(8);
    let (change_tx, _change_rx) = mpsc::channel(8);

    let adapter = MembershipAdapter::new(
        ring.clone(),
        transport.clone(),
        event_rx,
        change_tx,
        config("a"),
        Vec::new(),
    );
    adapter.connect(&[]).await.unwrap();

    let node = ring.node(&NodeId::from("a")).expect("local node initialised");
    assert!(!node.ranges.is_empty());
    assert_eq!(transport.broadcasts.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn meta_received_for_an_already_initialised_peer_reconciles_and_emits() {
    let ring = Arc::new(Ring::new());
    ring.add_local(Node::new("a", "127.0.0.1:9001"), 4).unwrap();

    let transport = Arc::new(MockTransport::new(0));
    let (event_tx, event_rx) = mpsc::channel(8);
    let (change_tx, mut change_rx) = mpsc::channel(8);

    let _adapter = MembershipAdapter::new(
        ring.clone(),
        transport.clone(),
        event_rx,
        change_tx,
        config("a"),
        Vec::new(),
    );

    let peer = WireNode {
        name: "b".into(),
        address: "127.0.0.1:9002".into(),
        online: true,
        ranges: vec![(1, 100)],
    };
    let bytes = membership::codec::encode(&membership::MetaPayload(peer)).unwrap();
    event_tx.send(GossipEvent::MetaReceived { bytes }).await.unwrap();

    let emitted = tokio::time::timeout(Duration::from_secs(1), change_rx.recv())
        .await
        .expect("change notification")
        .expect("channel open");
    assert_eq!(emitted.id, NodeId::from("b"));
    assert!(ring.node(&NodeId::from("b")).is_some());
}

#[tokio::test(start_paused = true)]
async fn meta_received_from_a_forgotten_peer_triggers_historical_state_unicast() {
    let ring = Arc::new(Ring::new());
    ring.add_local(Node::new("a", "127.0.0.1:9003"), 4).unwrap();

    let mut remembered = Node::new("b", "127.0.0.1:9004");
    remembered.ranges = vec![corelib::Range { start: 5, end: 50 }];

    let transport = Arc::new(MockTransport::new(0));
    let (event_tx, event_rx) = mpsc::channel(8);
    let (change_tx, _change_rx) = mpsc::channel(8);

    let _adapter = MembershipAdapter::new(
        ring.clone(),
        transport.clone(),
        event_rx,
        change_tx,
        config("a"),
        vec![remembered],
    );

    // "b" gossips in with an empty meta, as if it had lost its state and
    // rebooted clean -- we remember its real tokens from a previous run.
    let forgotten = WireNode::empty("b", "127.0.0.1:9099");
    let bytes = membership::codec::encode(&membership::MetaPayload(forgotten)).unwrap();
    event_tx.send(GossipEvent::MetaReceived { bytes }).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let unicasts = transport.unicasts.lock();
    assert_eq!(unicasts.len(), 1);
    assert_eq!(unicasts[0].0, "127.0.0.1:9099");
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_the_cluster_and_tears_down_the_transport() {
    let ring = Arc::new(Ring::new());
    let transport = Arc::new(MockTransport::new(0));
    let (_event_tx, event_rx) = mpsc::channel(8);
    let (change_tx, mut change_rx) = mpsc::channel(8);

    let adapter = MembershipAdapter::new(
        ring.clone(),
        transport.clone(),
        event_rx,
        change_tx,
        config("a"),
        Vec::new(),
    );
    adapter.shutdown().await;

    assert!(*transport.left.lock());
    assert!(*transport.shut.lock());
    assert!(change_rx.recv().await.is_none());
}
