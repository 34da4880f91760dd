//! The gossip collaborator, abstracted.
//!
//! Hides the gossip library behind an
//! interface so a deterministic test double can stand in for it. This
//! module is that interface: [`GossipTransport`] is everything the adapter
//! pushes out (join, broadcast, reliable unicast, leave/shutdown);
//! [`LocalDataSource`] is what the transport pulls from us when the
//! underlying protocol asks for our meta/state payload; [`GossipEvent`] is
//! everything the transport pushes back in (peer join/leave/update, peer
//! meta/state, and inbound reliable unicasts).
//!
//! The concrete implementation in `foca_transport` wraps the `foca` crate,
//! a SWIM gossip protocol -- the idiomatic Rust analogue of the Go
//! `memberlist` library this subsystem originally gossiped over. Its wire
//! format is `foca`'s own concern; this module only ever sees `Vec<u8>`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Inbound signals the transport delivers to the adapter's event loop.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    Joined { peer: String },
    Left { peer: String },
    Updated { peer: String },
    MetaReceived { bytes: Vec<u8> },
    StateReceived { bytes: Vec<u8> },
    UnicastReceived { bytes: Vec<u8> },
}

/// What the transport pulls from us when the gossip protocol needs our own
/// payloads -- implemented by [`crate::adapter::MembershipAdapter`].
pub trait LocalDataSource: Send + Sync {
    /// Our own meta payload, encoded and ready to gossip.
    fn local_meta(&self) -> Vec<u8>;
    /// Our full ring view, encoded and ready to hand to a joiner.
    fn local_state(&self) -> Vec<u8>;
}

/// Everything the membership adapter needs to push through the gossip
/// collaborator. A test double can implement this over an in-memory bus to
/// drive deterministic convergence tests.
#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// Attempt to join the cluster through the given seed peers. Returns
    /// the number of peers successfully contacted (zero is not an error --
    /// see the bootstrap-failure handling in the adapter's `connect`).
    async fn join(&self, peers: &[String]) -> Result<usize>;

    /// Broadcast an updated meta payload for the local node.
    fn broadcast_meta(&self, bytes: Vec<u8>);

    /// Current gossip-visible peer names (not necessarily ring members).
    fn members(&self) -> Vec<String>;

    /// Reliable (non-best-effort) point-to-point delivery.
    async fn send_reliable(&self, target: &str, bytes: Vec<u8>) -> Result<()>;

    /// Leave the cluster cleanly, waiting up to `grace` for acknowledgement.
    async fn leave(&self, grace: Duration) -> Result<()>;

    /// Tear down the transport. Called after `leave`.
    async fn shutdown(&self);
}
