//! Node abstractions for the consistent hash ring.
//!
//! Nodes represent logical participants in the ring. They are identified by
//! a short, human-chosen, globally unique name that stays stable across
//! restarts -- unlike a machine-generated id, this is exactly what gossip
//! membership needs, since the same string also serves as the gossip peer
//! identity.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::range::Range;

/// Identifier for a node in the cluster.
///
/// Newtype over `String` so the type system distinguishes node names from
/// arbitrary strings at call sites (ring lookups, gossip peer ids, log
/// fields) without adding indirection.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Opaque error type crossing the handle boundary: the ring and the blob
/// façade don't share an error taxonomy, so a handle implementation
/// reports failures as a plain boxed `std::error::Error` and lets its
/// caller (the façade) translate it into its own status codes.
pub type HandleError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type HandleResult<T> = std::result::Result<T, HandleError>;

/// A handle a `Segment` uses to reach the node that owns it.
///
/// The ring itself never calls these methods -- it just stores the handle
/// opaquely and hands it back from `Find`/`FindReplicas`. The blob façade is
/// the real caller. Keeping the three content operations on this trait
/// (rather than introducing a second, façade-owned trait) avoids a
/// trait-object-to-trait-object downcast at the façade boundary.
#[async_trait]
pub trait NodeHandle: Send + Sync + std::fmt::Debug {
    async fn exists(&self, digest: &Digest) -> HandleResult<bool>;
    async fn get(&self, digest: &Digest, offset: u64, length: Option<u64>) -> HandleResult<Vec<u8>>;
    async fn put(&self, digest: &Digest, bytes: &[u8]) -> HandleResult<i64>;
}

/// Logical node participating in the ring.
///
/// Keep this struct small and cheap to clone; the heavy mutable state (the
/// actual transport connection) lives behind `client`, rebuilt rather than
/// mutated whenever liveness flips.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    /// Gossip/discovery address other nodes dial to reach this one --
    /// reliable unicasts (the forgotten-peer recovery path, the
    /// catch-up state sent to new joiners) are addressed here. This is
    /// deliberately the membership transport's bind address, never the
    /// blob-RPC data address: the ring and façade have no reason to dial
    /// a peer directly, so there's nothing else for this field to mean.
    /// Mutable in place.
    pub address: String,
    /// Whether this node currently has a live client-handle.
    pub online: bool,
    /// Segments this node owns, ordered by `start` (R3: starts are
    /// append-only once assigned).
    pub ranges: Vec<Range>,
    /// Opaque handle to the node, null when the node is known-offline.
    pub client: Option<Arc<dyn NodeHandle>>,
}

impl Node {
    /// Construct a new node with no ranges yet (pre-initialisation state).
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            online: true,
            ranges: Vec::new(),
            client: None,
        }
    }

    /// A serializable, handle-free snapshot of this node -- what crosses
    /// the gossip wire or gets persisted to disk.
    pub fn to_wire(&self) -> WireNode {
        WireNode {
            name: self.id.0.clone(),
            address: self.address.clone(),
            online: self.online,
            ranges: self.ranges.iter().map(|r| (r.start, r.end)).collect(),
        }
    }

    pub fn from_wire(wire: &WireNode) -> Self {
        Self {
            id: NodeId(wire.name.clone()),
            address: wire.address.clone(),
            online: wire.online,
            ranges: wire
                .ranges
                .iter()
                .map(|&(start, end)| Range { start, end })
                .collect(),
            client: None,
        }
    }
}

/// Wire/persistence form of a [`Node`] -- no client handle, just the data
/// gossip carries and persistence stores. Encoded with `bincode` on the
/// gossip wire and `serde_json` on disk; both read this same type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireNode {
    pub name: String,
    pub address: String,
    pub online: bool,
    pub ranges: Vec<(u64, u64)>,
}

impl WireNode {
    /// A meta payload for a node that hasn't generated any tokens yet
    /// (first boot, pre-`AddLocal`).
    pub fn empty(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            online: true,
            ranges: Vec::new(),
        }
    }
}
