//! Core data model and routing logic for the elan blob-storage cluster.
//!
//! This crate owns the consistent hash ring and nothing else: digests,
//! nodes, segments, the ring's token generation / lookup / reconciliation
//! operations, and the on-disk persistence format for a node's own
//! configuration. It has no networking and no gossip dependency -- those
//! live in `membership` and `blob`, which both depend on this crate.

pub mod digest;
pub mod error;
pub mod node;
pub mod persistence;
pub mod range;
pub mod ring;
pub mod segment;

pub use digest::Digest;
pub use error::{Error, Result};
pub use node::{HandleError, HandleResult, Node, NodeHandle, NodeId, WireNode};
pub use persistence::{PersistedState, Persistence};
pub use range::Range;
pub use ring::Ring;
pub use segment::Segment;
