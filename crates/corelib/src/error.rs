//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating the ring or its data model.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// A node with this id is already present (`AddLocal` on a known node).
    #[error("node {0} already exists in the ring")]
    NodeExists(String),

    /// Token generation exhausted its collision-retry budget.
    #[error("could not generate a non-colliding token for node {0} after {1} attempts")]
    TokenCollision(String, u32),

    /// An incoming `Update` disagrees with the local record for a known node.
    ///
    /// Per R3, the sequence of `start` values for a known node must match
    /// exactly; any mismatch is fatal for that update only.
    #[error(
        "ring disagreement for node {node}: start at position {position} is {incoming}, \
         local record has {local}"
    )]
    RingDisagreement {
        node: String,
        position: usize,
        local: u64,
        incoming: u64,
    },

    /// Two nodes claim the same segment `start`.
    #[error(
        "segment start {start} is already claimed by node {existing}, node {incoming} disagrees"
    )]
    InitialisationCollision {
        start: u64,
        existing: String,
        incoming: String,
    },

    /// `Verify()` found one or more coverage violations.
    #[error("ring integrity check failed: {0}")]
    Integrity(String),

    /// The ring has no segments at all.
    #[error("ring is empty")]
    EmptyRing,

    /// Lookup or mutation referenced a node that isn't known.
    #[error("unknown node {0}")]
    UnknownNode(String),

    /// A digest string could not be parsed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Persistence I/O failure.
    #[error("persistence error: {0}")]
    Persistence(String),
}
