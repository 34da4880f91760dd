//! Wire payloads exchanged with the gossip collaborator.
//!
//! Both shapes are plain `serde` DTOs over `corelib::WireNode` -- the
//! adapter never serialises a `corelib::Node` directly since that type
//! carries a non-serializable client handle.

use corelib::WireNode;
use serde::{Deserialize, Serialize};

/// Limited-size payload gossiped continuously: this node's own record.
/// Sent with empty `ranges` pre-initialisation (first boot).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaPayload(pub WireNode);

/// Arbitrary-size payload exchanged on join / full-state requests: the
/// sender's complete view of the ring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatePayload(pub Vec<WireNode>);

/// A reliable unicast message. Currently only used for the "a peer has
/// forgotten itself" recovery path, where we push back an authoritative
/// state payload for that one peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum UnicastMessage {
    /// Our authoritative record for the named peer (the recovery
    /// path) or the full ring (sent to new joiners so they catch up
    /// faster than gossip alone would).
    AuthoritativeState(StatePayload),
}
