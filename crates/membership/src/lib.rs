//! Gossip-driven cluster membership: drives the ring from an abstract
//! gossip collaborator and publishes per-node change notifications.

pub mod adapter;
pub mod codec;
pub mod error;
pub mod foca_transport;
pub mod gossip;
pub mod protocol;

pub use adapter::{AdapterConfig, MembershipAdapter, RingDataSource};
pub use error::{Error, Result};
pub use foca_transport::{FocaTransport, PeerIdentity};
pub use gossip::{GossipEvent, GossipTransport, LocalDataSource};
pub use protocol::{MetaPayload, StatePayload, UnicastMessage};
