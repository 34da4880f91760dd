//! Errors for the gossip-driven membership adapter.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("ring error: {0}")]
    Ring(#[from] corelib::Error),

    #[error("failed to join gossip cluster: {0}")]
    Join(String),

    #[error("gossip transport error: {0}")]
    Transport(String),

    #[error("failed to decode gossip payload: {0}")]
    Decode(String),

    #[error("failed to encode gossip payload: {0}")]
    Encode(String),
}
