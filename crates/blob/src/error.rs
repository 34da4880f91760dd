//! Status-code taxonomy for the blob façade: every variant
//! maps to one of the four standard codes a remote-execution CAS/ByteStream
//! client expects to see.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("digest not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// Transient transport errors are the only ones the façade retries
    /// (the only category the façade retries); everything else is either a
    /// routing signal (NOT_FOUND) handled by falling through to the next
    /// replica, or a terminal condition the caller must see.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

impl From<corelib::Error> for Error {
    fn from(e: corelib::Error) -> Self {
        match e {
            corelib::Error::EmptyRing | corelib::Error::UnknownNode(_) => {
                Error::Unavailable(e.to_string())
            }
            other => Error::Internal(other.to_string()),
        }
    }
}
