//! Content-addressing identifier.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `{hash, size}` -- the content-addressing identifier used throughout the
/// blob store. `hash` is the hex encoding of an opaque digest (sha256,
/// blake3, whatever the caller's CAS protocol mandates); elan never
/// computes or verifies it, it only routes on a prefix of it.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Digest {
    pub hash: String,
    pub size: i64,
}

impl Digest {
    pub fn new(hash: impl Into<String>, size: i64) -> Self {
        Self {
            hash: hash.into(),
            size,
        }
    }

    /// Parse the conventional `<hex-hash>/<size>` pairing used by the
    /// byte-stream resource name and the RPC surface.
    pub fn parse(hash: &str, size: &str) -> Result<Self> {
        if hash.len() < 16 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidDigest(format!(
                "hash must be at least 16 hex characters, got {:?}",
                hash
            )));
        }
        let size: i64 = size
            .parse()
            .map_err(|_| Error::InvalidDigest(format!("invalid size {:?}", size)))?;
        Ok(Self {
            hash: hash.to_string(),
            size,
        })
    }

    /// The 64-bit routing key: the first 8 bytes of `hash`, big-endian.
    ///
    /// Digests that share this prefix route identically -- that's expected,
    /// not a collision bug.
    pub fn routing_key(&self) -> Result<u64> {
        let bytes = hex::decode(&self.hash)
            .map_err(|e| Error::InvalidDigest(format!("hash is not valid hex: {e}")))?;
        if bytes.len() < 8 {
            return Err(Error::InvalidDigest(format!(
                "hash {:?} is shorter than 8 bytes",
                self.hash
            )));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        Ok(u64::from_be_bytes(buf))
    }
}
