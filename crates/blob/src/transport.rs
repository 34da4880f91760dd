//! In-process reference implementation of `corelib::NodeHandle`.
//!
//! Wiring a production transport (gRPC, QUIC, whatever the external
//! consumer's remote-execution server already speaks) is explicitly out of
//! scope here -- this is the minimum needed to exercise routing,
//! replication, and quorum logic end-to-end in tests without a real
//! network stack.

use async_trait::async_trait;
use corelib::{Digest, HandleResult, NodeHandle};

use crate::store::LocalStore;

#[derive(Debug)]
pub struct LocalDirTransport {
    store: LocalStore,
}

impl LocalDirTransport {
    pub fn new(data_dir: impl Into<std::path::PathBuf>) -> crate::error::Result<Self> {
        Ok(Self {
            store: LocalStore::new(data_dir)?,
        })
    }
}

#[async_trait]
impl NodeHandle for LocalDirTransport {
    async fn exists(&self, digest: &Digest) -> HandleResult<bool> {
        self.store.exists(digest).map_err(Into::into)
    }

    async fn get(&self, digest: &Digest, offset: u64, length: Option<u64>) -> HandleResult<Vec<u8>> {
        self.store.get(digest, offset, length).map_err(Into::into)
    }

    async fn put(&self, digest: &Digest, bytes: &[u8]) -> HandleResult<i64> {
        self.store.put(digest, bytes).map_err(Into::into)
    }
}
