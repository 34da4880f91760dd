//! Content-addressed API whose placement is determined by the ring: fans
//! out reads and writes to the owner plus its replicas with the configured
//! factor `R`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use corelib::{Digest, Node, NodeHandle, NodeId, Ring};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::{Error, Result};
use crate::rpc::{BatchGetEntry, BatchPutEntry, Status};

/// Builds a fresh client handle for a node transitioning online. Kept as a
/// trait rather than a concrete transport so the façade stays usable in
/// tests with an in-process handle and in production with a real one,
/// without the façade itself knowing which.
pub trait ClientFactory: Send + Sync {
    fn build(&self, node: &Node) -> Option<Arc<dyn NodeHandle>>;
}

/// Quorum size for a write with replication factor `R`: the primary plus a
/// majority of the contacted replicas, `⌈(R+1)/2⌉`.
fn quorum(r: usize) -> usize {
    (r + 1).div_ceil(2)
}

pub struct BlobService {
    ring: Arc<Ring>,
    local_id: NodeId,
    replicas: usize,
    max_blob_size: Option<i64>,
    cancel: CancellationToken,
}

impl BlobService {
    /// Construct the façade and start the background loop that drains the
    /// membership adapter's notification channel, rebuilding client
    /// handles on every online/offline transition it reports.
    pub fn new(
        ring: Arc<Ring>,
        local_id: NodeId,
        replicas: usize,
        max_blob_size: Option<i64>,
        changes: mpsc::Receiver<Node>,
        client_factory: Arc<dyn ClientFactory>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            ring,
            local_id,
            replicas,
            max_blob_size,
            cancel,
        });
        service.clone().spawn_change_drain(changes, client_factory);
        service
    }

    fn spawn_change_drain(
        self: Arc<Self>,
        mut changes: mpsc::Receiver<Node>,
        client_factory: Arc<dyn ClientFactory>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    changed = changes.recv() => {
                        match changed {
                            Some(node) => {
                                let client = if node.online {
                                    client_factory.build(&node)
                                } else {
                                    None
                                };
                                if let Err(e) = self.ring.update_node(&node.id, node.online, client) {
                                    warn!(peer = %node.id, error = %e, "failed to refresh client handle");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    /// Owner plus up to `R - 1` replicas for `digest`, in fan-out order.
    fn route(&self, digest: &Digest) -> Result<Vec<(NodeId, Option<Arc<dyn NodeHandle>>)>> {
        let key = digest
            .routing_key()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let (owner, owner_client) = self.ring.find(key).ok_or_else(|| {
            Error::Unavailable("ring has no segments -- cluster not yet initialised".to_string())
        })?;
        let extra = self.replicas.saturating_sub(1);
        let (names, clients) = self.ring.find_replicas(key, extra, &owner);
        let mut targets = vec![(owner, owner_client)];
        targets.extend(names.into_iter().zip(clients));
        Ok(targets)
    }

    /// `false` only when every contacted replica actively denied the
    /// digest; if every replica instead errored out, that's not a denial
    /// and must not be reported as one -- a spurious "missing" could
    /// trigger a needless re-upload by a CAS client that trusts this
    /// result.
    #[instrument(skip(self), fields(node = %self.local_id))]
    pub async fn exists(&self, digest: &Digest) -> Result<bool> {
        self.check_canceled()?;
        let targets = self.route(digest)?;
        let mut saw_denial = false;
        let mut last_transport_err = None;
        for (name, client) in targets {
            match self
                .with_retry(|| {
                    let client = client.clone();
                    let name = name.clone();
                    async move { call_exists(&name, client, digest).await }
                })
                .await
            {
                Ok(true) => return Ok(true),
                Ok(false) => saw_denial = true,
                Err(e) => last_transport_err = Some(e),
            }
        }
        if saw_denial {
            Ok(false)
        } else {
            Err(last_transport_err.unwrap_or_else(|| {
                Error::Unavailable(format!("no replicas reachable for digest {}", digest.hash))
            }))
        }
    }

    #[instrument(skip(self), fields(node = %self.local_id))]
    pub async fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.check_canceled()?;
        let targets = self.route(digest)?;
        let mut last_transport_err = None;
        for (name, client) in targets {
            match self
                .with_retry(|| {
                    let client = client.clone();
                    let name = name.clone();
                    async move { call_get(&name, client, digest).await }
                })
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(Error::NotFound(_)) => continue,
                Err(e) => last_transport_err = Some(e),
            }
        }
        Err(last_transport_err.unwrap_or_else(|| Error::NotFound(digest.hash.clone())))
    }

    #[instrument(skip(self, bytes), fields(node = %self.local_id))]
    pub async fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<i64> {
        self.check_canceled()?;
        if let Some(max) = self.max_blob_size {
            if digest.size > max {
                return Err(Error::InvalidArgument(format!(
                    "blob size {} exceeds configured maximum {max}",
                    digest.size
                )));
            }
        }
        let targets = self.route(digest)?;
        let owner = targets[0].0.clone();
        let attempt_count = targets.len();

        let results: Vec<(NodeId, Result<i64>)> =
            futures::future::join_all(targets.into_iter().map(|(name, client)| {
                let bytes = bytes.to_vec();
                let digest = digest.clone();
                async move {
                    let result = self
                        .with_retry(|| {
                            let client = client.clone();
                            let name = name.clone();
                            let digest = digest.clone();
                            let bytes = bytes.clone();
                            async move { call_put(&name, client, &digest, &bytes).await }
                        })
                        .await;
                    (name, result)
                }
            }))
            .await;

        let owner_ok = results
            .iter()
            .find(|(name, _)| *name == owner)
            .map(|(_, r)| r.is_ok())
            .unwrap_or(false);
        let success_count = results.iter().filter(|(_, r)| r.is_ok()).count();

        // When `R` exceeds the number of nodes actually in the ring, the
        // required quorum is capped at the number of nodes we could even
        // contact -- per the design notes, acknowledgement from every
        // known node counts as meeting quorum rather than being an
        // unsatisfiable bar.
        let required = quorum(self.replicas).min(attempt_count);
        if owner_ok && success_count >= required {
            Ok(digest.size)
        } else {
            let first_err = results
                .into_iter()
                .find_map(|(_, r)| r.err())
                .unwrap_or_else(|| Error::Unavailable("no replica accepted the write".to_string()));
            Err(first_err)
        }
    }

    pub async fn batch_get(&self, digests: &[Digest]) -> Vec<BatchGetEntry> {
        let mut out = Vec::with_capacity(digests.len());
        for digest in digests {
            let entry = match self.get(digest).await {
                Ok(bytes) => BatchGetEntry {
                    digest: digest.clone(),
                    status: Status::Ok,
                    bytes: Some(bytes),
                },
                Err(e) => BatchGetEntry {
                    digest: digest.clone(),
                    status: Status::from(&e),
                    bytes: None,
                },
            };
            out.push(entry);
        }
        out
    }

    pub async fn batch_put(&self, items: &[(Digest, Vec<u8>)]) -> Vec<BatchPutEntry> {
        let mut out = Vec::with_capacity(items.len());
        for (digest, bytes) in items {
            let status = match self.put(digest, bytes).await {
                Ok(_) => Status::Ok,
                Err(e) => Status::from(&e),
            };
            out.push(BatchPutEntry {
                digest: digest.clone(),
                status,
            });
        }
        out
    }

    fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Retry a single replica call with a small bounded exponential
    /// backoff. Only `Error::Unavailable` is retried; everything
    /// else (including `NotFound`, which is a routing signal, not a
    /// failure) returns immediately.
    async fn with_retry<T, Fut>(&self, mut attempt: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(200),
            max_elapsed_time: Some(Duration::from_millis(500)),
            ..ExponentialBackoff::default()
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Canceled),
                result = attempt() => {
                    match result {
                        Ok(v) => return Ok(v),
                        Err(e) if e.is_retryable() => match backoff.next_backoff() {
                            Some(delay) => tokio::time::sleep(delay).await,
                            None => return Err(e),
                        },
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

async fn call_exists(name: &NodeId, client: Option<Arc<dyn NodeHandle>>, digest: &Digest) -> Result<bool> {
    let client = client.ok_or_else(|| Error::Unavailable(format!("no client handle for {name}")))?;
    client
        .exists(digest)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))
}

async fn call_get(
    name: &NodeId,
    client: Option<Arc<dyn NodeHandle>>,
    digest: &Digest,
) -> Result<Vec<u8>> {
    let client = client.ok_or_else(|| Error::Unavailable(format!("no client handle for {name}")))?;
    client.get(digest, 0, None).await.map_err(|e| {
        let msg = e.to_string();
        if msg.contains("not present locally") {
            Error::NotFound(digest.hash.clone())
        } else {
            Error::Unavailable(msg)
        }
    })
}

async fn call_put(
    name: &NodeId,
    client: Option<Arc<dyn NodeHandle>>,
    digest: &Digest,
    bytes: &[u8],
) -> Result<i64> {
    let client = client.ok_or_else(|| Error::Unavailable(format!("no client handle for {name}")))?;
    client.put(digest, bytes).await.map_err(|e| {
        let msg = e.to_string();
        if msg.contains("already stored with different content") {
            // Content corruption, not a transport hiccup: non-retryable,
            // surfaced as INTERNAL rather than folded into the retry loop.
            Error::Internal(msg)
        } else {
            Error::Unavailable(msg)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_majority_including_primary() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(2), 2);
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(5), 3);
    }
}
