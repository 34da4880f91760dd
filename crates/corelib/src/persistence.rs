//! Per-node configuration store: this node's name, address, owned ranges,
//! and a best-effort directory of known peers. Holds exactly what can't be
//! reconstructed from gossip.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::WireNode;

const FILE_NAME: &str = "elan-state.json";

/// The single persisted document: `{thisNode, nodes, initialised}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub this_node: Option<WireNode>,
    pub nodes: Vec<WireNode>,
    pub initialised: bool,
}

/// Loads and atomically rewrites [`PersistedState`] under a data directory.
pub struct Persistence {
    path: PathBuf,
}

impl Persistence {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(FILE_NAME),
        }
    }

    /// Read the document at startup. Absent file means first boot -- the
    /// caller should let the ring initialise this node rather than treat
    /// this as an error.
    pub fn load(&self) -> Result<Option<PersistedState>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let state: PersistedState = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Persistence(format!("corrupt state file: {e}")))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(format!(
                "reading {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Rewrite the document atomically: write to a temp file in the same
    /// directory, fsync, rename over the real path.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Persistence("state path has no parent directory".into()))?;
        fs::create_dir_all(dir)
            .map_err(|e| Error::Persistence(format!("creating {}: {e}", dir.display())))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::Persistence(format!("creating temp file: {e}")))?;
        let encoded = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::Persistence(format!("encoding state: {e}")))?;
        tmp.write_all(&encoded)
            .map_err(|e| Error::Persistence(format!("writing temp file: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::Persistence(format!("fsync: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Persistence(format!("renaming into place: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::new(dir.path());
        assert!(p.load().unwrap().is_none());
    }

    #[test]
    fn round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::new(dir.path());
        let state = PersistedState {
            this_node: Some(WireNode::empty("A", "127.0.0.1:9000")),
            nodes: vec![WireNode::empty("B", "127.0.0.1:9001")],
            initialised: true,
        };
        p.save(&state).unwrap();
        let loaded = p.load().unwrap().unwrap();
        assert_eq!(loaded.this_node.unwrap().name, "A");
        assert_eq!(loaded.nodes.len(), 1);
        assert!(loaded.initialised);
    }
}
