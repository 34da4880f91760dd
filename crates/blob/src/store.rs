//! Local on-disk content-addressed storage backing a single node.
//!
//! Blobs are stored one file per digest, named after the hex hash, under
//! the node's data directory. Writes land in a temp file first and are
//! renamed into place -- the same atomic-write pattern `corelib::Persistence`
//! uses for the node's own config document.

use std::io::Write;
use std::path::{Path, PathBuf};

use corelib::Digest;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::Internal(format!("creating blob store root: {e}")))?;
        Ok(Self { root })
    }

    fn path_for(&self, digest: &Digest) -> PathBuf {
        self.root.join(&digest.hash)
    }

    pub fn exists(&self, digest: &Digest) -> Result<bool> {
        Ok(self.path_for(digest).is_file())
    }

    pub fn get(&self, digest: &Digest, offset: u64, length: Option<u64>) -> Result<Vec<u8>> {
        let path = self.path_for(digest);
        let bytes = std::fs::read(&path)
            .map_err(|_| Error::NotFound(format!("digest {} not present locally", digest.hash)))?;
        let offset = offset as usize;
        if offset > bytes.len() {
            return Err(Error::InvalidArgument(format!(
                "offset {offset} beyond blob length {}",
                bytes.len()
            )));
        }
        let end = match length {
            Some(len) => (offset + len as usize).min(bytes.len()),
            None => bytes.len(),
        };
        Ok(bytes[offset..end].to_vec())
    }

    /// Write `bytes` under `digest`. An existing file with identical
    /// content is a no-op (content-addressed overwrite semantics);
    /// an existing file with *different* content is corruption, not a
    /// legitimate write, and is rejected rather than silently replaced.
    pub fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<i64> {
        if bytes.len() as i64 != digest.size {
            return Err(Error::InvalidArgument(format!(
                "digest declares size {} but {} bytes were supplied",
                digest.size,
                bytes.len()
            )));
        }
        let path = self.path_for(digest);
        if let Ok(existing) = std::fs::read(&path) {
            if existing == bytes {
                return Ok(digest.size);
            }
            return Err(Error::Internal(format!(
                "digest {} already stored with different content",
                digest.hash
            )));
        }
        write_atomic(&self.root, &path, bytes)?;
        Ok(digest.size)
    }
}

fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::Internal(format!("creating temp file for blob write: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Error::Internal(format!("writing blob temp file: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::Internal(format!("fsyncing blob temp file: {e}")))?;
    tmp.persist(dest)
        .map_err(|e| Error::Internal(format!("renaming blob temp file into place: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(bytes: &[u8]) -> Digest {
        Digest::new(hex::encode(bytes), bytes.len() as i64)
    }

    #[test]
    fn round_trips_a_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let d = digest(b"hello world");
        assert!(!store.exists(&d).unwrap());
        store.put(&d, b"hello world").unwrap();
        assert!(store.exists(&d).unwrap());
        assert_eq!(store.get(&d, 0, None).unwrap(), b"hello world");
    }

    #[test]
    fn get_respects_offset_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let d = digest(b"0123456789");
        store.put(&d, b"0123456789").unwrap();
        assert_eq!(store.get(&d, 3, Some(4)).unwrap(), b"3456");
    }

    #[test]
    fn identical_overwrite_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let d = digest(b"same");
        store.put(&d, b"same").unwrap();
        store.put(&d, b"same").unwrap();
    }

    #[test]
    fn conflicting_overwrite_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let d = Digest::new(hex::encode(b"fixed-hash-value"), 4);
        store.put(&d, b"abcd").unwrap();
        let err = store.put(&d, b"zzzz").unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let d = digest(b"abc");
        let err = store.put(&d, b"too long for the declared size").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
