//! Content-addressed blob store for pre-images.
//!
//! Before any file is modified, its full original bytes are persisted here
//! under `.ace/blobs/<sha256>`. The journal's 4 KiB `pre_image` field is a
//! human-readable preview; exact restoration for files of any size goes
//! through this store, keyed by the intent entry's `before_sha`.

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use ace_core::error::{AceError, AceResult};
use ace_core::fingerprint::sha256_hex;

use crate::atomic::atomic_write;

/// Store of original file bytes keyed by their SHA-256.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn blob_path(&self, sha: &str) -> PathBuf {
        self.dir.join(sha)
    }

    /// Persist `bytes`, returning their SHA-256. Writing an already-present
    /// blob is a no-op; content addressing makes the write idempotent.
    pub fn put(&self, bytes: &[u8]) -> AceResult<String> {
        let sha = sha256_hex(bytes);
        let path = self.blob_path(&sha);
        if path.exists() {
            return Ok(sha);
        }
        atomic_write(&path, bytes)?;
        debug!(target: "ace.blobs", sha = %sha, size = bytes.len(), "pre-image blob stored");
        Ok(sha)
    }

    /// Fetch a blob by hash, verifying content integrity on read.
    pub fn get(&self, sha: &str) -> AceResult<Option<Vec<u8>>> {
        let path = self.blob_path(sha);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let actual = sha256_hex(&bytes);
        if actual != sha {
            return Err(AceError::Integrity {
                file: path.display().to_string(),
                expected: sha.to_owned(),
                actual,
            });
        }
        Ok(Some(bytes))
    }

    #[must_use]
    pub fn contains(&self, sha: &str) -> bool {
        self.blob_path(sha).exists()
    }
}
