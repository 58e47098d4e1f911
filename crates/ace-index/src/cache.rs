//! Content-addressed memoization of detector results.
//!
//! Keyed by `(path, file_sha256, ruleset_hash, engine_version)` and guarded
//! by per-shard locks (shard chosen by path hash). The cache is a pure
//! memoizer: for any fixed source tree and policy, findings with the cache
//! on, off, cold, or warm are byte-identical. Invalidation is purely
//! functional — hash mismatch, ruleset mismatch, version mismatch, or TTL
//! expiry — and persisted state is a flat canonical-JSON map, so shard
//! layout never leaks into the file.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use ace_core::error::{AceError, AceResult};
use ace_core::types::Finding;

use ace_durability::atomic::{read_json_store, write_json_store};

const SHARD_COUNT: usize = 16;

/// One memoized detector result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub file_sha: String,
    pub ruleset_hash: String,
    pub engine_version: String,
    /// Seconds since the Unix epoch at insertion.
    pub inserted_at: u64,
    pub findings: Vec<Finding>,
}

/// Hit/miss counters surfaced in the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Sharded detector result cache.
#[derive(Debug)]
pub struct DetectorCache {
    shards: Vec<Mutex<BTreeMap<String, CacheEntry>>>,
    /// Entries older than this many seconds are stale; `None` disables TTL.
    ttl_seconds: Option<u64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DetectorCache {
    #[must_use]
    pub fn new(ttl_seconds: Option<u64>) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(BTreeMap::new())).collect();
        Self {
            shards,
            ttl_seconds,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, path: &str) -> &Mutex<BTreeMap<String, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Look up a memoized result. Every invalidation rule is checked here:
    /// file hash, ruleset hash, engine version, TTL.
    pub fn lookup(
        &self,
        path: &str,
        file_sha: &str,
        ruleset_hash: &str,
        engine_version: &str,
        now_epoch: u64,
    ) -> AceResult<Option<Vec<Finding>>> {
        let shard = self
            .shard_for(path)
            .lock()
            .map_err(|_| AceError::subsystem("cache", std::io::Error::other("shard poisoned")))?;
        let Some(entry) = shard.get(path) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        let fresh = entry.file_sha == file_sha
            && entry.ruleset_hash == ruleset_hash
            && entry.engine_version == engine_version
            && self
                .ttl_seconds
                .is_none_or(|ttl| now_epoch.saturating_sub(entry.inserted_at) <= ttl);
        if fresh {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(entry.findings.clone()))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    pub fn insert(
        &self,
        path: &str,
        file_sha: &str,
        ruleset_hash: &str,
        engine_version: &str,
        now_epoch: u64,
        findings: Vec<Finding>,
    ) -> AceResult<()> {
        let mut shard = self
            .shard_for(path)
            .lock()
            .map_err(|_| AceError::subsystem("cache", std::io::Error::other("shard poisoned")))?;
        shard.insert(
            path.to_owned(),
            CacheEntry {
                file_sha: file_sha.to_owned(),
                ruleset_hash: ruleset_hash.to_owned(),
                engine_version: engine_version.to_owned(),
                inserted_at: now_epoch,
                findings,
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self
            .shards
            .iter()
            .map(|s| s.lock().map(|m| m.len()).unwrap_or(0))
            .sum();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    /// Load persisted entries from `.ace/cache.db`.
    pub fn load(&self, path: &Path) -> AceResult<()> {
        let flat: Option<BTreeMap<String, CacheEntry>> = read_json_store(path)?;
        let Some(flat) = flat else {
            return Ok(());
        };
        debug!(target: "ace.cache", entries = flat.len(), "cache warmed from disk");
        for (key, entry) in flat {
            let mut shard = self.shard_for(&key).lock().map_err(|_| {
                AceError::subsystem("cache", std::io::Error::other("shard poisoned"))
            })?;
            shard.insert(key.clone(), entry);
        }
        Ok(())
    }

    /// Persist all entries as one flat, canonically serialized map.
    pub fn save(&self, path: &Path) -> AceResult<()> {
        let mut flat: BTreeMap<String, CacheEntry> = BTreeMap::new();
        for shard in &self.shards {
            let shard = shard.lock().map_err(|_| {
                AceError::subsystem("cache", std::io::Error::other("shard poisoned"))
            })?;
            for (key, entry) in shard.iter() {
                flat.insert(key.clone(), entry.clone());
            }
        }
        write_json_store(path, &flat)
    }
}
