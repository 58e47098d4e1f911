//! Learned skiplist of `(rule, file, content-hash)` triples.
//!
//! Entries arrive from the learner's consecutive-revert threshold and from
//! explicit user skips; matching findings are filtered out before plan
//! synthesis on subsequent runs. Keying includes the file's content hash, so
//! editing the file releases its entries automatically.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ace_core::clock::Clock;
use ace_core::error::AceResult;
use ace_core::fingerprint::sha256_hex;
use ace_core::types::Finding;
use ace_durability::atomic::{read_json_store, write_json_store};

/// Reason recorded for entries created by the learner.
pub const REASON_AUTO: &str = "consecutive-reverts";

/// One suppressed `(rule, file, content-hash)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipEntry {
    pub rule_id: String,
    pub file: String,
    /// SHA-256 of the whole file at the time the entry was learned.
    pub content_hash: String,
    /// ISO-8601 UTC.
    pub added_at: String,
    pub reason: String,
}

/// Persistent skiplist, keyed by a 16-hex digest of the triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skiplist {
    entries: BTreeMap<String, SkipEntry>,
}

fn entry_key(rule_id: &str, file: &str, content_hash: &str) -> String {
    let seed = format!("{rule_id}|{file}|{content_hash}");
    sha256_hex(seed.as_bytes())[..16].to_string()
}

impl Skiplist {
    pub fn load(path: &Path) -> AceResult<Self> {
        Ok(read_json_store(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> AceResult<()> {
        write_json_store(path, self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a triple; returns the entry key.
    pub fn add(
        &mut self,
        rule_id: &str,
        file: &str,
        content_hash: &str,
        reason: &str,
        clock: &Clock,
    ) -> String {
        let key = entry_key(rule_id, file, content_hash);
        info!(target: "ace.skiplist", rule_id, file, reason, "skiplist entry added");
        self.entries.insert(
            key.clone(),
            SkipEntry {
                rule_id: rule_id.to_owned(),
                file: file.to_owned(),
                content_hash: content_hash.to_owned(),
                added_at: clock.iso8601(),
                reason: reason.to_owned(),
            },
        );
        key
    }

    /// Whether `(rule, file)` is suppressed at the file's current content.
    #[must_use]
    pub fn should_skip(&self, rule_id: &str, file: &str, current_hash: &str) -> bool {
        self.entries
            .contains_key(&entry_key(rule_id, file, current_hash))
    }

    /// Drop entries whose file content has moved on. Returns how many were
    /// released.
    pub fn prune_stale(&mut self, current_hashes: &BTreeMap<String, String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            match current_hashes.get(&entry.file) {
                Some(current) => *current == entry.content_hash,
                // file not in this run's set: keep the entry for later runs
                None => true,
            }
        });
        let released = before - self.entries.len();
        if released > 0 {
            debug!(target: "ace.skiplist", released, "stale skiplist entries released");
        }
        released
    }

    /// Filter findings against the skiplist. `current_hashes` maps each
    /// file in the run to its content hash.
    #[must_use]
    pub fn filter_findings(
        &self,
        findings: Vec<Finding>,
        current_hashes: &BTreeMap<String, String>,
    ) -> (Vec<Finding>, usize) {
        if self.entries.is_empty() {
            return (findings, 0);
        }
        let total = findings.len();
        let kept: Vec<Finding> = findings
            .into_iter()
            .filter(|finding| {
                current_hashes
                    .get(&finding.file)
                    .is_none_or(|hash| !self.should_skip(&finding.rule_id, &finding.file, hash))
            })
            .collect();
        let skipped = total - kept.len();
        (kept, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(rule: &str, file: &str) -> Finding {
        Finding::new(rule, file, 3, 3, 0.8, 0.2, "m", "slice")
    }

    #[test]
    fn add_then_skip_matches_same_content() {
        let mut list = Skiplist::default();
        list.add("r", "a.py", "hash1", REASON_AUTO, &Clock::Fixed(0));
        assert!(list.should_skip("r", "a.py", "hash1"));
        assert!(!list.should_skip("r", "a.py", "hash2"));
        assert!(!list.should_skip("other", "a.py", "hash1"));
    }

    #[test]
    fn changed_content_releases_entry() {
        let mut list = Skiplist::default();
        list.add("r", "a.py", "hash1", REASON_AUTO, &Clock::Fixed(0));

        let mut hashes = BTreeMap::new();
        hashes.insert("a.py".to_owned(), "hash2".to_owned());
        assert_eq!(list.prune_stale(&hashes), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn files_outside_the_run_are_kept() {
        let mut list = Skiplist::default();
        list.add("r", "a.py", "hash1", REASON_AUTO, &Clock::Fixed(0));
        let hashes = BTreeMap::new();
        assert_eq!(list.prune_stale(&hashes), 0);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn filter_drops_only_matching_findings() {
        let mut list = Skiplist::default();
        list.add("r", "a.py", "hash1", REASON_AUTO, &Clock::Fixed(0));

        let mut hashes = BTreeMap::new();
        hashes.insert("a.py".to_owned(), "hash1".to_owned());
        hashes.insert("b.py".to_owned(), "hash9".to_owned());

        let findings = vec![finding("r", "a.py"), finding("r", "b.py"), finding("q", "a.py")];
        let (kept, skipped) = list.filter_findings(findings, &hashes);
        assert_eq!(skipped, 1);
        let kept_pairs: Vec<(&str, &str)> = kept
            .iter()
            .map(|f| (f.rule_id.as_str(), f.file.as_str()))
            .collect();
        assert_eq!(kept_pairs, vec![("r", "b.py"), ("q", "a.py")]);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skiplist.json");
        let mut list = Skiplist::default();
        list.add("r", "a.py", "hash1", "manual", &Clock::Fixed(7));
        list.save(&path).unwrap();

        let loaded = Skiplist::load(&path).unwrap();
        assert_eq!(loaded, list);
        assert!(loaded.should_skip("r", "a.py", "hash1"));
    }
}
