//! Content index for incremental scanning.
//!
//! Tracks `{path, size, mtime, sha256}` per file under `.ace/index.json` so
//! the next run can skip unchanged files cheaply: the size/mtime comparison
//! is the fast path, and a hash comparison confirms when they match (mtime
//! alone is not trustworthy across filesystems).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use ace_core::error::AceResult;
use ace_core::fingerprint::sha256_hex;

use ace_durability::atomic::{read_json_store, write_json_store};

/// Metadata for a single indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
    /// Hex digest, no prefix.
    pub sha256: String,
}

/// Per-project content index, keyed by normalized relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIndex {
    pub entries: BTreeMap<String, FileEntry>,
}

fn file_mtime(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or(0)
}

impl ContentIndex {
    pub fn load(path: &Path) -> AceResult<Self> {
        Ok(read_json_store(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> AceResult<()> {
        write_json_store(path, self)
    }

    /// Hash and record one file.
    pub fn add_file(&mut self, root: &Path, rel: &str) -> AceResult<&FileEntry> {
        let abs = root.join(rel);
        let bytes = fs::read(&abs)?;
        let meta = fs::metadata(&abs)?;
        let entry = FileEntry {
            path: rel.to_owned(),
            size: meta.len(),
            mtime: file_mtime(&meta),
            sha256: sha256_hex(&bytes),
        };
        self.entries.insert(rel.to_owned(), entry);
        Ok(&self.entries[rel])
    }

    /// Whether a file is new or has changed since it was last indexed.
    #[must_use]
    pub fn has_changed(&self, root: &Path, rel: &str) -> bool {
        let Some(entry) = self.entries.get(rel) else {
            return true;
        };
        let abs = root.join(rel);
        let Ok(meta) = fs::metadata(&abs) else {
            return true;
        };
        if meta.len() != entry.size || file_mtime(&meta) != entry.mtime {
            return true;
        }
        match fs::read(&abs) {
            Ok(bytes) => sha256_hex(&bytes) != entry.sha256,
            Err(_) => true,
        }
    }

    /// Filter `files` down to those that are new or changed.
    #[must_use]
    pub fn changed_files<'a>(&self, root: &Path, files: &'a [String]) -> Vec<&'a str> {
        files
            .iter()
            .filter(|rel| self.has_changed(root, rel))
            .map(String::as_str)
            .collect()
    }

    /// Rebuild from scratch for the given file set; unreadable files are
    /// dropped from the index.
    pub fn rebuild(&mut self, root: &Path, files: &[String]) {
        self.entries.clear();
        for rel in files {
            let _ = self.add_file(root, rel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_file_counts_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let index = ContentIndex::default();
        assert!(index.has_changed(dir.path(), "a.py"));
    }

    #[test]
    fn unchanged_file_is_not_changed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let mut index = ContentIndex::default();
        index.add_file(dir.path(), "a.py").unwrap();
        assert!(!index.has_changed(dir.path(), "a.py"));
    }

    #[test]
    fn content_change_is_detected_even_with_same_length() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let mut index = ContentIndex::default();
        index.add_file(dir.path(), "a.py").unwrap();
        // same byte length, different content
        fs::write(dir.path().join("a.py"), "x = 2\n").unwrap();
        assert!(index.has_changed(dir.path(), "a.py"));
    }

    #[test]
    fn deleted_file_counts_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let mut index = ContentIndex::default();
        index.add_file(dir.path(), "a.py").unwrap();
        fs::remove_file(dir.path().join("a.py")).unwrap();
        assert!(index.has_changed(dir.path(), "a.py"));
    }

    #[test]
    fn save_load_roundtrip_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let mut index = ContentIndex::default();
        index.add_file(dir.path(), "a.py").unwrap();

        let store_a = dir.path().join("index_a.json");
        let store_b = dir.path().join("index_b.json");
        index.save(&store_a).unwrap();
        index.save(&store_b).unwrap();
        assert_eq!(fs::read(&store_a).unwrap(), fs::read(&store_b).unwrap());

        let loaded = ContentIndex::load(&store_a).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn changed_files_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();
        let mut index = ContentIndex::default();
        index.add_file(dir.path(), "a.py").unwrap();

        let files = vec!["a.py".to_owned(), "b.py".to_owned()];
        assert_eq!(index.changed_files(dir.path(), &files), vec!["b.py"]);
    }
}
