//! Atomic file writes and JSON store helpers.
//!
//! `atomic_write` is the single primitive every persistent store goes
//! through: write to a sibling temporary in the same directory (so the
//! rename is atomic on POSIX file systems), fsync the file, rename over the
//! target, fsync the parent directory. Killing the process at any point
//! leaves the target either fully old or fully new, never truncated.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use ace_core::canonical::canonical_json_bytes;
use ace_core::error::{AceError, AceResult};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_owned());
    let nonce = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    path.with_file_name(format!(".{name}.{pid}.{nonce}.tmp"))
}

/// Write `bytes` to `path` atomically: sibling temp, fsync, rename, parent
/// dir fsync.
///
/// Failures before the rename surface as plain I/O errors; failures at or
/// after the rename surface as [`AceError::Durability`], since the target
/// may already hold the new content without full directory durability.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> AceResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)?;

    let temp = temp_path_for(path);
    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(AceError::Durability {
            path: path.to_path_buf(),
            detail: format!("rename failed: {err}"),
        });
    }

    let dir = fs::File::open(&parent).map_err(|err| AceError::Durability {
        path: path.to_path_buf(),
        detail: format!("cannot open parent directory for fsync: {err}"),
    })?;
    dir.sync_all().map_err(|err| AceError::Durability {
        path: path.to_path_buf(),
        detail: format!("parent directory fsync failed: {err}"),
    })?;

    Ok(())
}

/// Serialize `value` to canonical pretty JSON and write it atomically.
pub fn write_json_store<T: Serialize>(path: &Path, value: &T) -> AceResult<()> {
    let bytes = canonical_json_bytes(value, true)?;
    atomic_write(path, &bytes)
}

/// Read a JSON store. `Ok(None)` when the file does not exist; a corrupted
/// store logs a warning and also yields `None` so callers start fresh rather
/// than wedging the run.
pub fn read_json_store<T: DeserializeOwned>(path: &Path) -> AceResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(
                target: "ace.store",
                path = %path.display(),
                error = %err,
                "store is corrupted; starting fresh"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: u32,
        name: String,
    }

    #[test]
    fn atomic_write_creates_file_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn atomic_write_replaces_existing_content_fully() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"first version, longer").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn atomic_write_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c/out.json");
        atomic_write(&path, b"deep").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"deep");
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"x").unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out.json"]);
    }

    #[test]
    fn json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let value = Sample {
            count: 3,
            name: "ace".into(),
        };
        write_json_store(&path, &value).unwrap();
        let loaded: Option<Sample> = read_json_store(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn json_store_is_byte_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        let value = Sample {
            count: 7,
            name: "same".into(),
        };
        write_json_store(&a, &value).unwrap();
        write_json_store(&b, &value).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn missing_store_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Sample> = read_json_store(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn corrupted_store_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"{not json").unwrap();
        let loaded: Option<Sample> = read_json_store(&path).unwrap();
        assert_eq!(loaded, None);
    }
}
