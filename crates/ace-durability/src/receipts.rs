//! Receipt persistence.
//!
//! One JSON file per applied plan under `.ace/receipts/<plan-id>.json`,
//! written through the atomic store. Receipts are the audit surface: before
//! and after hashes, guard verdicts, the policy hash that allowed the plan,
//! and the apply duration.

use std::fs;
use std::path::PathBuf;

use ace_core::error::AceResult;
use ace_core::types::Receipt;

use crate::atomic::{read_json_store, write_json_store};

/// Store of per-plan receipts.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn receipt_path(&self, plan_id: &str) -> PathBuf {
        self.dir.join(format!("{plan_id}.json"))
    }

    /// Persist a receipt; the file name is the plan id.
    pub fn write(&self, receipt: &Receipt) -> AceResult<PathBuf> {
        let path = self.receipt_path(&receipt.plan_id);
        write_json_store(&path, receipt)?;
        Ok(path)
    }

    pub fn read(&self, plan_id: &str) -> AceResult<Option<Receipt>> {
        read_json_store(&self.receipt_path(plan_id))
    }

    /// Plan ids with stored receipts, sorted.
    pub fn list(&self) -> AceResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(plan_id: &str) -> Receipt {
        Receipt {
            plan_id: plan_id.into(),
            file: "src/app.py".into(),
            before_sha: "a".repeat(64),
            after_sha: "b".repeat(64),
            parse_valid: true,
            invariants_met: true,
            estimated_risk: 0.62,
            duration_ms: 12,
            policy_hash: "c".repeat(16),
            timestamp: "2026-08-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path().join("receipts"));
        let original = receipt("plan-abc123def456");
        store.write(&original).unwrap();
        assert_eq!(store.read("plan-abc123def456").unwrap(), Some(original));
    }

    #[test]
    fn missing_receipt_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path().join("receipts"));
        assert_eq!(store.read("plan-missing").unwrap(), None);
    }

    #[test]
    fn list_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::new(dir.path().join("receipts"));
        store.write(&receipt("plan-zzz")).unwrap();
        store.write(&receipt("plan-aaa")).unwrap();
        assert_eq!(store.list().unwrap(), vec!["plan-aaa", "plan-zzz"]);
    }
}
