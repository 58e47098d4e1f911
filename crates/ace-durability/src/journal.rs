//! Append-only, fsync-ordered edit journal.
//!
//! One JSONL file per run under `.ace/journals/<run-id>.jsonl`, three entry
//! types (intent, success, revert). Every append flushes and fsyncs before
//! returning, so for any file the intent line is durable strictly before its
//! success or revert line. The journal plus the blob store are sufficient to
//! restore every touched file to its exact pre-run bytes.
//!
//! Wire format is forward-compatible: unknown fields are ignored; a line
//! missing required fields rejects the line and marks the run
//! non-recoverable.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ace_core::canonical::canonical_json_line;
use ace_core::clock::Clock;
use ace_core::error::{AceError, AceResult};
use ace_core::fingerprint::sha256_hex;

use crate::blobs::BlobStore;

/// Bytes of original content kept inline in the intent entry as a preview.
/// Full content lives in the blob store regardless of size.
pub const PRE_IMAGE_PREVIEW_BYTES: usize = 4096;

/// Reason recorded when crash recovery rolls back an orphaned intent.
pub const REASON_CRASH_ORPHAN: &str = "crash-orphan";

/// Reason recorded when the user reverts a run.
pub const REASON_MANUAL: &str = "manual";

/// Intent to modify a file, appended before any bytes change on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentEntry {
    pub timestamp: String,
    /// Normalized relative path.
    pub file: String,
    pub before_sha: String,
    pub before_size: u64,
    /// Sorted rule ids backing the plan.
    pub rule_ids: Vec<String>,
    pub plan_id: String,
    /// First 4 KiB of the original content, lossily decoded, for human
    /// inspection. Exact restore uses the blob store keyed by `before_sha`.
    pub pre_image: String,
    /// Expected post-apply hash, computed before the write; lets crash
    /// recovery verify an orphaned write exactly.
    pub after_sha: String,
}

/// Successful modification of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEntry {
    pub timestamp: String,
    pub file: String,
    pub after_sha: String,
    pub after_size: u64,
    pub receipt_id: String,
}

/// Revert record: guard rejection, user revert, or crash recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevertEntry {
    pub timestamp: String,
    pub file: String,
    pub from_sha: String,
    pub to_sha: String,
    /// Guard layer name, `manual`, or `crash-orphan`.
    pub reason: String,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JournalEntry {
    Intent(IntentEntry),
    Success(SuccessEntry),
    Revert(RevertEntry),
}

impl JournalEntry {
    #[must_use]
    pub fn file(&self) -> &str {
        match self {
            Self::Intent(e) => &e.file,
            Self::Success(e) => &e.file,
            Self::Revert(e) => &e.file,
        }
    }
}

/// Single-writer journal handle. All appends serialize through one mutex and
/// fsync before returning.
#[derive(Debug)]
pub struct Journal {
    run_id: String,
    path: PathBuf,
    writer: Mutex<fs::File>,
}

impl Journal {
    /// Create (or reopen for append) the journal for `run_id`, fsyncing the
    /// journals directory so the new file itself is durable.
    pub fn create(run_id: &str, journals_dir: &Path) -> AceResult<Self> {
        fs::create_dir_all(journals_dir)?;
        let path = journals_dir.join(format!("{run_id}.jsonl"));
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let dir = fs::File::open(journals_dir)?;
        dir.sync_all()?;
        Ok(Self {
            run_id: run_id.to_owned(),
            path,
            writer: Mutex::new(file),
        })
    }

    /// Reopen an existing journal file for appending (revert / recovery).
    pub fn open(path: &Path) -> AceResult<Self> {
        let run_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = fs::OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            run_id,
            path: path.to_path_buf(),
            writer: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry with full fsync ordering. A failure here makes the
    /// run non-recoverable: no further edits may proceed.
    pub fn append(&self, entry: &JournalEntry) -> AceResult<()> {
        let line = canonical_json_line(entry)?;
        let mut file = self.writer.lock().map_err(|_| {
            AceError::subsystem("journal", std::io::Error::other("journal writer poisoned"))
        })?;
        let io = (|| -> std::io::Result<()> {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
            file.sync_all()
        })();
        io.map_err(|source| AceError::JournalUnrecoverable {
            run_id: self.run_id.clone(),
            journal_path: self.path.clone(),
            source,
        })
    }
}

/// Lossy UTF-8 preview of the first 4 KiB of content.
#[must_use]
pub fn pre_image_preview(bytes: &[u8]) -> String {
    let cut = bytes.len().min(PRE_IMAGE_PREVIEW_BYTES);
    String::from_utf8_lossy(&bytes[..cut]).into_owned()
}

/// Read and parse all entries of a journal. A malformed line is a hard
/// error: revert and recovery cannot trust a journal they cannot fully read.
pub fn read_entries(path: &Path) -> AceResult<Vec<JournalEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry =
            serde_json::from_str(line).map_err(|err| AceError::JournalMalformed {
                journal_path: path.to_path_buf(),
                line: idx + 1,
                detail: err.to_string(),
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Everything needed to undo one completed modification.
#[derive(Debug, Clone, PartialEq)]
pub struct RevertContext {
    pub file: String,
    /// Hash the file must have now (the success entry's `after_sha`).
    pub expected_current_sha: String,
    /// Hash of the bytes to restore (the intent entry's `before_sha`),
    /// which keys the blob store.
    pub original_sha: String,
    pub plan_id: String,
    pub rule_ids: Vec<String>,
}

/// Pair intents with their successes and return revert contexts, most recent
/// first. Intents without a success (guard-rejected or orphaned) carry
/// nothing to undo and are excluded.
#[must_use]
pub fn build_revert_plan(entries: &[JournalEntry]) -> Vec<RevertContext> {
    let mut pending: Vec<IntentEntry> = Vec::new();
    let mut completed: Vec<RevertContext> = Vec::new();

    for entry in entries {
        match entry {
            JournalEntry::Intent(intent) => pending.push(intent.clone()),
            JournalEntry::Success(success) => {
                if let Some(pos) = pending.iter().rposition(|i| i.file == success.file) {
                    let intent = pending.remove(pos);
                    completed.push(RevertContext {
                        file: intent.file,
                        expected_current_sha: success.after_sha.clone(),
                        original_sha: intent.before_sha,
                        plan_id: intent.plan_id,
                        rule_ids: intent.rule_ids,
                    });
                }
            }
            JournalEntry::Revert(revert) => {
                if let Some(pos) = pending.iter().rposition(|i| i.file == revert.file) {
                    pending.remove(pos);
                }
            }
        }
    }

    completed.reverse();
    completed
}

/// Outcome of a run revert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevertReport {
    pub reverted: Vec<String>,
    /// `(file, reason)` pairs left untouched.
    pub skipped: Vec<(String, String)>,
}

/// Revert every completed modification of a run, most recent first.
///
/// Each target is verified against the recorded `after_sha` before any bytes
/// move; a mismatch (the user edited the file since) skips that file with a
/// warning. Restored bytes come from the blob store and are re-verified
/// against the original `before_sha`. Every restoration appends a revert
/// entry to the same journal.
pub fn revert_run(
    root: &Path,
    journal: &Journal,
    blobs: &BlobStore,
    clock: &Clock,
) -> AceResult<RevertReport> {
    let entries = read_entries(journal.path())?;
    let plan = build_revert_plan(&entries);
    let mut report = RevertReport::default();

    for ctx in plan {
        let abs = root.join(&ctx.file);
        let current = match fs::read(&abs) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target: "ace.journal", file = %ctx.file, error = %err, "revert target unreadable; skipping");
                report.skipped.push((ctx.file, format!("unreadable: {err}")));
                continue;
            }
        };
        let current_sha = sha256_hex(&current);
        if current_sha != ctx.expected_current_sha {
            warn!(
                target: "ace.journal",
                file = %ctx.file,
                expected = %ctx.expected_current_sha,
                actual = %current_sha,
                "file changed since apply; skipping revert"
            );
            report
                .skipped
                .push((ctx.file, "content changed since apply".to_owned()));
            continue;
        }
        let Some(original) = blobs.get(&ctx.original_sha)? else {
            warn!(target: "ace.journal", file = %ctx.file, sha = %ctx.original_sha, "pre-image blob missing; skipping revert");
            report
                .skipped
                .push((ctx.file, "pre-image blob missing".to_owned()));
            continue;
        };
        crate::atomic::atomic_write(&abs, &original)?;
        let restored_sha = sha256_hex(&original);
        if restored_sha != ctx.original_sha {
            return Err(AceError::Integrity {
                file: ctx.file,
                expected: ctx.original_sha,
                actual: restored_sha,
            });
        }
        journal.append(&JournalEntry::Revert(RevertEntry {
            timestamp: clock.iso8601(),
            file: ctx.file.clone(),
            from_sha: current_sha,
            to_sha: ctx.original_sha.clone(),
            reason: REASON_MANUAL.to_owned(),
        }))?;
        info!(target: "ace.journal", file = %ctx.file, plan_id = %ctx.plan_id, "reverted");
        report.reverted.push(ctx.file);
    }

    Ok(report)
}

/// Outcome of a crash-recovery pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// Orphaned intents whose files were never modified.
    pub clean: usize,
    /// Files rolled back from a verified orphaned write.
    pub restored: Vec<String>,
    /// Files whose content matched neither hash; left unchanged.
    pub unverified: Vec<String>,
}

/// Scan a journal for trailing intents with no matching success or revert —
/// the signature of a crash mid-apply — and roll back verified orphans.
pub fn recover_run(
    root: &Path,
    journal: &Journal,
    blobs: &BlobStore,
    clock: &Clock,
) -> AceResult<RecoveryReport> {
    let entries = read_entries(journal.path())?;

    let mut pending: Vec<IntentEntry> = Vec::new();
    for entry in &entries {
        match entry {
            JournalEntry::Intent(intent) => pending.push(intent.clone()),
            JournalEntry::Success(e) => {
                if let Some(pos) = pending.iter().rposition(|i| i.file == e.file) {
                    pending.remove(pos);
                }
            }
            JournalEntry::Revert(e) => {
                if let Some(pos) = pending.iter().rposition(|i| i.file == e.file) {
                    pending.remove(pos);
                }
            }
        }
    }

    let mut report = RecoveryReport::default();
    for intent in pending {
        let abs = root.join(&intent.file);
        let current = fs::read(&abs).unwrap_or_default();
        let current_sha = sha256_hex(&current);

        if current_sha == intent.before_sha {
            report.clean += 1;
            continue;
        }
        if current_sha == intent.after_sha {
            let Some(original) = blobs.get(&intent.before_sha)? else {
                warn!(target: "ace.journal", file = %intent.file, "orphan verified but pre-image blob missing");
                report.unverified.push(intent.file);
                continue;
            };
            crate::atomic::atomic_write(&abs, &original)?;
            journal.append(&JournalEntry::Revert(RevertEntry {
                timestamp: clock.iso8601(),
                file: intent.file.clone(),
                from_sha: current_sha,
                to_sha: intent.before_sha.clone(),
                reason: REASON_CRASH_ORPHAN.to_owned(),
            }))?;
            info!(target: "ace.journal", file = %intent.file, "crash orphan rolled back");
            report.restored.push(intent.file);
        } else {
            warn!(
                target: "ace.journal",
                file = %intent.file,
                expected_before = %intent.before_sha,
                expected_after = %intent.after_sha,
                actual = %current_sha,
                "orphaned intent matches neither hash; leaving file unchanged"
            );
            report.unverified.push(intent.file);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(file: &str, before: &str, after: &str, plan: &str) -> JournalEntry {
        JournalEntry::Intent(IntentEntry {
            timestamp: "1970-01-01T00:00:00.000Z".into(),
            file: file.into(),
            before_sha: before.into(),
            before_size: 10,
            rule_ids: vec!["net.request-timeout".into()],
            plan_id: plan.into(),
            pre_image: "preview".into(),
            after_sha: after.into(),
        })
    }

    fn success(file: &str, after: &str) -> JournalEntry {
        JournalEntry::Success(SuccessEntry {
            timestamp: "1970-01-01T00:00:01.000Z".into(),
            file: file.into(),
            after_sha: after.into(),
            after_size: 12,
            receipt_id: "plan-abc".into(),
        })
    }

    #[test]
    fn append_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::create("run-1", &dir.path().join("journals")).unwrap();
        journal.append(&intent("a.py", "s1", "s2", "plan-1")).unwrap();
        journal.append(&success("a.py", "s2")).unwrap();

        let entries = read_entries(journal.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], JournalEntry::Intent(_)));
        assert!(matches!(entries[1], JournalEntry::Success(_)));
    }

    #[test]
    fn intent_precedes_success_in_line_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::create("run-2", &dir.path().join("journals")).unwrap();
        journal.append(&intent("a.py", "s1", "s2", "plan-1")).unwrap();
        journal.append(&success("a.py", "s2")).unwrap();

        let text = fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("\"intent\""));
        assert!(lines[1].contains("\"success\""));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        fs::write(
            &path,
            "{\"type\":\"success\",\"timestamp\":\"t\",\"file\":\"a.py\",\"after_sha\":\"x\",\"after_size\":1,\"receipt_id\":\"r\",\"extra_field\":true}\n",
        )
        .unwrap();
        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_required_field_rejects_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        fs::write(&path, "{\"type\":\"success\",\"file\":\"a.py\"}\n").unwrap();
        let err = read_entries(&path).unwrap_err();
        assert!(matches!(err, AceError::JournalMalformed { line: 1, .. }));
    }

    #[test]
    fn revert_plan_pairs_and_reverses() {
        let entries = vec![
            intent("a.py", "a0", "a1", "plan-1"),
            success("a.py", "a1"),
            intent("b.py", "b0", "b1", "plan-2"),
            success("b.py", "b1"),
        ];
        let plan = build_revert_plan(&entries);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].file, "b.py");
        assert_eq!(plan[1].file, "a.py");
        assert_eq!(plan[1].expected_current_sha, "a1");
        assert_eq!(plan[1].original_sha, "a0");
    }

    #[test]
    fn guard_rejected_intent_is_not_revertable() {
        let entries = vec![
            intent("a.py", "a0", "a1", "plan-1"),
            JournalEntry::Revert(RevertEntry {
                timestamp: "t".into(),
                file: "a.py".into(),
                from_sha: "a0".into(),
                to_sha: "a0".into(),
                reason: "ast_hash".into(),
            }),
        ];
        assert!(build_revert_plan(&entries).is_empty());
    }

    #[test]
    fn revert_run_restores_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let blobs = BlobStore::new(root.join(".ace/blobs"));
        let journal = Journal::create("run-3", &root.join(".ace/journals")).unwrap();
        let clock = Clock::Fixed(1_000);

        let original = b"requests.get(url)\n".to_vec();
        let modified = b"requests.get(url, timeout=30)\n".to_vec();
        let before_sha = blobs.put(&original).unwrap();
        let after_sha = sha256_hex(&modified);
        fs::write(root.join("app.py"), &modified).unwrap();

        journal.append(&intent("app.py", &before_sha, &after_sha, "plan-1")).unwrap();
        journal.append(&success("app.py", &after_sha)).unwrap();

        let report = revert_run(root, &journal, &blobs, &clock).unwrap();
        assert_eq!(report.reverted, vec!["app.py".to_owned()]);
        assert_eq!(fs::read(root.join("app.py")).unwrap(), original);

        let entries = read_entries(journal.path()).unwrap();
        assert!(matches!(entries.last(), Some(JournalEntry::Revert(r)) if r.reason == REASON_MANUAL));
    }

    #[test]
    fn revert_skips_files_changed_since_apply() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let blobs = BlobStore::new(root.join(".ace/blobs"));
        let journal = Journal::create("run-4", &root.join(".ace/journals")).unwrap();
        let clock = Clock::Fixed(1_000);

        let original = b"x = 1\n".to_vec();
        let before_sha = blobs.put(&original).unwrap();
        fs::write(root.join("app.py"), b"user edited this afterwards\n").unwrap();

        journal.append(&intent("app.py", &before_sha, "expected-after", "plan-1")).unwrap();
        journal.append(&success("app.py", "expected-after")).unwrap();

        let report = revert_run(root, &journal, &blobs, &clock).unwrap();
        assert!(report.reverted.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            fs::read(root.join("app.py")).unwrap(),
            b"user edited this afterwards\n"
        );
    }

    #[test]
    fn recovery_ignores_untouched_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let blobs = BlobStore::new(root.join(".ace/blobs"));
        let journal = Journal::create("run-5", &root.join(".ace/journals")).unwrap();
        let clock = Clock::Fixed(1_000);

        let original = b"x = 1\n".to_vec();
        let before_sha = blobs.put(&original).unwrap();
        fs::write(root.join("app.py"), &original).unwrap();

        // crash right after the intent: file never modified
        journal.append(&intent("app.py", &before_sha, "would-be-after", "plan-1")).unwrap();

        let report = recover_run(root, &journal, &blobs, &clock).unwrap();
        assert_eq!(report.clean, 1);
        assert!(report.restored.is_empty());
    }

    #[test]
    fn recovery_rolls_back_verified_orphan_write() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let blobs = BlobStore::new(root.join(".ace/blobs"));
        let journal = Journal::create("run-6", &root.join(".ace/journals")).unwrap();
        let clock = Clock::Fixed(1_000);

        let original = b"x = 1\n".to_vec();
        let modified = b"x = 2\n".to_vec();
        let before_sha = blobs.put(&original).unwrap();
        let after_sha = sha256_hex(&modified);
        // crash after the write but before the success line
        fs::write(root.join("app.py"), &modified).unwrap();
        journal.append(&intent("app.py", &before_sha, &after_sha, "plan-1")).unwrap();

        let report = recover_run(root, &journal, &blobs, &clock).unwrap();
        assert_eq!(report.restored, vec!["app.py".to_owned()]);
        assert_eq!(fs::read(root.join("app.py")).unwrap(), original);

        let entries = read_entries(journal.path()).unwrap();
        assert!(
            matches!(entries.last(), Some(JournalEntry::Revert(r)) if r.reason == REASON_CRASH_ORPHAN)
        );
    }

    #[test]
    fn recovery_leaves_unverifiable_content_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let blobs = BlobStore::new(root.join(".ace/blobs"));
        let journal = Journal::create("run-7", &root.join(".ace/journals")).unwrap();
        let clock = Clock::Fixed(1_000);

        let original = b"x = 1\n".to_vec();
        let before_sha = blobs.put(&original).unwrap();
        fs::write(root.join("app.py"), b"something else entirely\n").unwrap();
        journal.append(&intent("app.py", &before_sha, "expected-after", "plan-1")).unwrap();

        let report = recover_run(root, &journal, &blobs, &clock).unwrap();
        assert_eq!(report.unverified, vec!["app.py".to_owned()]);
        assert_eq!(
            fs::read(root.join("app.py")).unwrap(),
            b"something else entirely\n"
        );
    }

    #[test]
    fn pre_image_preview_truncates_at_4k() {
        let big = vec![b'a'; 10_000];
        let preview = pre_image_preview(&big);
        assert_eq!(preview.len(), PRE_IMAGE_PREVIEW_BYTES);
    }
}
