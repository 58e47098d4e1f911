use std::path::PathBuf;

use crate::types::GuardLayer;

/// Unified error type covering all failure modes across the ace pipeline.
///
/// Every variant includes an actionable error message guiding the consumer
/// toward resolution. The apply loop catches per-plan errors and continues:
/// `GuardFailure` aborts one plan and records a revert, `Integrity` skips a
/// revert target with a warning, `BudgetExceeded` defers remaining plans.
/// Only `JournalUnrecoverable` aborts a whole run.
#[derive(Debug, thiserror::Error)]
pub enum AceError {
    // === Parsing ===
    /// A detector or codemod rejected its input; the file is skipped and a
    /// severity-info finding with rule `internal.parse` is emitted instead.
    #[error("Parse error in {file} at line {line}: {detail}")]
    Parse {
        /// File that failed to parse.
        file: String,
        /// 1-based line of the first diagnostic.
        line: usize,
        /// What the parser objected to.
        detail: String,
    },

    // === Guard ===
    /// The guard rejected an edit; the plan is aborted, a revert entry is
    /// journaled, and the learner records a revert.
    #[error("Guard rejected edit to {file} at layer {layer}: {evidence}")]
    GuardFailure {
        /// File the edit targeted.
        file: String,
        /// Which verification layer failed.
        layer: GuardLayer,
        /// Human-readable evidence collected by the failing layer.
        evidence: String,
    },

    // === I/O ===
    /// Wraps `std::io::Error` for read/write/fsync/rename operations.
    #[error("I/O error: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// `atomic_write` failed after the rename was attempted; the target may
    /// hold the new content without full directory durability.
    #[error("Durability failure for {path}: {detail}. The write may not survive a crash; re-run to rewrite.")]
    Durability {
        /// Target of the atomic write.
        path: PathBuf,
        /// Which step failed.
        detail: String,
    },

    /// The journal itself could not be fsynced mid-intent. No further edits
    /// are safe; the run must stop.
    #[error("Journal write failed for run {run_id}: {source}. The run is non-recoverable; inspect {journal_path} before retrying.")]
    JournalUnrecoverable {
        /// Run whose journal failed.
        run_id: String,
        /// Path to the journal file.
        journal_path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A journal line is missing required fields and cannot be trusted for
    /// revert or crash recovery.
    #[error("Journal line {line} of {journal_path} is malformed: {detail}. The run is non-recoverable from this journal.")]
    JournalMalformed {
        /// Path to the journal file.
        journal_path: PathBuf,
        /// 1-based line number of the offending entry.
        line: usize,
        /// What was wrong with it.
        detail: String,
    },

    // === Integrity ===
    /// A file's current content hash does not match what the journal
    /// recorded; the file is left unchanged.
    #[error("Integrity check failed for {file}: expected {expected}, found {actual}. File left unchanged; resolve manually before reverting.")]
    Integrity {
        /// File whose hash mismatched.
        file: String,
        /// Hash the journal recorded.
        expected: String,
        /// Hash computed from the current content.
        actual: String,
    },

    // === Policy ===
    /// A policy gate (finding count, regression, critical severity) fired at
    /// run end; surfaced to callers as exit code 2.
    #[error("Policy violation: {detail}")]
    PolicyViolation {
        /// Which gate fired and why.
        detail: String,
    },

    /// `policy.toml` failed validation at load time.
    #[error("Invalid policy: {field} = \"{value}\" — {reason}")]
    InvalidPolicy {
        /// Which policy field.
        field: String,
        /// The invalid value.
        value: String,
        /// Why it is invalid.
        reason: String,
    },

    // === Budget ===
    /// Per-run caps on edited files or lines were reached; remaining plans
    /// are deferred, not failed.
    #[error("Change budget exhausted: {detail}. Deferred plans will be retried on the next run.")]
    BudgetExceeded {
        /// Which cap was hit.
        detail: String,
    },

    // === Subsystems ===
    /// Wraps errors from pluggable subsystems (cache, repomap, telemetry).
    #[error("{subsystem} error: {source}")]
    Subsystem {
        /// Which subsystem produced the error.
        subsystem: &'static str,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl AceError {
    /// Build a [`AceError::Subsystem`] from any error value.
    pub fn subsystem<E>(subsystem: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Subsystem {
            subsystem,
            source: Box::new(source),
        }
    }

    /// Process exit code this error maps to: 2 for policy violations, 1 for
    /// everything else.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PolicyViolation { .. } => 2,
            _ => 1,
        }
    }
}

/// Convenience alias used throughout the ace crate hierarchy.
pub type AceResult<T> = Result<T, AceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AceError>();
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AceError = io_err.into();
        assert!(matches!(err, AceError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn guard_failure_names_layer() {
        let err = AceError::GuardFailure {
            file: "src/app.py".into(),
            layer: GuardLayer::AstHash,
            evidence: "canonical hash changed without a declared effect".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("src/app.py"));
        assert!(msg.contains("ast_hash"));
    }

    #[test]
    fn integrity_message_has_both_hashes() {
        let err = AceError::Integrity {
            file: "lib.py".into(),
            expected: "aa11".into(),
            actual: "bb22".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("aa11"));
        assert!(msg.contains("bb22"));
        assert!(msg.contains("left unchanged"));
    }

    #[test]
    fn exit_codes() {
        let violation = AceError::PolicyViolation {
            detail: "2 new findings under fail-on-new".into(),
        };
        assert_eq!(violation.exit_code(), 2);

        let io: AceError = std::io::Error::other("disk full").into();
        assert_eq!(io.exit_code(), 1);
    }

    #[test]
    fn subsystem_wraps_arbitrary_errors() {
        let inner = std::io::Error::other("shard poisoned");
        let err = AceError::subsystem("cache", inner);
        assert!(err.to_string().contains("cache"));
        assert!(err.to_string().contains("shard poisoned"));
    }

    #[test]
    fn journal_unrecoverable_mentions_path() {
        let err = AceError::JournalUnrecoverable {
            run_id: "run-20260801-0001".into(),
            journal_path: PathBuf::from(".ace/journals/run-20260801-0001.jsonl"),
            source: std::io::Error::other("fsync failed"),
        };
        let msg = err.to_string();
        assert!(msg.contains("run-20260801-0001"));
        assert!(msg.contains("non-recoverable"));
    }
}
