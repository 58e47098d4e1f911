//! The top-level run pipeline and the run-level revert.
//!
//! One run: recover any crashed predecessor, walk the tree, rebuild the
//! symbol map and content index, detect (cached, parallel), filter through
//! the skiplist, diff against the baseline, synthesize plans, order them,
//! apply under full journal discipline, persist every store, and evaluate
//! the policy gates into the summary's exit code.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tracing::{info, info_span, warn};

use ace_core::baseline::{Baseline, compare};
use ace_core::error::{AceError, AceResult};
use ace_core::tracing_setup::span_names;
use ace_core::types::{Decision, Finding};
use ace_core::canonical::canonical_json_bytes;

use ace_durability::atomic::{read_json_store, write_json_store};
use ace_durability::journal::{Journal, build_revert_plan, read_entries, recover_run, revert_run};
use ace_durability::{BlobStore, ReceiptStore, RecoveryReport, RevertReport};

use ace_index::cache::CacheStats;
use ace_index::{ContentIndex, RepoMap, walk_source_files};

use crate::apply::{ApplyContext, ApplyReport, apply_actions};
use crate::context::EngineContext;
use crate::guard::{Guard, GuardMode};
use crate::kernel::run_detection;
use crate::learn::Outcome;
use crate::packs::synthesize_plans;
use crate::planner::plan_actions;
use crate::rules::builtin_recipes;
use crate::skiplist::REASON_AUTO;
use crate::telemetry::{aggregate, cost_ranks};

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker threads for detection.
    pub jobs: usize,
    /// Apply AUTO plans; false = detect and plan only.
    pub apply: bool,
    pub guard_mode: GuardMode,
    pub use_cache: bool,
    /// Fail (exit 2) when findings appear that are not in the baseline.
    pub fail_on_new: bool,
    /// Fail (exit 2) when a baselined finding's severity increased.
    pub fail_on_regression: bool,
    /// Capture the post-run finding set as the new baseline.
    pub update_baseline: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            apply: true,
            guard_mode: GuardMode::Strict,
            use_cache: true,
            fail_on_new: false,
            fail_on_regression: false,
            update_baseline: false,
        }
    }
}

/// One planned action, summarized for the run report.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSummary {
    pub plan_id: String,
    pub decision: Decision,
    pub priority: f64,
    pub rationale: String,
}

/// Counts from the baseline diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaselineCounts {
    pub new: usize,
    pub fixed: usize,
    pub existing: usize,
}

/// Structured result of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: String,
    pub files_analyzed: usize,
    /// Post-filter findings, sorted, with dense run ids.
    pub findings: Vec<Finding>,
    pub partial: bool,
    pub skiplist_filtered: usize,
    pub baseline: Option<BaselineCounts>,
    pub actions: Vec<ActionSummary>,
    pub applied: usize,
    pub reverted: usize,
    pub skipped: usize,
    pub suggested: usize,
    pub deferred: usize,
    pub cache: CacheStats,
    pub journal_path: Option<PathBuf>,
    pub receipts_dir: PathBuf,
    /// Files dropped from the run with their reasons.
    pub dropped: Vec<(String, String)>,
    /// Gate failures; non-empty means exit code 2.
    pub policy_violations: Vec<String>,
}

impl RunSummary {
    /// 0 success, 2 policy violation. Operational errors surface as `Err`
    /// from `run` instead.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.policy_violations.is_empty() { 0 } else { 2 }
    }

    /// Canonical serialization of the finding set, the determinism surface
    /// compared byte-for-byte across job counts and cache modes.
    pub fn serialized_findings(&self) -> AceResult<Vec<u8>> {
        canonical_json_bytes(&self.findings, true)
    }
}

impl EngineContext {
    /// Execute one full run.
    pub fn run(&self, options: &RunOptions) -> AceResult<RunSummary> {
        let run_id = format!(
            "run-{:010}-{:04}",
            self.clock.epoch_seconds(),
            RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let span = info_span!(target: "ace", "run", name = span_names::RUN, run_id = %run_id);
        let _entered = span.enter();

        // a crashed predecessor is resolved before anything else moves
        let recovery = self.recover_latest()?;
        if !recovery.restored.is_empty() {
            info!(target: "ace.run", restored = recovery.restored.len(), "crash recovery rolled back orphaned writes");
        }

        let files = walk_source_files(&self.root, &self.policy, self.parser.as_ref())?;

        let repomap = RepoMap::build(&self.root, &files, self.parser.as_ref())?;
        repomap.save(&self.paths.symbols())?;

        let mut index = ContentIndex::load(&self.paths.index())?;
        index.rebuild(&self.root, &files);
        index.save(&self.paths.index())?;

        if options.use_cache {
            self.cache.load(&self.paths.cache_db())?;
        }

        let detection = run_detection(
            &self.root,
            &files,
            &self.registry,
            self.parser.as_ref(),
            &self.policy,
            options.use_cache.then_some(&self.cache),
            Some(&self.telemetry),
            &self.clock,
            &self.cancel,
            options.jobs,
        )?;

        let mut skiplist = self
            .skiplist
            .lock()
            .map_err(|_| AceError::subsystem("skiplist", std::io::Error::other("lock poisoned")))?;
        skiplist.prune_stale(&detection.file_hashes);
        let (findings, skiplist_filtered) =
            skiplist.filter_findings(detection.findings, &detection.file_hashes);

        let stored_baseline: Option<Baseline> = read_json_store(&self.paths.baseline())?;
        let mut baseline_counts = None;
        let mut violations = Vec::new();
        if let Some(baseline) = &stored_baseline {
            let diff = compare(&findings, baseline);
            baseline_counts = Some(BaselineCounts {
                new: diff.new.len(),
                fixed: diff.fixed.len(),
                existing: diff.existing.len(),
            });
            if options.fail_on_new && !diff.new.is_empty() {
                violations.push(format!(
                    "{} new finding(s) under --fail-on-new",
                    diff.new.len()
                ));
            }
            if options.fail_on_regression {
                let regressions = diff.regressions();
                if !regressions.is_empty() {
                    violations.push(format!(
                        "{} finding(s) regressed in severity under --fail-on-regression",
                        regressions.len()
                    ));
                }
            }
        }

        // sources for codemod planning: only files that carry findings
        let mut sources: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for finding in &findings {
            if !sources.contains_key(&finding.file) {
                if let Ok(bytes) = fs::read(self.root.join(&finding.file)) {
                    sources.insert(finding.file.clone(), bytes);
                }
            }
        }

        let synthesis = synthesize_plans(
            &findings,
            &sources,
            &self.registry,
            builtin_recipes(),
            &self.policy,
            &repomap,
        )?;

        let stats = aggregate(&self.telemetry.all_records());
        let rule_ids = self.registry.rule_ids();
        let ranks = cost_ranks(&rule_ids, &stats);

        let mut learner = self
            .learner
            .lock()
            .map_err(|_| AceError::subsystem("learner", std::io::Error::other("lock poisoned")))?;
        let actions = plan_actions(
            synthesis.plans,
            &self.policy,
            &mut learner,
            &ranks,
            &repomap,
            &self.clock,
        );
        let learner = &mut *learner;
        let skiplist = &mut *skiplist;

        let mut summary = RunSummary {
            run_id: run_id.clone(),
            files_analyzed: detection.files_analyzed,
            partial: detection.partial,
            skiplist_filtered,
            baseline: baseline_counts,
            actions: actions
                .iter()
                .map(|action| ActionSummary {
                    plan_id: action.plan.id.clone(),
                    decision: action.decision,
                    priority: action.priority,
                    rationale: action.rationale.clone(),
                })
                .collect(),
            receipts_dir: self.paths.receipts_dir(),
            dropped: detection.dropped.clone(),
            policy_violations: violations,
            findings,
            ..RunSummary::default()
        };

        if options.apply && !actions.is_empty() {
            let journal = Journal::create(&run_id, &self.paths.journals_dir())?;
            let blobs = BlobStore::new(self.paths.blobs_dir());
            let receipts = ReceiptStore::new(self.paths.receipts_dir());
            let guard = Guard::new(self.parser.as_ref(), options.guard_mode);
            let skiplist_path = self.paths.skiplist();
            let mut apply_ctx = ApplyContext {
                root: &self.root,
                journal: &journal,
                blobs: &blobs,
                receipts: &receipts,
                guard: &guard,
                registry: &self.registry,
                learner: &mut *learner,
                skiplist: &mut *skiplist,
                skiplist_path: &skiplist_path,
                telemetry: Some(&self.telemetry),
                policy: &self.policy,
                clock: &self.clock,
            };
            let report: ApplyReport = apply_actions(&mut apply_ctx, &actions)?;
            summary.applied = report.applied;
            summary.reverted = report.reverted;
            summary.skipped = report.skipped;
            summary.suggested = report.suggested;
            summary.deferred = report.deferred;
            summary.journal_path = Some(journal.path().to_path_buf());
        }

        if options.update_baseline {
            let baseline = Baseline::capture(&summary.findings);
            write_json_store(&self.paths.baseline(), &baseline)?;
        }

        learner.save(&self.paths.learn())?;
        skiplist.save(&self.paths.skiplist())?;
        if options.use_cache {
            self.cache.save(&self.paths.cache_db())?;
        }
        summary.cache = self.cache.stats();

        // finding-count gates from policy limits
        let total = summary.findings.len();
        if self.policy.fail_at > 0 && total >= self.policy.fail_at {
            summary.policy_violations.push(format!(
                "finding count {total} reached fail_at threshold {}",
                self.policy.fail_at
            ));
        } else if self.policy.warn_at > 0 && total >= self.policy.warn_at {
            warn!(target: "ace.run", total, warn_at = self.policy.warn_at, "finding count over warn threshold");
        }

        info!(
            target: "ace.run",
            run_id = %run_id,
            finding_count = summary.findings.len(),
            applied = summary.applied,
            reverted = summary.reverted,
            exit = summary.exit_code(),
            "run complete"
        );
        Ok(summary)
    }

    /// Revert an applied run by journal id (or the most recent run when
    /// `run_id` is `None`). Learner and skiplist record the reverts.
    pub fn revert(&self, run_id: Option<&str>) -> AceResult<RevertReport> {
        let Some(journal_path) = self.resolve_journal(run_id)? else {
            return Ok(RevertReport::default());
        };
        let journal = Journal::open(&journal_path)?;
        let blobs = BlobStore::new(self.paths.blobs_dir());

        // capture contexts before the revert appends to the same journal
        let contexts = build_revert_plan(&read_entries(&journal_path)?);
        let report = revert_run(&self.root, &journal, &blobs, &self.clock)?;

        let mut learner = self
            .learner
            .lock()
            .map_err(|_| AceError::subsystem("learner", std::io::Error::other("lock poisoned")))?;
        let mut skiplist = self
            .skiplist
            .lock()
            .map_err(|_| AceError::subsystem("skiplist", std::io::Error::other("lock poisoned")))?;
        for context in &contexts {
            if !report.reverted.contains(&context.file) {
                continue;
            }
            for rule in &context.rule_ids {
                if let Some(candidate) =
                    learner.record_outcome(rule, Outcome::Reverted, Some(&context.file))
                {
                    skiplist.add(
                        &candidate.rule_id,
                        &candidate.file,
                        &context.original_sha,
                        REASON_AUTO,
                        &self.clock,
                    );
                }
            }
        }
        learner.save(&self.paths.learn())?;
        skiplist.save(&self.paths.skiplist())?;
        Ok(report)
    }

    /// Crash-recovery pass over the most recent journal.
    pub fn recover_latest(&self) -> AceResult<RecoveryReport> {
        let Some(journal_path) = self.resolve_journal(None)? else {
            return Ok(RecoveryReport::default());
        };
        let journal = Journal::open(&journal_path)?;
        let blobs = BlobStore::new(self.paths.blobs_dir());
        recover_run(&self.root, &journal, &blobs, &self.clock)
    }

    fn resolve_journal(&self, run_id: Option<&str>) -> AceResult<Option<PathBuf>> {
        let dir = self.paths.journals_dir();
        if let Some(run_id) = run_id {
            let path = dir.join(format!("{run_id}.jsonl"));
            return Ok(path.exists().then_some(path));
        }
        if !dir.exists() {
            return Ok(None);
        }
        let mut journals: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        journals.sort();
        Ok(journals.pop())
    }
}
