//! The apply loop: journal discipline around every edit.
//!
//! For each AUTO action, in planner order: snapshot the original bytes into
//! the blob store, append a journal intent, verify with the guard, then
//! atomically write and append success — or append a revert entry and leave
//! the file untouched. A failing multi-edit plan goes through repair to
//! salvage the passing subset. Outcomes feed the learner, and per-run
//! budget caps defer whatever does not fit.
//!
//! Plans on the same file are serialized by construction: the loop applies
//! one plan at a time and every append goes through the single journal
//! writer.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use ace_core::clock::Clock;
use ace_core::error::{AceError, AceResult};
use ace_core::fingerprint::sha256_hex;
use ace_core::policy::Policy;
use ace_core::types::{Decision, EditPlan, GuardLayer, Receipt, apply_edits};

use ace_durability::journal::{
    IntentEntry, Journal, JournalEntry, RevertEntry, SuccessEntry, pre_image_preview,
};
use ace_durability::{BlobStore, ReceiptStore, atomic_write};

use crate::guard::Guard;
use crate::learn::{Learner, Outcome};
use crate::planner::Action;
use crate::repair::salvage;
use crate::rules::RuleRegistry;
use crate::skiplist::{REASON_AUTO, Skiplist};
use crate::telemetry::Telemetry;

/// Per-plan result of the apply loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Applied {
        receipt_id: String,
    },
    /// Repair salvaged a subset; the rest was isolated as failing.
    PartiallyApplied {
        receipt_id: String,
        applied_edits: usize,
        failed_edits: usize,
    },
    Reverted {
        layer: GuardLayer,
    },
    Skipped {
        reason: String,
    },
    Suggested,
    Deferred,
    /// I/O failure confined to this plan; the run continues.
    Failed {
        reason: String,
    },
}

/// Aggregated outcome of one apply pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// `(plan_id, outcome)` in application order.
    pub outcomes: Vec<(String, PlanOutcome)>,
    pub applied: usize,
    pub reverted: usize,
    pub skipped: usize,
    pub suggested: usize,
    pub deferred: usize,
    pub files_touched: BTreeSet<String>,
    pub lines_touched: usize,
}

impl ApplyReport {
    fn record(&mut self, plan_id: &str, outcome: PlanOutcome) {
        match &outcome {
            PlanOutcome::Applied { .. } | PlanOutcome::PartiallyApplied { .. } => {
                self.applied += 1;
            }
            PlanOutcome::Reverted { .. } => self.reverted += 1,
            PlanOutcome::Skipped { .. } | PlanOutcome::Failed { .. } => self.skipped += 1,
            PlanOutcome::Suggested => self.suggested += 1,
            PlanOutcome::Deferred => self.deferred += 1,
        }
        self.outcomes.push((plan_id.to_owned(), outcome));
    }
}

/// Everything the apply loop needs, threaded explicitly.
pub struct ApplyContext<'a> {
    pub root: &'a Path,
    pub journal: &'a Journal,
    pub blobs: &'a BlobStore,
    pub receipts: &'a ReceiptStore,
    pub guard: &'a Guard<'a>,
    pub registry: &'a RuleRegistry,
    pub learner: &'a mut Learner,
    pub skiplist: &'a mut Skiplist,
    /// Skiplist additions persist opportunistically to this path.
    pub skiplist_path: &'a Path,
    pub telemetry: Option<&'a Telemetry>,
    pub policy: &'a Policy,
    pub clock: &'a Clock,
}

/// Apply AUTO actions in order; record SUGGEST and SKIP decisions for the
/// learner. Only a journal-fsync failure aborts the whole pass.
pub fn apply_actions(ctx: &mut ApplyContext<'_>, actions: &[Action]) -> AceResult<ApplyReport> {
    let mut report = ApplyReport::default();

    for action in actions {
        let plan = &action.plan;
        match action.decision {
            Decision::Skip => {
                for rule in &plan.rule_ids {
                    ctx.learner.record_outcome(rule, Outcome::Skipped, None);
                }
                report.record(&plan.id, PlanOutcome::Skipped {
                    reason: "below suggest threshold".to_owned(),
                });
                continue;
            }
            Decision::Suggest => {
                for rule in &plan.rule_ids {
                    ctx.learner.record_outcome(rule, Outcome::Suggested, None);
                }
                report.record(&plan.id, PlanOutcome::Suggested);
                continue;
            }
            Decision::Auto => {}
        }

        let plan_files: BTreeSet<String> =
            plan.files().into_iter().map(str::to_owned).collect();
        let would_touch: BTreeSet<&String> =
            report.files_touched.union(&plan_files).collect();
        let exceeds_files = ctx
            .policy
            .max_files
            .is_some_and(|cap| would_touch.len() > cap);
        let exceeds_lines = ctx
            .policy
            .max_lines
            .is_some_and(|cap| report.lines_touched + plan.lines_touched() > cap);
        if exceeds_files || exceeds_lines {
            debug!(target: "ace.apply", plan_id = %plan.id, "change budget reached; deferring");
            report.record(&plan.id, PlanOutcome::Deferred);
            continue;
        }

        let outcome = apply_one_plan(ctx, plan)?;
        if matches!(
            outcome,
            PlanOutcome::Applied { .. } | PlanOutcome::PartiallyApplied { .. }
        ) {
            report.files_touched.extend(plan_files);
            report.lines_touched += plan.lines_touched();
        }
        report.record(&plan.id, outcome);
    }

    info!(
        target: "ace.apply",
        applied = report.applied,
        reverted = report.reverted,
        skipped = report.skipped,
        suggested = report.suggested,
        deferred = report.deferred,
        "apply pass complete"
    );
    Ok(report)
}

fn apply_one_plan(ctx: &mut ApplyContext<'_>, plan: &EditPlan) -> AceResult<PlanOutcome> {
    let files = plan.files();
    let Some(&file) = files.iter().next() else {
        return Ok(PlanOutcome::Skipped {
            reason: "plan has no edits".to_owned(),
        });
    };
    if files.len() > 1 {
        warn!(target: "ace.apply", plan_id = %plan.id, "multi-file plan; skipping");
        return Ok(PlanOutcome::Skipped {
            reason: "multi-file plans are not applied atomically".to_owned(),
        });
    }
    let file = file.to_owned();
    let abs = ctx.root.join(&file);

    let before = match fs::read(&abs) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(target: "ace.apply", file = %file, error = %err, "read failed; plan abandoned");
            return Ok(PlanOutcome::Failed {
                reason: format!("read error: {err}"),
            });
        }
    };
    let before_sha = sha256_hex(&before);
    let Ok(before_text) = std::str::from_utf8(&before) else {
        return Ok(PlanOutcome::Skipped {
            reason: "file is not valid UTF-8".to_owned(),
        });
    };

    // full pre-image persisted before any journal entry references it
    ctx.blobs.put(&before)?;

    let after_text = apply_edits(before_text, &plan.edits)?;
    let after_bytes = after_text.as_bytes();
    let expected_after_sha = sha256_hex(after_bytes);

    let mut rule_ids = plan.rule_ids.clone();
    rule_ids.sort();
    ctx.journal.append(&JournalEntry::Intent(IntentEntry {
        timestamp: ctx.clock.iso8601(),
        file: file.clone(),
        before_sha: before_sha.clone(),
        before_size: before.len() as u64,
        rule_ids,
        plan_id: plan.id.clone(),
        pre_image: pre_image_preview(&before),
        after_sha: expected_after_sha.clone(),
    }))?;

    let effects = ctx.registry.effects_for(&plan.rule_ids);
    let started = Instant::now();
    let verdict = ctx.guard.verify(&before, after_bytes, &effects);
    for warning in &verdict.warnings {
        warn!(target: "ace.guard", plan_id = %plan.id, file = %file, warning = %warning, "guard warning");
    }

    if verdict.skip {
        ctx.journal.append(&JournalEntry::Revert(RevertEntry {
            timestamp: ctx.clock.iso8601(),
            file: file.clone(),
            from_sha: before_sha.clone(),
            to_sha: before_sha,
            reason: GuardLayer::Parse.name().to_owned(),
        }))?;
        for rule in &plan.rule_ids {
            ctx.learner.record_outcome(rule, Outcome::Skipped, Some(&file));
        }
        return Ok(PlanOutcome::Skipped {
            reason: "original file does not parse".to_owned(),
        });
    }

    if !verdict.passed {
        let layer = verdict.failed_layer.unwrap_or(GuardLayer::Parse);

        if plan.edits.len() > 1 {
            let repair = salvage(before_text, &plan.edits, ctx.guard, &effects)?;
            if !repair.applied.is_empty() {
                atomic_write(&abs, repair.final_text.as_bytes())?;
                let after_sha = sha256_hex(repair.final_text.as_bytes());
                ctx.journal.append(&JournalEntry::Success(SuccessEntry {
                    timestamp: ctx.clock.iso8601(),
                    file: file.clone(),
                    after_sha: after_sha.clone(),
                    after_size: repair.final_text.len() as u64,
                    receipt_id: plan.id.clone(),
                }))?;
                write_receipt(ctx, plan, &file, &before_sha, &after_sha, started, true)?;
                record_repair_outcomes(ctx, plan, &repair.applied, &repair.failed, &before_sha, &file);
                if let Some(telemetry) = ctx.telemetry {
                    for rule in &plan.rule_ids {
                        telemetry.record(
                            rule,
                            started.elapsed().as_secs_f64() * 1000.0,
                            1,
                            true,
                            false,
                            ctx.clock,
                        );
                    }
                }
                return Ok(PlanOutcome::PartiallyApplied {
                    receipt_id: plan.id.clone(),
                    applied_edits: repair.applied.len(),
                    failed_edits: repair.failed.len(),
                });
            }
        }

        ctx.journal.append(&JournalEntry::Revert(RevertEntry {
            timestamp: ctx.clock.iso8601(),
            file: file.clone(),
            from_sha: before_sha.clone(),
            to_sha: before_sha.clone(),
            reason: layer.name().to_owned(),
        }))?;
        record_reverts(ctx, &plan.rule_ids, &before_sha, &file);
        if let Some(telemetry) = ctx.telemetry {
            for rule in &plan.rule_ids {
                telemetry.record(
                    rule,
                    started.elapsed().as_secs_f64() * 1000.0,
                    1,
                    false,
                    true,
                    ctx.clock,
                );
            }
        }
        debug!(target: "ace.apply", plan_id = %plan.id, layer = %layer, "guard rejected plan");
        return Ok(PlanOutcome::Reverted { layer });
    }

    match atomic_write(&abs, after_bytes) {
        Ok(()) => {}
        Err(err @ AceError::Durability { .. }) => {
            // the rename may have landed without directory durability; leave
            // the intent open so the next run's recovery pass verifies it
            warn!(target: "ace.apply", plan_id = %plan.id, error = %err, "durability failure; intent left for recovery");
            return Ok(PlanOutcome::Failed {
                reason: err.to_string(),
            });
        }
        Err(err) => {
            warn!(target: "ace.apply", plan_id = %plan.id, error = %err, "write failed; plan abandoned");
            ctx.journal.append(&JournalEntry::Revert(RevertEntry {
                timestamp: ctx.clock.iso8601(),
                file: file.clone(),
                from_sha: before_sha.clone(),
                to_sha: before_sha,
                reason: "io_error".to_owned(),
            }))?;
            return Ok(PlanOutcome::Failed {
                reason: err.to_string(),
            });
        }
    }

    ctx.journal.append(&JournalEntry::Success(SuccessEntry {
        timestamp: ctx.clock.iso8601(),
        file: file.clone(),
        after_sha: expected_after_sha.clone(),
        after_size: after_bytes.len() as u64,
        receipt_id: plan.id.clone(),
    }))?;
    write_receipt(ctx, plan, &file, &before_sha, &expected_after_sha, started, true)?;

    for rule in &plan.rule_ids {
        ctx.learner.record_outcome(rule, Outcome::Applied, Some(&file));
    }
    if let Some(telemetry) = ctx.telemetry {
        for rule in &plan.rule_ids {
            telemetry.record(
                rule,
                started.elapsed().as_secs_f64() * 1000.0,
                1,
                true,
                false,
                ctx.clock,
            );
        }
    }

    info!(target: "ace.apply", plan_id = %plan.id, file = %file, "plan applied");
    Ok(PlanOutcome::Applied {
        receipt_id: plan.id.clone(),
    })
}

fn write_receipt(
    ctx: &ApplyContext<'_>,
    plan: &EditPlan,
    file: &str,
    before_sha: &str,
    after_sha: &str,
    started: Instant,
    invariants_met: bool,
) -> AceResult<()> {
    let receipt = Receipt {
        plan_id: plan.id.clone(),
        file: file.to_owned(),
        before_sha: before_sha.to_owned(),
        after_sha: after_sha.to_owned(),
        parse_valid: true,
        invariants_met,
        estimated_risk: plan.estimated_risk,
        duration_ms: started.elapsed().as_millis() as u64,
        policy_hash: ctx.policy.policy_hash.clone(),
        timestamp: ctx.clock.iso8601(),
    };
    ctx.receipts.write(&receipt)?;
    Ok(())
}

/// Rules whose edits survived salvage count as applied; rules whose edits
/// were isolated count as reverted (and may trip the auto-skiplist).
fn record_repair_outcomes(
    ctx: &mut ApplyContext<'_>,
    plan: &EditPlan,
    applied: &[ace_core::types::Edit],
    failed: &[ace_core::types::Edit],
    before_sha: &str,
    file: &str,
) {
    let rules_for = |edits: &[ace_core::types::Edit]| -> BTreeSet<String> {
        let mut rules = BTreeSet::new();
        for edit in edits {
            for finding in &plan.findings {
                if edit.start_line <= finding.end_line && finding.start_line <= edit.end_line {
                    rules.insert(finding.rule_id.clone());
                }
            }
        }
        rules
    };
    for rule in rules_for(applied) {
        ctx.learner.record_outcome(&rule, Outcome::Applied, Some(file));
    }
    let failed_rules = rules_for(failed);
    record_reverts(
        ctx,
        &failed_rules.into_iter().collect::<Vec<_>>(),
        before_sha,
        file,
    );
}

fn record_reverts(ctx: &mut ApplyContext<'_>, rule_ids: &[String], before_sha: &str, file: &str) {
    for rule in rule_ids {
        if let Some(candidate) = ctx.learner.record_outcome(rule, Outcome::Reverted, Some(file)) {
            ctx.skiplist.add(
                &candidate.rule_id,
                &candidate.file,
                before_sha,
                REASON_AUTO,
                ctx.clock,
            );
            if let Err(err) = ctx.skiplist.save(ctx.skiplist_path) {
                warn!(target: "ace.skiplist", error = %err, "opportunistic skiplist save failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_core::types::{Edit, EditOp, Finding, PlanKind};
    use ace_durability::journal::read_entries;
    use ace_lang::PySourceParser;

    use crate::guard::GuardMode;
    use crate::planner::Action;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
        journal: Journal,
        blobs: BlobStore,
        receipts: ReceiptStore,
        registry: RuleRegistry,
        learner: Learner,
        skiplist: Skiplist,
        skiplist_path: std::path::PathBuf,
        policy: Policy,
        clock: Clock,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            let journal = Journal::create("run-test", &root.join(".ace/journals")).unwrap();
            Self {
                root: root.clone(),
                journal,
                blobs: BlobStore::new(root.join(".ace/blobs")),
                receipts: ReceiptStore::new(root.join(".ace/receipts")),
                registry: RuleRegistry::builtin(),
                learner: Learner::new(Clock::Fixed(1_000)),
                skiplist: Skiplist::default(),
                skiplist_path: root.join(".ace/skiplist.json"),
                policy: Policy::default(),
                clock: Clock::Fixed(1_000),
                _dir: dir,
            }
        }

        fn run(&mut self, actions: &[Action]) -> ApplyReport {
            let guard = Guard::new(&PySourceParser, GuardMode::Strict);
            let mut ctx = ApplyContext {
                root: &self.root,
                journal: &self.journal,
                blobs: &self.blobs,
                receipts: &self.receipts,
                guard: &guard,
                registry: &self.registry,
                learner: &mut self.learner,
                skiplist: &mut self.skiplist,
                skiplist_path: &self.skiplist_path,
                telemetry: None,
                policy: &self.policy,
                clock: &self.clock,
            };
            apply_actions(&mut ctx, actions).unwrap()
        }
    }

    fn timeout_plan(file: &str, line: usize) -> EditPlan {
        let finding = Finding::new(
            "net.request-timeout",
            file,
            line,
            line,
            0.8,
            0.2,
            "HTTP request without timeout",
            "requests.get(url)",
        );
        let edit = Edit::new(
            file,
            line,
            line,
            EditOp::Replace,
            "resp = requests.get(url, timeout=30)",
        );
        let mut plan = EditPlan::singleton(finding, vec![edit]).unwrap();
        plan.estimated_risk = 0.62;
        plan
    }

    fn auto(plan: EditPlan) -> Action {
        Action {
            plan,
            decision: Decision::Auto,
            priority: 62.0,
            rationale: "test".into(),
        }
    }

    #[test]
    fn auto_plan_applies_with_journal_and_receipt() {
        let mut fx = Fixture::new();
        fs::write(fx.root.join("app.py"), "a = 1\nb = 2\nresp = requests.get(url)\n").unwrap();

        let plan = timeout_plan("app.py", 3);
        let plan_id = plan.id.clone();
        let report = fx.run(&[auto(plan)]);

        assert_eq!(report.applied, 1);
        assert_eq!(
            fs::read_to_string(fx.root.join("app.py")).unwrap(),
            "a = 1\nb = 2\nresp = requests.get(url, timeout=30)\n"
        );
        let entries = read_entries(fx.journal.path()).unwrap();
        assert!(matches!(entries[0], JournalEntry::Intent(_)));
        assert!(matches!(entries[1], JournalEntry::Success(_)));
        assert!(fx.receipts.read(&plan_id).unwrap().is_some());
        assert!(fx.learner.stats("net.request-timeout").unwrap().applied >= 1.0);
    }

    #[test]
    fn guard_failure_leaves_file_untouched() {
        let mut fx = Fixture::new();
        let original = "x = 1\n";
        fs::write(fx.root.join("app.py"), original).unwrap();

        // undeclared literal change: trips the AST hash layer
        let finding = Finding::new("style.trailing-whitespace", "app.py", 1, 1, 0.2, 0.05, "m", "x = 1");
        let edit = Edit::new("app.py", 1, 1, EditOp::Replace, "x = 2");
        let mut plan = EditPlan::singleton(finding, vec![edit]).unwrap();
        plan.estimated_risk = 0.9;

        let report = fx.run(&[auto(plan)]);
        assert_eq!(report.reverted, 1);
        assert_eq!(fs::read_to_string(fx.root.join("app.py")).unwrap(), original);

        let entries = read_entries(fx.journal.path()).unwrap();
        assert!(matches!(entries[0], JournalEntry::Intent(_)));
        match &entries[1] {
            JournalEntry::Revert(revert) => {
                assert_eq!(revert.reason, "structural_equivalence");
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn suggest_and_skip_do_not_touch_disk() {
        let mut fx = Fixture::new();
        fs::write(fx.root.join("app.py"), "resp = requests.get(url)\n").unwrap();

        let mut suggest = auto(timeout_plan("app.py", 1));
        suggest.decision = Decision::Suggest;
        let mut skip = auto(timeout_plan("app.py", 1));
        skip.decision = Decision::Skip;

        let report = fx.run(&[suggest, skip]);
        assert_eq!(report.applied, 0);
        assert_eq!(report.suggested, 1);
        assert_eq!(report.skipped, 1);
        assert!(read_entries(fx.journal.path()).unwrap().is_empty());
    }

    #[test]
    fn budget_defers_overflow_plans() {
        let mut fx = Fixture::new();
        fs::write(fx.root.join("a.py"), "resp = requests.get(url)\n").unwrap();
        fs::write(fx.root.join("b.py"), "resp = requests.get(url)\n").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let policy_path = dir.path().join("policy.toml");
        fs::write(&policy_path, "[limits]\nmax_files = 1\n").unwrap();
        fx.policy = Policy::load(&policy_path).unwrap();

        let report = fx.run(&[auto(timeout_plan("a.py", 1)), auto(timeout_plan("b.py", 1))]);
        assert_eq!(report.applied, 1);
        assert_eq!(report.deferred, 1);
        // the deferred file is untouched
        assert_eq!(
            fs::read_to_string(fx.root.join("b.py")).unwrap(),
            "resp = requests.get(url)\n"
        );
    }

    #[test]
    fn third_consecutive_revert_populates_skiplist() {
        let mut fx = Fixture::new();
        let original = "x = 1\n";

        for _ in 0..3 {
            fs::write(fx.root.join("app.py"), original).unwrap();
            let finding =
                Finding::new("style.trailing-whitespace", "app.py", 1, 1, 0.2, 0.05, "m", "x = 1");
            let edit = Edit::new("app.py", 1, 1, EditOp::Replace, "x = 2");
            let mut plan = EditPlan::singleton(finding, vec![edit]).unwrap();
            plan.estimated_risk = 0.9;
            fx.run(&[auto(plan)]);
        }

        let before_sha = sha256_hex(original.as_bytes());
        assert!(fx
            .skiplist
            .should_skip("style.trailing-whitespace", "app.py", &before_sha));
        // opportunistic save hit disk
        assert!(fx.skiplist_path.exists());
    }

    #[test]
    fn multi_edit_guard_failure_salvages_subset() {
        let mut fx = Fixture::new();
        fs::write(fx.root.join("app.py"), "a = 1  \nb = 2\n").unwrap();

        // one good whitespace fix plus one undeclared semantic change
        let good = Finding::new("style.trailing-whitespace", "app.py", 1, 1, 0.2, 0.05, "m", "a = 1");
        let plan = EditPlan {
            id: "plan-mixed".into(),
            findings: vec![good],
            edits: vec![
                Edit::new("app.py", 1, 1, EditOp::Replace, "a = 1"),
                Edit::new("app.py", 2, 2, EditOp::Replace, "b = 3"),
            ],
            rule_ids: vec!["style.trailing-whitespace".into()],
            estimated_risk: 0.8,
            kind: PlanKind::Singleton,
            cohesion: None,
        };

        let report = fx.run(&[auto(plan)]);
        assert!(matches!(
            report.outcomes[0].1,
            PlanOutcome::PartiallyApplied {
                applied_edits: 1,
                failed_edits: 1,
                ..
            }
        ));
        assert_eq!(
            fs::read_to_string(fx.root.join("app.py")).unwrap(),
            "a = 1\nb = 2\n"
        );
    }
}
