//! ace — autonomous code-health engine.
//!
//! Ingests a source tree, detects rule-based findings, synthesizes grouped
//! edit plans, and applies them under multi-layer verification with
//! crash-safe rollback and adaptive learning. This facade crate re-exports
//! the public surface of the workspace:
//!
//! - [`EngineContext`] / [`RunOptions`] / [`RunSummary`] — the pipeline.
//! - [`Finding`], [`EditPlan`], [`Receipt`] — the data model.
//! - [`Policy`] — `policy.toml` scoring weights, thresholds, and gates.
//! - The plug-in seams: [`Detector`], [`Codemod`], [`LanguageParser`].
//!
//! ```no_run
//! use ace::{EngineContext, RunOptions};
//!
//! let ctx = EngineContext::open(std::path::Path::new("."))?;
//! let summary = ctx.run(&RunOptions::default())?;
//! println!("applied {} plan(s), exit {}", summary.applied, summary.exit_code());
//! # Ok::<(), ace::AceError>(())
//! ```

pub use ace_core::{
    AceError, AceResult, Baseline, BaselineDiff, BaselineRecord, Clock, Codemod, ContentHasher,
    Decision, Detector, DetectorManifest, ENGINE_VERSION, Edit, EditOp, EditPlan, EffectManifest,
    EmissionFidelity, FileSuppressions, Finding, GuardLayer, INTERNAL_PARSE_RULE, LanguageParser,
    NodeKind, ParseDiagnostic, ParseTree, PlanKind, Policy, PolicyView, Receipt, RuleMeta,
    RuleMode, SymbolCounts, SyntaxNode, apply_edits, baseline_id, canonical_json_bytes,
    canonical_json_line, compare, context_hash, enforce_gates, ruleset_hash, sha256_hex,
    stable_id,
};
pub use ace_core::tracing_setup::{self, TARGET_PREFIX, level_from_env, parse_level};

pub use ace_durability::{
    BlobStore, Journal, JournalEntry, ReceiptStore, RecoveryReport, RevertReport, atomic_write,
    build_revert_plan, read_entries, recover_run, revert_run,
};

pub use ace_index::{
    CacheStats, ContentIndex, DetectorCache, RepoMap, SymbolKind, SymbolRecord, walk_source_files,
};

pub use ace_lang::PySourceParser;

pub use ace_engine::{
    Action, ActionSummary, ApplyContext, ApplyReport, BaselineCounts, DetectionReport,
    EngineContext, Guard, GuardMode, GuardOutcome, Learner, Outcome, PackRecipe, PlanOutcome,
    RecipeContext, RuleRegistry, RunOptions, RunSummary, Skiplist, SynthesisReport, Telemetry,
    apply_actions, builtin_recipes, plan_actions, rstar_pack, rstar_single, run_detection,
    salvage, synthesize_plans,
};

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a default `tracing` subscriber for consumers that do not bring
/// their own. Honors `RUST_LOG`; falls back to `ace=<level>`. Safe to call
/// more than once.
pub fn init_tracing(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{TARGET_PREFIX}={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
