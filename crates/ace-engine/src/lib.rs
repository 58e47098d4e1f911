//! Engine crate for ace: the detection kernel, guard, pack synthesis,
//! planner, learner, skiplist, telemetry, repair, apply loop, built-in
//! rules, and the top-level run pipeline.
//!
//! The public entry point is [`EngineContext`]: open a project, call
//! [`EngineContext::run`] with [`RunOptions`], and read the
//! [`RunSummary`]. Revert and crash recovery are methods on the same
//! context.

pub mod apply;
pub mod context;
pub mod guard;
pub mod kernel;
pub mod learn;
pub mod packs;
pub mod planner;
pub mod repair;
pub mod rules;
pub mod run;
pub mod skiplist;
pub mod telemetry;

pub use apply::{ApplyContext, ApplyReport, PlanOutcome, apply_actions};
pub use context::{AcePaths, DEFAULT_CACHE_TTL_SECONDS, EngineContext};
pub use guard::{Guard, GuardMode, GuardOutcome};
pub use kernel::{DetectionReport, run_detection};
pub use learn::{Learner, Outcome, RuleStats, SkipCandidate};
pub use packs::{PackRecipe, RecipeContext, SynthesisReport, synthesize_plans};
pub use planner::{Action, plan_actions, rstar_pack, rstar_single};
pub use repair::{RepairOutcome, salvage};
pub use rules::{RuleRegistry, builtin_recipes};
pub use run::{ActionSummary, BaselineCounts, RunOptions, RunSummary};
pub use skiplist::{SkipEntry, Skiplist};
pub use telemetry::{Telemetry, TelemetryRecord, TelemetryStats, aggregate, cost_ranks};
