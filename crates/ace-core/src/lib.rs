//! Core types, errors, policy, fingerprints, and plug-in traits for the ace
//! code-health engine.
//!
//! This crate defines the shared data model (`Finding`, `Edit`, `EditPlan`,
//! `Receipt`), the unified error type (`AceError`), the policy layer, stable
//! identity fingerprints, the in-source suppression parser, baselines, and
//! the plug-in seams (`Detector`, `Codemod`, `LanguageParser`) consumed by
//! every other crate in the workspace.
//!
//! It has minimal external dependencies and is intended to be depended on by
//! every other crate in the workspace.

pub mod baseline;
pub mod canonical;
pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod policy;
pub mod suppressions;
pub mod tracing_setup;
pub mod traits;
pub mod types;

/// Engine version, part of the cache key: bumping it invalidates every
/// cached detector result.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rule id used for the severity-info finding emitted when a file fails to
/// parse.
pub const INTERNAL_PARSE_RULE: &str = "internal.parse";

pub use baseline::{Baseline, BaselineDiff, BaselineRecord, compare, enforce_gates};
pub use canonical::{canonical_json_bytes, canonical_json_line};
pub use clock::Clock;
pub use error::{AceError, AceResult};
pub use fingerprint::{
    ContentHasher, baseline_id, context_hash, ruleset_hash, sha256_hex, stable_id,
};
pub use policy::{Policy, PolicyView, RuleMode};
pub use suppressions::FileSuppressions;
pub use traits::{
    Codemod, Detector, DetectorManifest, EffectManifest, EmissionFidelity, LanguageParser,
    NodeKind, ParseDiagnostic, ParseTree, RuleMeta, SymbolCounts, SyntaxNode,
};
pub use types::{
    Decision, Edit, EditOp, EditPlan, Finding, GuardLayer, PlanKind, Receipt, apply_edits,
};
