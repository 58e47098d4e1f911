//! Declarative policy: scoring weights, thresholds, rule modes, path
//! suppressions, pack preferences, and quality gates.
//!
//! Loaded from `policy.toml` (all sections optional; defaults apply), then
//! validated. The raw file bytes are hashed to `policy_hash`, which is
//! stamped on every receipt so an audit can tie an applied plan back to the
//! exact policy that allowed it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;

use crate::error::{AceError, AceResult};
use crate::fingerprint::sha256_hex;

pub const DEFAULT_ALPHA: f64 = 0.7;
pub const DEFAULT_BETA: f64 = 0.3;
pub const DEFAULT_GAMMA: f64 = 0.2;
pub const DEFAULT_AUTO_THRESHOLD: f64 = 0.70;
pub const DEFAULT_SUGGEST_THRESHOLD: f64 = 0.50;

/// How the planner may treat a rule's plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// Plans may reach the AUTO decision.
    AutoFix,
    /// Plans are capped at SUGGEST regardless of score.
    DetectOnly,
}

/// Fully resolved policy configuration.
#[derive(Debug, Clone)]
pub struct Policy {
    pub version: String,
    pub description: String,

    // [scoring]
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub auto_threshold: f64,
    pub suggest_threshold: f64,

    // [limits]
    pub warn_at: usize,
    pub fail_at: usize,
    pub fail_on_critical: bool,
    /// Per-run cap on distinct edited files; `None` = unlimited.
    pub max_files: Option<usize>,
    /// Per-run cap on edited lines; `None` = unlimited.
    pub max_lines: Option<usize>,

    // [modes]
    pub modes: BTreeMap<String, RuleMode>,

    // [risk_classes]
    pub risk_classes: BTreeMap<String, Vec<String>>,

    // [suppressions]
    pub suppression_paths: Vec<String>,
    pub suppression_rules: BTreeMap<String, Vec<String>>,

    // [packs]
    pub packs_enabled: bool,
    pub packs_min_findings: usize,
    pub prefer_packs: bool,

    /// 16 hex chars over the raw policy file bytes (or over the empty string
    /// when running on defaults).
    pub policy_hash: String,

    global_globs: GlobSet,
    rule_globs: BTreeMap<String, GlobSet>,
}

impl Default for Policy {
    fn default() -> Self {
        Self::from_raw(RawPolicy::default(), b"").expect("default policy must validate")
    }
}

impl Policy {
    /// Load from a `policy.toml` path. A missing file yields the defaults;
    /// an unreadable or invalid file is an error.
    pub fn load(path: &Path) -> AceResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        let raw: RawPolicy = toml::from_str(&text).map_err(|err| AceError::InvalidPolicy {
            field: "policy.toml".into(),
            value: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_raw(raw, &bytes)
    }

    fn from_raw(raw: RawPolicy, raw_bytes: &[u8]) -> AceResult<Self> {
        let meta = raw.meta.unwrap_or_default();
        let scoring = raw.scoring.unwrap_or_default();
        let limits = raw.limits.unwrap_or_default();
        let suppressions = raw.suppressions.unwrap_or_default();
        let packs = raw.packs.unwrap_or_default();

        let mut modes = BTreeMap::new();
        for (rule_id, mode) in raw.modes.unwrap_or_default() {
            let parsed = match mode.as_str() {
                "auto-fix" => RuleMode::AutoFix,
                "detect-only" => RuleMode::DetectOnly,
                other => {
                    return Err(AceError::InvalidPolicy {
                        field: format!("modes.{rule_id}"),
                        value: other.to_owned(),
                        reason: "must be \"auto-fix\" or \"detect-only\"".into(),
                    });
                }
            };
            modes.insert(rule_id, parsed);
        }

        let suppression_paths = suppressions.paths.unwrap_or_default();
        let suppression_rules = suppressions.rules.unwrap_or_default();
        let global_globs = compile_globs(&suppression_paths, "suppressions.paths")?;
        let mut rule_globs = BTreeMap::new();
        for (rule_id, patterns) in &suppression_rules {
            rule_globs.insert(
                rule_id.clone(),
                compile_globs(patterns, &format!("suppressions.rules.{rule_id}"))?,
            );
        }

        let policy = Self {
            version: meta.version.unwrap_or_else(|| "0.7.0".to_owned()),
            description: meta
                .description
                .unwrap_or_else(|| "ace policy configuration".to_owned()),
            alpha: scoring.alpha.unwrap_or(DEFAULT_ALPHA),
            beta: scoring.beta.unwrap_or(DEFAULT_BETA),
            gamma: scoring.gamma.unwrap_or(DEFAULT_GAMMA),
            auto_threshold: scoring.auto_threshold.unwrap_or(DEFAULT_AUTO_THRESHOLD),
            suggest_threshold: scoring
                .suggest_threshold
                .unwrap_or(DEFAULT_SUGGEST_THRESHOLD),
            warn_at: limits.warn_at.unwrap_or(50),
            fail_at: limits.fail_at.unwrap_or(100),
            fail_on_critical: limits.fail_on_critical.unwrap_or(true),
            max_files: limits.max_files,
            max_lines: limits.max_lines,
            modes,
            risk_classes: raw.risk_classes.unwrap_or_default(),
            suppression_paths,
            suppression_rules,
            packs_enabled: packs.enabled.unwrap_or(true),
            packs_min_findings: packs.min_findings.unwrap_or(2),
            prefer_packs: packs.prefer_packs.unwrap_or(true),
            policy_hash: sha256_hex(raw_bytes)[..16].to_string(),
            global_globs,
            rule_globs,
        };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> AceResult<()> {
        for (field, value) in [
            ("scoring.alpha", self.alpha),
            ("scoring.beta", self.beta),
            ("scoring.gamma", self.gamma),
            ("scoring.auto_threshold", self.auto_threshold),
            ("scoring.suggest_threshold", self.suggest_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AceError::InvalidPolicy {
                    field: field.into(),
                    value: value.to_string(),
                    reason: "must be in [0.0, 1.0]".into(),
                });
            }
        }
        if self.auto_threshold < self.suggest_threshold {
            return Err(AceError::InvalidPolicy {
                field: "scoring.auto_threshold".into(),
                value: self.auto_threshold.to_string(),
                reason: format!(
                    "must be >= suggest_threshold ({})",
                    self.suggest_threshold
                ),
            });
        }
        if self.packs_min_findings < 1 {
            return Err(AceError::InvalidPolicy {
                field: "packs.min_findings".into(),
                value: self.packs_min_findings.to_string(),
                reason: "must be >= 1".into(),
            });
        }
        Ok(())
    }

    /// Mode for a rule; unlisted rules default to auto-fix.
    #[must_use]
    pub fn mode(&self, rule_id: &str) -> RuleMode {
        self.modes.get(rule_id).copied().unwrap_or(RuleMode::AutoFix)
    }

    /// Risk class a rule belongs to, if classified.
    #[must_use]
    pub fn risk_class(&self, rule_id: &str) -> Option<&str> {
        self.risk_classes
            .iter()
            .find(|(_, rules)| rules.iter().any(|r| r == rule_id))
            .map(|(class, _)| class.as_str())
    }

    /// Whether the global path suppressions exclude this file entirely.
    #[must_use]
    pub fn is_path_suppressed(&self, file: &str) -> bool {
        self.global_globs.is_match(file)
    }

    /// Whether `(file, rule)` is suppressed by path globs (global or
    /// per-rule).
    #[must_use]
    pub fn is_suppressed(&self, file: &str, rule_id: &str) -> bool {
        if self.global_globs.is_match(file) {
            return true;
        }
        self.rule_globs
            .get(rule_id)
            .is_some_and(|set| set.is_match(file))
    }

    /// Read-only view handed to detectors.
    #[must_use]
    pub fn view(&self) -> PolicyView<'_> {
        PolicyView { policy: self }
    }
}

fn compile_globs(patterns: &[String], field: &str) -> AceResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| AceError::InvalidPolicy {
            field: field.to_owned(),
            value: pattern.clone(),
            reason: err.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| AceError::InvalidPolicy {
        field: field.to_owned(),
        value: String::new(),
        reason: err.to_string(),
    })
}

/// The slice of policy a detector may consult. Detectors stay pure; this view
/// only answers lookups.
#[derive(Debug, Clone, Copy)]
pub struct PolicyView<'a> {
    policy: &'a Policy,
}

impl PolicyView<'_> {
    #[must_use]
    pub fn mode(&self, rule_id: &str) -> RuleMode {
        self.policy.mode(rule_id)
    }

    #[must_use]
    pub fn is_suppressed(&self, file: &str, rule_id: &str) -> bool {
        self.policy.is_suppressed(file, rule_id)
    }
}

// Raw TOML shapes: every section and field optional so a partial policy file
// composes with defaults.

#[derive(Debug, Default, Deserialize)]
struct RawPolicy {
    meta: Option<RawMeta>,
    scoring: Option<RawScoring>,
    limits: Option<RawLimits>,
    modes: Option<BTreeMap<String, String>>,
    risk_classes: Option<BTreeMap<String, Vec<String>>>,
    suppressions: Option<RawSuppressions>,
    packs: Option<RawPacks>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMeta {
    version: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawScoring {
    alpha: Option<f64>,
    beta: Option<f64>,
    gamma: Option<f64>,
    auto_threshold: Option<f64>,
    suggest_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLimits {
    warn_at: Option<usize>,
    fail_at: Option<usize>,
    fail_on_critical: Option<bool>,
    max_files: Option<usize>,
    max_lines: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSuppressions {
    paths: Option<Vec<String>>,
    rules: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPacks {
    enabled: Option<bool>,
    min_findings: Option<usize>,
    prefer_packs: Option<bool>,
}
