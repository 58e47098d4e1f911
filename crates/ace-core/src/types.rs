//! Core data model: findings, edits, plans, receipts, decisions.
//!
//! Findings exist only within a single run unless persisted in a baseline.
//! Plans exist from synthesis until a receipt or revert is recorded; they are
//! never serialized wholesale, so the in-memory shape carries full finding
//! records while the persisted surfaces (journal, baseline, receipts) use
//! stable ids and hashes only.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_json_line;
use crate::error::{AceError, AceResult};
use crate::fingerprint::{context_hash, sha256_hex, stable_id};

/// One rule-violation instance at a source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable rule identifier in namespace-id form, e.g. `net.request-timeout`.
    pub rule_id: String,
    /// Normalized relative path with POSIX separators.
    pub file: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    /// In [0.0, 1.0].
    pub severity: f64,
    /// Estimated refactor cost, in [0.0, 1.0].
    pub complexity: f64,
    /// Short human message.
    pub message: String,
    /// 16 hex chars over `rule_id|file|content-slice|rationale[:100]`.
    pub context_hash: String,
    /// `rule_id:file:start_line:context_hash`; identity for baselines,
    /// learning, and suppression matching.
    pub stable_id: String,
    /// Dense per-run index assigned after the deterministic sort; zero until
    /// the kernel assigns it.
    #[serde(default)]
    pub run_id: usize,
}

impl Finding {
    /// Build a finding, deriving `context_hash` and `stable_id` from the
    /// content slice the rule matched on.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_id: &str,
        file: &str,
        start_line: usize,
        end_line: usize,
        severity: f64,
        complexity: f64,
        message: &str,
        content_slice: &str,
    ) -> Self {
        let context_hash = context_hash(rule_id, file, content_slice, message);
        let stable_id = stable_id(rule_id, file, start_line, &context_hash);
        Self {
            rule_id: rule_id.to_owned(),
            file: file.to_owned(),
            start_line,
            end_line,
            severity: severity.clamp(0.0, 1.0),
            complexity: complexity.clamp(0.0, 1.0),
            message: message.to_owned(),
            context_hash,
            stable_id,
            run_id: 0,
        }
    }

    /// Deterministic ordering key: `(file, start_line, end_line, rule_id,
    /// context_hash)`.
    #[must_use]
    pub fn sort_key(&self) -> (&str, usize, usize, &str, &str) {
        (
            &self.file,
            self.start_line,
            self.end_line,
            &self.rule_id,
            &self.context_hash,
        )
    }
}

/// Text change operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOp {
    /// Replace lines `[start_line, end_line]` with the payload.
    Replace,
    /// Insert the payload before `start_line`; `end_line == start_line`.
    Insert,
    /// Delete lines `[start_line, end_line]`; payload is empty.
    Delete,
}

/// An atomic text change against one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub file: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub op: EditOp,
    /// UTF-8 payload; `\n` separated, converted to the target file's newline
    /// style on apply.
    pub payload: String,
}

impl Edit {
    #[must_use]
    pub fn new(file: &str, start_line: usize, end_line: usize, op: EditOp, payload: &str) -> Self {
        Self {
            file: file.to_owned(),
            start_line,
            end_line,
            op,
            payload: payload.to_owned(),
        }
    }

    /// Two edits overlap iff they target the same file and their inclusive
    /// line intervals intersect.
    #[must_use]
    pub fn overlaps(&self, other: &Edit) -> bool {
        self.file == other.file
            && self.start_line <= other.end_line
            && other.start_line <= self.end_line
    }
}

/// Apply edits to source text in descending `start_line` order so earlier
/// line numbers stay valid throughout.
///
/// The original newline style (`\n` vs `\r\n`) and the presence of a trailing
/// newline are preserved. Edits must be non-overlapping and in range.
pub fn apply_edits(source: &str, edits: &[Edit]) -> AceResult<String> {
    let newline = if source.contains("\r\n") { "\r\n" } else { "\n" };
    let had_trailing = source.ends_with('\n');

    let mut lines: Vec<String> = if source.is_empty() {
        Vec::new()
    } else {
        let mut split: Vec<String> = source.split(newline).map(str::to_owned).collect();
        if had_trailing {
            split.pop();
        }
        split
    };

    let mut ordered: Vec<&Edit> = edits.iter().collect();
    ordered.sort_by(|a, b| b.start_line.cmp(&a.start_line));

    for edit in ordered {
        if edit.start_line == 0 || edit.start_line > edit.end_line {
            return Err(AceError::subsystem(
                "edit-apply",
                std::io::Error::other(format!(
                    "invalid line range {}..={} in edit for {}",
                    edit.start_line, edit.end_line, edit.file
                )),
            ));
        }
        let payload_lines: Vec<String> = if edit.payload.is_empty() {
            Vec::new()
        } else {
            edit.payload
                .split('\n')
                .map(|l| l.trim_end_matches('\r').to_owned())
                .collect()
        };
        match edit.op {
            EditOp::Replace | EditOp::Delete => {
                if edit.end_line > lines.len() {
                    return Err(AceError::subsystem(
                        "edit-apply",
                        std::io::Error::other(format!(
                            "edit for {} ends at line {} but file has {} lines",
                            edit.file,
                            edit.end_line,
                            lines.len()
                        )),
                    ));
                }
                let replacement = if edit.op == EditOp::Delete {
                    Vec::new()
                } else {
                    payload_lines
                };
                lines.splice(edit.start_line - 1..edit.end_line, replacement);
            }
            EditOp::Insert => {
                if edit.start_line > lines.len() + 1 {
                    return Err(AceError::subsystem(
                        "edit-apply",
                        std::io::Error::other(format!(
                            "insert for {} at line {} beyond file of {} lines",
                            edit.file,
                            edit.start_line,
                            lines.len()
                        )),
                    ));
                }
                lines.splice(edit.start_line - 1..edit.start_line - 1, payload_lines);
            }
        }
    }

    let mut out = lines.join(newline);
    if had_trailing && !lines.is_empty() {
        out.push_str(newline);
    }
    Ok(out)
}

/// Whether a plan was synthesized as a lone finding or a recipe pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Singleton,
    Pack,
}

/// One applied unit: an ordered, non-overlapping group of edits backed by
/// one or more findings.
#[derive(Debug, Clone, PartialEq)]
pub struct EditPlan {
    /// `plan-<12 hex>` for singletons, `pack-<12 hex>` for packs.
    pub id: String,
    /// Backing findings; never empty.
    pub findings: Vec<Finding>,
    /// Ordered edits; non-overlapping within the plan.
    pub edits: Vec<Edit>,
    /// Union of the findings' rule ids, sorted.
    pub rule_ids: Vec<String>,
    /// R★ risk/confidence score in [0, 1].
    pub estimated_risk: f64,
    pub kind: PlanKind,
    /// Recipe cohesion for packs; `None` for singletons.
    pub cohesion: Option<f64>,
}

impl EditPlan {
    /// Build a singleton plan; the id is `plan-` + 12 hex chars of the
    /// SHA-256 over the canonically serialized edits.
    pub fn singleton(finding: Finding, edits: Vec<Edit>) -> AceResult<Self> {
        let id = format!("plan-{}", &sha256_hex(canonical_json_line(&edits)?.as_bytes())[..12]);
        let rule_ids = vec![finding.rule_id.clone()];
        Ok(Self {
            id,
            findings: vec![finding],
            edits,
            rule_ids,
            estimated_risk: 0.0,
            kind: PlanKind::Singleton,
            cohesion: None,
        })
    }

    /// Stable ids of the backing findings.
    #[must_use]
    pub fn finding_ids(&self) -> Vec<&str> {
        self.findings.iter().map(|f| f.stable_id.as_str()).collect()
    }

    /// Distinct files touched by this plan's edits.
    #[must_use]
    pub fn files(&self) -> BTreeSet<&str> {
        self.edits.iter().map(|e| e.file.as_str()).collect()
    }

    /// Maximum severity across backing findings.
    #[must_use]
    pub fn max_severity(&self) -> f64 {
        self.findings.iter().map(|f| f.severity).fold(0.0, f64::max)
    }

    /// Maximum complexity across backing findings.
    #[must_use]
    pub fn max_complexity(&self) -> f64 {
        self.findings.iter().map(|f| f.complexity).fold(0.0, f64::max)
    }

    /// Error if any pair of this plan's edits overlaps.
    pub fn validate_non_overlapping(&self) -> AceResult<()> {
        for (i, a) in self.edits.iter().enumerate() {
            for b in &self.edits[i + 1..] {
                if a.overlaps(b) {
                    return Err(AceError::subsystem(
                        "plan",
                        std::io::Error::other(format!(
                            "plan {} has overlapping edits in {} at lines {}..={} and {}..={}",
                            self.id, a.file, a.start_line, a.end_line, b.start_line, b.end_line
                        )),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Total lines touched: replaced/deleted ranges plus inserted payload
    /// lines. Feeds the per-run change budget.
    #[must_use]
    pub fn lines_touched(&self) -> usize {
        self.edits
            .iter()
            .map(|edit| match edit.op {
                EditOp::Replace | EditOp::Delete => edit.end_line - edit.start_line + 1,
                EditOp::Insert => edit.payload.split('\n').count(),
            })
            .sum()
    }
}

/// Guard verification layer, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardLayer {
    Parse,
    StructuralEquivalence,
    SymbolCounts,
    AstHash,
    Roundtrip,
    ImportPreservation,
}

impl GuardLayer {
    /// Snake-case name used in journal revert reasons and rationale strings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::StructuralEquivalence => "structural_equivalence",
            Self::SymbolCounts => "symbol_counts",
            Self::AstHash => "ast_hash",
            Self::Roundtrip => "roundtrip",
            Self::ImportPreservation => "import_preservation",
        }
    }
}

impl fmt::Display for GuardLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Planner decision for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Apply without asking.
    Auto,
    /// Surface for review.
    Suggest,
    /// Below the suggest threshold.
    Skip,
}

/// Per-applied-plan audit record, persisted under `.ace/receipts/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub plan_id: String,
    pub file: String,
    /// SHA-256 of the file before the plan, 64 hex chars.
    pub before_sha: String,
    /// SHA-256 of the file after the plan, 64 hex chars.
    pub after_sha: String,
    pub parse_valid: bool,
    pub invariants_met: bool,
    /// R★ of the applied plan.
    pub estimated_risk: f64,
    /// Wall time to apply, in milliseconds.
    pub duration_ms: u64,
    /// 16 hex chars over the policy file bytes.
    pub policy_hash: String,
    /// ISO-8601 UTC.
    pub timestamp: String,
}
