//! Plug-in interfaces consumed by the engine core.
//!
//! Three seams: `Detector` (rule detection), `Codemod` (edit planning), and
//! `LanguageParser` (parse, re-emit, canonical hash, symbol counts). All are
//! object-safe so the registry can hold open sets of implementations; each
//! declares its capabilities in a static manifest so the guard can decide
//! which structural changes an edit is allowed to make.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::policy::PolicyView;
use crate::types::{Edit, Finding};

/// Node kinds in the language-neutral parse tree.
///
/// Comment and blank nodes are carried for byte-identical re-emission but
/// are not semantically significant; canonicalization drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Module,
    Function,
    Class,
    Import,
    Statement,
    Comment,
    Blank,
}

impl NodeKind {
    /// Whether this node participates in canonicalization and the AST hash.
    #[must_use]
    pub fn is_significant(self) -> bool {
        !matches!(self, Self::Comment | Self::Blank)
    }
}

/// One node of the parse tree: a logical source line with its structural
/// classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    /// Declared name for functions/classes; comma-separated imported module
    /// paths for imports.
    pub name: Option<String>,
    /// 1-based line where the node starts.
    pub line: usize,
    /// Leading indentation width in columns.
    pub indent: usize,
    /// Raw source text of the node's physical lines, exactly as read
    /// (without the trailing newline).
    pub text: String,
}

/// Parse tree produced by a language plug-in.
///
/// The tree keeps enough raw texture (newline style, trailing-newline
/// presence, verbatim node text) that `reemit` can reproduce the input
/// byte-for-byte when the parser declares byte-identical fidelity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTree {
    pub nodes: Vec<SyntaxNode>,
    /// `"\n"` or `"\r\n"`.
    pub newline: &'static str,
    pub had_trailing_newline: bool,
}

impl ParseTree {
    /// Imported module paths, in source order. A single import statement may
    /// contribute several entries (`import os, sys`).
    #[must_use]
    pub fn imports(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Import)
            .filter_map(|n| n.name.as_deref())
            .flat_map(|names| names.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Declared functions and classes, in source order.
    #[must_use]
    pub fn declarations(&self) -> Vec<&SyntaxNode> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Function | NodeKind::Class))
            .collect()
    }
}

/// Declared symbol totals used by the guard's symbol-count layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SymbolCounts {
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
}

/// A parse failure with enough context for the `internal.parse` finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    /// 1-based line of the first error.
    pub line: usize,
    pub detail: String,
}

/// Whether `reemit(parse(x))` reproduces `x` exactly or only up to tree
/// equivalence. The guard's roundtrip layer compares accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionFidelity {
    ByteIdentical,
    TreeEquivalent,
}

/// Language parser plug-in. One implementation is bundled (`ace-lang`); the
/// seam admits others without touching the core.
pub trait LanguageParser: Send + Sync {
    /// Short language tag, e.g. `"python"`.
    fn language(&self) -> &'static str;

    /// Whether this parser claims the given path (by extension).
    fn handles(&self, path: &Path) -> bool;

    fn parse(&self, bytes: &[u8]) -> Result<ParseTree, ParseDiagnostic>;

    /// Reconstruct source bytes from a tree.
    fn reemit(&self, tree: &ParseTree) -> Vec<u8>;

    /// SHA-256 over the canonicalized tree (comments, blank lines, and
    /// trailing whitespace normalized away; significant node kinds kept).
    fn canonical_hash(&self, tree: &ParseTree) -> [u8; 32];

    fn count_symbols(&self, tree: &ParseTree) -> SymbolCounts;

    fn emission_fidelity(&self) -> EmissionFidelity;
}

/// Static metadata for one rule, embedded in the detector's manifest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleMeta {
    /// Namespace-id form, e.g. `net.request-timeout`.
    pub id: &'static str,
    pub category: &'static str,
    /// Default severity in [0, 1], used unless policy overrides.
    pub default_severity: f64,
    /// Default complexity estimate in [0, 1].
    pub default_complexity: f64,
    /// Whether a codemod exists for this rule.
    pub autofix: bool,
    pub description: &'static str,
}

/// Static manifest a detector publishes: which rules it emits.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorManifest {
    pub rules: &'static [RuleMeta],
}

impl DetectorManifest {
    #[must_use]
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id).collect()
    }

    #[must_use]
    pub fn rule(&self, rule_id: &str) -> Option<&RuleMeta> {
        self.rules.iter().find(|r| r.id == rule_id)
    }
}

/// Rule detection plug-in. Pure: no I/O beyond the input bytes.
pub trait Detector: Send + Sync {
    fn manifest(&self) -> &DetectorManifest;

    /// Emit findings for one file. `file` is the normalized relative path.
    fn analyze(&self, file: &str, bytes: &[u8], policy: &PolicyView) -> Vec<Finding>;

    /// Optional per-file soft timeout; exceeding it drops the file from the
    /// run with a timeout event rather than failing the run.
    fn soft_timeout_ms(&self) -> Option<u64> {
        None
    }
}

/// Structural effects a codemod is permitted to have, consumed by the guard.
///
/// Anything not declared here is treated as a violation when the guard runs
/// in strict mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EffectManifest {
    /// The edit leaves the canonicalized tree equivalent.
    pub structure_preserving: bool,
    /// Declared function/class/import totals may change.
    pub may_change_symbol_counts: bool,
    /// Imports may be removed; the removed names must still be imports that
    /// existed before the edit.
    pub may_remove_imports: bool,
    /// The canonical AST hash may change.
    pub may_change_ast: bool,
}

impl EffectManifest {
    /// Effects for a whitespace-level fix: tree-equivalent, nothing changes.
    #[must_use]
    pub const fn structure_preserving() -> Self {
        Self {
            structure_preserving: true,
            may_change_symbol_counts: false,
            may_remove_imports: false,
            may_change_ast: false,
        }
    }

    /// Union of two manifests: the loosest permission wins per axis, and
    /// structure preservation survives only if both sides preserve it.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            structure_preserving: self.structure_preserving && other.structure_preserving,
            may_change_symbol_counts: self.may_change_symbol_counts
                || other.may_change_symbol_counts,
            may_remove_imports: self.may_remove_imports || other.may_remove_imports,
            may_change_ast: self.may_change_ast || other.may_change_ast,
        }
    }
}

/// Edit-planning plug-in for one rule.
pub trait Codemod: Send + Sync {
    fn rule_id(&self) -> &'static str;

    fn effects(&self) -> EffectManifest;

    /// Plan edits for one file; `None` means nothing applies, which is also
    /// the post-apply idempotence check.
    fn plan(&self, file: &str, bytes: &[u8]) -> Option<Vec<Edit>>;
}
