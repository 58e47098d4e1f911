//! Dead import detection and removal.
//!
//! Scope-light: a binding counts as used if its identifier appears anywhere
//! outside import lines. An import line is only reported when every binding
//! it introduces is unused, so the codemod can delete whole lines.
//! `__future__`, star imports, and parenthesized multi-line imports are
//! never touched.

use std::collections::BTreeSet;

use ace_core::policy::PolicyView;
use ace_core::traits::{Codemod, Detector, DetectorManifest, EffectManifest, RuleMeta};
use ace_core::types::{Edit, EditOp, Finding};

pub const RULE_DEAD_IMPORT: &str = "imports.dead-import";

static RULES: &[RuleMeta] = &[RuleMeta {
    id: RULE_DEAD_IMPORT,
    category: "hygiene",
    default_severity: 0.4,
    default_complexity: 0.1,
    autofix: true,
    description: "Imported name is never used in the module",
}];

static MANIFEST: DetectorManifest = DetectorManifest { rules: RULES };

/// Bindings introduced by one physical import line, or `None` when the line
/// is not a (safely analyzable) import.
fn import_bindings(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim_start();
    if trimmed.contains('(') {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("import ") {
        let bindings = rest
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                let mut words = part.split_whitespace();
                let module = words.next()?;
                match (words.next(), words.next()) {
                    (Some("as"), Some(alias)) => Some(alias.to_owned()),
                    // `import a.b` binds the top-level name `a`
                    _ => Some(module.split('.').next().unwrap_or(module).to_owned()),
                }
            })
            .collect::<Vec<_>>();
        return (!bindings.is_empty()).then_some(bindings);
    }
    if let Some(rest) = trimmed.strip_prefix("from ") {
        let mut parts = rest.splitn(2, " import ");
        let module = parts.next()?.trim();
        let names = parts.next()?;
        if module == "__future__" || names.contains('*') {
            return None;
        }
        let bindings = names
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                let mut words = part.split_whitespace();
                let name = words.next()?;
                match (words.next(), words.next()) {
                    (Some("as"), Some(alias)) => Some(alias.to_owned()),
                    _ => Some(name.to_owned()),
                }
            })
            .collect::<Vec<_>>();
        return (!bindings.is_empty()).then_some(bindings);
    }
    None
}

fn is_import_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("import ") || trimmed.starts_with("from ")
}

/// Identifiers used outside import lines.
fn used_identifiers(text: &str) -> BTreeSet<String> {
    let mut used = BTreeSet::new();
    for line in text.lines() {
        if is_import_line(line) {
            continue;
        }
        let mut current = String::new();
        for c in line.chars() {
            if c.is_alphanumeric() || c == '_' {
                current.push(c);
            } else if !current.is_empty() {
                used.insert(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            used.insert(current);
        }
    }
    used
}

/// `(line_number, line_text)` of import lines whose bindings are all unused.
fn dead_import_lines(text: &str) -> Vec<(usize, String)> {
    let used = used_identifiers(text);
    text.lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let bindings = import_bindings(line)?;
            bindings
                .iter()
                .all(|name| !used.contains(name))
                .then(|| (idx + 1, line.to_owned()))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeadImportDetector;

impl Detector for DeadImportDetector {
    fn manifest(&self) -> &DetectorManifest {
        &MANIFEST
    }

    fn analyze(&self, file: &str, bytes: &[u8], _policy: &PolicyView) -> Vec<Finding> {
        let Ok(text) = std::str::from_utf8(bytes) else {
            return Vec::new();
        };
        let meta = &RULES[0];
        dead_import_lines(text)
            .into_iter()
            .map(|(line_no, line)| {
                Finding::new(
                    meta.id,
                    file,
                    line_no,
                    line_no,
                    meta.default_severity,
                    meta.default_complexity,
                    "Unused import",
                    line.trim(),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeadImportCodemod;

impl Codemod for DeadImportCodemod {
    fn rule_id(&self) -> &'static str {
        RULE_DEAD_IMPORT
    }

    fn effects(&self) -> EffectManifest {
        EffectManifest {
            structure_preserving: false,
            may_change_symbol_counts: true,
            may_remove_imports: true,
            may_change_ast: true,
        }
    }

    fn plan(&self, file: &str, bytes: &[u8]) -> Option<Vec<Edit>> {
        let text = std::str::from_utf8(bytes).ok()?;
        let edits: Vec<Edit> = dead_import_lines(text)
            .into_iter()
            .map(|(line_no, _)| Edit::new(file, line_no, line_no, EditOp::Delete, ""))
            .collect();
        if edits.is_empty() { None } else { Some(edits) }
    }
}
