//! Whitespace-level hygiene: trailing whitespace, missing EOF newline.
//! Both codemods are structure-preserving.

use ace_core::policy::PolicyView;
use ace_core::traits::{Codemod, Detector, DetectorManifest, EffectManifest, RuleMeta};
use ace_core::types::{Edit, EditOp, Finding};

pub const RULE_TRAILING_WHITESPACE: &str = "style.trailing-whitespace";
pub const RULE_EOF_NEWLINE: &str = "style.eof-newline";

static TRAILING_RULES: &[RuleMeta] = &[RuleMeta {
    id: RULE_TRAILING_WHITESPACE,
    category: "style",
    default_severity: 0.2,
    default_complexity: 0.05,
    autofix: true,
    description: "Trailing whitespace at end of line",
}];

static TRAILING_MANIFEST: DetectorManifest = DetectorManifest {
    rules: TRAILING_RULES,
};

static EOF_RULES: &[RuleMeta] = &[RuleMeta {
    id: RULE_EOF_NEWLINE,
    category: "style",
    default_severity: 0.2,
    default_complexity: 0.05,
    autofix: true,
    description: "File does not end with a newline",
}];

static EOF_MANIFEST: DetectorManifest = DetectorManifest { rules: EOF_RULES };

fn has_trailing_ws(line: &str) -> bool {
    let stripped = line.strip_suffix('\r').unwrap_or(line);
    stripped != stripped.trim_end()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingWhitespaceDetector;

impl Detector for TrailingWhitespaceDetector {
    fn manifest(&self) -> &DetectorManifest {
        &TRAILING_MANIFEST
    }

    fn analyze(&self, file: &str, bytes: &[u8], _policy: &PolicyView) -> Vec<Finding> {
        let Ok(text) = std::str::from_utf8(bytes) else {
            return Vec::new();
        };
        let meta = &TRAILING_RULES[0];
        text.lines()
            .enumerate()
            .filter(|(_, line)| has_trailing_ws(line))
            .map(|(idx, line)| {
                Finding::new(
                    meta.id,
                    file,
                    idx + 1,
                    idx + 1,
                    meta.default_severity,
                    meta.default_complexity,
                    "Trailing whitespace",
                    line.trim_end(),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingWhitespaceCodemod;

impl Codemod for TrailingWhitespaceCodemod {
    fn rule_id(&self) -> &'static str {
        RULE_TRAILING_WHITESPACE
    }

    fn effects(&self) -> EffectManifest {
        EffectManifest::structure_preserving()
    }

    fn plan(&self, file: &str, bytes: &[u8]) -> Option<Vec<Edit>> {
        let text = std::str::from_utf8(bytes).ok()?;
        let edits: Vec<Edit> = text
            .lines()
            .enumerate()
            .filter(|(_, line)| has_trailing_ws(line))
            .map(|(idx, line)| {
                Edit::new(file, idx + 1, idx + 1, EditOp::Replace, line.trim_end())
            })
            .collect();
        if edits.is_empty() { None } else { Some(edits) }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EofNewlineDetector;

impl Detector for EofNewlineDetector {
    fn manifest(&self) -> &DetectorManifest {
        &EOF_MANIFEST
    }

    fn analyze(&self, file: &str, bytes: &[u8], _policy: &PolicyView) -> Vec<Finding> {
        let Ok(text) = std::str::from_utf8(bytes) else {
            return Vec::new();
        };
        if text.is_empty() || text.ends_with('\n') {
            return Vec::new();
        }
        let meta = &EOF_RULES[0];
        let last_line_no = text.lines().count();
        let last_line = text.lines().last().unwrap_or("");
        vec![Finding::new(
            meta.id,
            file,
            last_line_no,
            last_line_no,
            meta.default_severity,
            meta.default_complexity,
            "Missing newline at end of file",
            last_line.trim(),
        )]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EofNewlineCodemod;

impl Codemod for EofNewlineCodemod {
    fn rule_id(&self) -> &'static str {
        RULE_EOF_NEWLINE
    }

    fn effects(&self) -> EffectManifest {
        EffectManifest::structure_preserving()
    }

    fn plan(&self, file: &str, bytes: &[u8]) -> Option<Vec<Edit>> {
        let text = std::str::from_utf8(bytes).ok()?;
        if text.is_empty() || text.ends_with('\n') {
            return None;
        }
        let last_line_no = text.lines().count();
        let last_line = text.lines().last()?;
        // trailing empty payload line materializes the final newline
        let payload = format!("{last_line}\n");
        Some(vec![Edit::new(
            file,
            last_line_no,
            last_line_no,
            EditOp::Replace,
            &payload,
        )])
    }
}
