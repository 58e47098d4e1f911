//! In-source suppression directives.
//!
//! Each file is scanned once per run for `ace:` markers inside comment text:
//!
//! - `ace:disable=<rule>` / `ace:disable-all` — suppress the current line.
//! - `ace:file-disable=<rule>` / `ace:file-disable-all` — suppress the whole
//!   file for those rules.
//! - `ace:disable <rule>` … `ace:enable <rule>` — block form; the suppressed
//!   range is half-open `[disable_line, enable_line)`. An unclosed block runs
//!   to end of file.
//!
//! Path-based suppressions (policy globs) are applied before detection and
//! live in the policy module; this parser handles only in-source directives.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::Finding;

const MARKER: &str = "ace:";

/// Parsed suppression state for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSuppressions {
    /// Whole-file kill switch for all rules.
    file_all: bool,
    /// Whole-file suppressions for specific rules.
    file_rules: BTreeSet<String>,
    /// Lines where every rule is suppressed.
    line_all: BTreeSet<usize>,
    /// Per-rule line suppressions.
    line_rules: BTreeMap<String, BTreeSet<usize>>,
    /// Per-rule half-open suppressed ranges `[start, end)` from block form;
    /// `end == usize::MAX` for unclosed blocks.
    block_rules: BTreeMap<String, Vec<(usize, usize)>>,
}

impl FileSuppressions {
    /// Scan file content for directives. Directives are recognized anywhere
    /// in a line; rule detectors only place them in comments, so a marker in
    /// string-literal code is the author's own suppression to keep.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut out = Self::default();
        // rule -> line of the still-open block directive
        let mut open_blocks: BTreeMap<String, usize> = BTreeMap::new();

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let Some(pos) = line.find(MARKER) else {
                continue;
            };
            let directive = &line[pos + MARKER.len()..];
            let directive = directive.trim();

            if let Some(rest) = directive.strip_prefix("file-disable-all") {
                if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                    out.file_all = true;
                }
            } else if let Some(rule) = parse_assignment(directive, "file-disable=") {
                out.file_rules.insert(rule);
            } else if let Some(rest) = directive.strip_prefix("disable-all") {
                if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                    out.line_all.insert(line_no);
                }
            } else if let Some(rule) = parse_assignment(directive, "disable=") {
                out.line_rules.entry(rule).or_default().insert(line_no);
            } else if let Some(rule) = parse_word_argument(directive, "disable") {
                open_blocks.entry(rule).or_insert(line_no);
            } else if let Some(rule) = parse_word_argument(directive, "enable") {
                if let Some(start) = open_blocks.remove(&rule) {
                    out.block_rules
                        .entry(rule)
                        .or_default()
                        .push((start, line_no));
                }
            }
        }

        for (rule, start) in open_blocks {
            out.block_rules
                .entry(rule)
                .or_default()
                .push((start, usize::MAX));
        }
        out
    }

    /// Whether `rule_id` is suppressed at `line`.
    #[must_use]
    pub fn is_suppressed(&self, rule_id: &str, line: usize) -> bool {
        if self.file_all || self.file_rules.contains(rule_id) {
            return true;
        }
        if self.line_all.contains(&line) {
            return true;
        }
        if self
            .line_rules
            .get(rule_id)
            .is_some_and(|lines| lines.contains(&line))
        {
            return true;
        }
        self.block_rules
            .get(rule_id)
            .is_some_and(|ranges| ranges.iter().any(|&(start, end)| start <= line && line < end))
    }

    /// True when nothing in the file is suppressed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Drop findings this file's directives suppress. A finding is matched
    /// on its start line.
    #[must_use]
    pub fn filter(&self, findings: Vec<Finding>) -> Vec<Finding> {
        if self.is_empty() {
            return findings;
        }
        findings
            .into_iter()
            .filter(|f| !self.is_suppressed(&f.rule_id, f.start_line))
            .collect()
    }
}

/// `prefix=<rule>` form; the rule id runs to the next whitespace.
fn parse_assignment(directive: &str, prefix: &str) -> Option<String> {
    let rest = directive.strip_prefix(prefix)?;
    let rule: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    (!rule.is_empty()).then_some(rule)
}

/// `word <rule>` form (block directives).
fn parse_word_argument(directive: &str, word: &str) -> Option<String> {
    let rest = directive.strip_prefix(word)?;
    let rest = rest.strip_prefix(char::is_whitespace)?;
    let rule: String = rest
        .trim_start()
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    (!rule.is_empty()).then_some(rule)
}
