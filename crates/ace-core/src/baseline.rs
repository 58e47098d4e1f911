//! Finding baselines: deterministic identity plus set difference.
//!
//! A baseline is a persisted snapshot of finding identities. Comparing the
//! current run against it yields NEW (introduced since the snapshot), FIXED
//! (present then, gone now), and EXISTING (present in both). Policy gates
//! turn NEW findings or severity regressions into exit-code-2 violations.

use serde::{Deserialize, Serialize};

use crate::error::{AceError, AceResult};
use crate::fingerprint::baseline_id;
use crate::types::Finding;

/// One baselined finding: identity plus enough context to report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    /// 16 hex chars over `rule_id|file|start_line|end_line|context_hash`.
    pub id: String,
    pub rule_id: String,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub severity: f64,
    pub message: String,
}

impl BaselineRecord {
    #[must_use]
    pub fn from_finding(finding: &Finding) -> Self {
        Self {
            id: baseline_id(
                &finding.rule_id,
                &finding.file,
                finding.start_line,
                finding.end_line,
                &finding.context_hash,
            ),
            rule_id: finding.rule_id.clone(),
            file: finding.file.clone(),
            start_line: finding.start_line,
            end_line: finding.end_line,
            severity: finding.severity,
            message: finding.message.clone(),
        }
    }
}

/// Persisted baseline: records sorted by id so serialization is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub records: Vec<BaselineRecord>,
}

impl Baseline {
    /// Snapshot the given findings, sorted by baseline id.
    #[must_use]
    pub fn capture(findings: &[Finding]) -> Self {
        let mut records: Vec<BaselineRecord> =
            findings.iter().map(BaselineRecord::from_finding).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records.dedup_by(|a, b| a.id == b.id);
        Self { records }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records.binary_search_by(|r| r.id.as_str().cmp(id)).is_ok()
    }

    fn record(&self, id: &str) -> Option<&BaselineRecord> {
        self.records
            .binary_search_by(|r| r.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.records[idx])
    }
}

/// Result of comparing the current findings against a baseline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineDiff {
    /// Current findings absent from the baseline.
    pub new: Vec<Finding>,
    /// Baseline records no longer present.
    pub fixed: Vec<BaselineRecord>,
    /// Present in both; paired `(current, baselined)` for regression checks.
    pub existing: Vec<(Finding, BaselineRecord)>,
}

impl BaselineDiff {
    /// Existing findings whose severity increased since the baseline.
    #[must_use]
    pub fn regressions(&self) -> Vec<&Finding> {
        self.existing
            .iter()
            .filter(|(current, baselined)| current.severity > baselined.severity)
            .map(|(current, _)| current)
            .collect()
    }
}

/// Compare current findings against a baseline.
#[must_use]
pub fn compare(current: &[Finding], baseline: &Baseline) -> BaselineDiff {
    let mut diff = BaselineDiff::default();

    for finding in current {
        let id = baseline_id(
            &finding.rule_id,
            &finding.file,
            finding.start_line,
            finding.end_line,
            &finding.context_hash,
        );
        match baseline.record(&id) {
            Some(record) => diff.existing.push((finding.clone(), record.clone())),
            None => diff.new.push(finding.clone()),
        }
    }

    let matched: std::collections::BTreeSet<&str> = diff
        .existing
        .iter()
        .map(|(_, record)| record.id.as_str())
        .collect();
    for record in &baseline.records {
        if !matched.contains(record.id.as_str()) {
            diff.fixed.push(record.clone());
        }
    }
    diff
}

/// Gate outcome evaluated against a diff at run end.
pub fn enforce_gates(
    diff: &BaselineDiff,
    fail_on_new: bool,
    fail_on_regression: bool,
) -> AceResult<()> {
    if fail_on_new && !diff.new.is_empty() {
        return Err(AceError::PolicyViolation {
            detail: format!("{} new finding(s) under --fail-on-new", diff.new.len()),
        });
    }
    if fail_on_regression {
        let regressions = diff.regressions();
        if !regressions.is_empty() {
            return Err(AceError::PolicyViolation {
                detail: format!(
                    "{} finding(s) regressed in severity under --fail-on-regression",
                    regressions.len()
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(rule: &str, file: &str, line: usize, severity: f64) -> Finding {
        Finding::new(rule, file, line, line, severity, 0.2, "msg", "slice")
    }

    #[test]
    fn capture_sorts_and_dedups() {
        let findings = vec![
            finding("z.rule", "b.py", 9, 0.5),
            finding("a.rule", "a.py", 1, 0.5),
            finding("a.rule", "a.py", 1, 0.5),
        ];
        let baseline = Baseline::capture(&findings);
        assert_eq!(baseline.records.len(), 2);
        assert!(baseline.records[0].id < baseline.records[1].id);
    }

    #[test]
    fn diff_partitions_new_fixed_existing() {
        let old = vec![finding("a.rule", "a.py", 1, 0.5), finding("b.rule", "b.py", 2, 0.4)];
        let baseline = Baseline::capture(&old);

        let current = vec![finding("a.rule", "a.py", 1, 0.5), finding("c.rule", "c.py", 3, 0.9)];
        let diff = compare(&current, &baseline);

        assert_eq!(diff.new.len(), 1);
        assert_eq!(diff.new[0].rule_id, "c.rule");
        assert_eq!(diff.fixed.len(), 1);
        assert_eq!(diff.fixed[0].rule_id, "b.rule");
        assert_eq!(diff.existing.len(), 1);
        assert_eq!(diff.existing[0].0.rule_id, "a.rule");
    }

    #[test]
    fn diff_is_symmetric_modulo_labels() {
        let set_a = vec![finding("a.rule", "a.py", 1, 0.5), finding("b.rule", "b.py", 2, 0.4)];
        let set_b = vec![finding("b.rule", "b.py", 2, 0.4), finding("c.rule", "c.py", 3, 0.9)];

        let forward = compare(&set_b, &Baseline::capture(&set_a));
        let backward = compare(&set_a, &Baseline::capture(&set_b));

        let forward_new: Vec<&str> = forward.new.iter().map(|f| f.rule_id.as_str()).collect();
        let backward_fixed: Vec<&str> =
            backward.fixed.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(forward_new, backward_fixed);

        let forward_fixed: Vec<&str> = forward.fixed.iter().map(|r| r.rule_id.as_str()).collect();
        let backward_new: Vec<&str> = backward.new.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(forward_fixed, backward_new);
    }

    #[test]
    fn severity_regression_detected() {
        let baseline = Baseline::capture(&[finding("a.rule", "a.py", 1, 0.4)]);
        let current = vec![finding("a.rule", "a.py", 1, 0.9)];
        let diff = compare(&current, &baseline);
        assert_eq!(diff.regressions().len(), 1);
    }

    #[test]
    fn gates_fire_as_exit_code_two() {
        let baseline = Baseline::capture(&[]);
        let current = vec![finding("a.rule", "a.py", 1, 0.5)];
        let diff = compare(&current, &baseline);

        let err = enforce_gates(&diff, true, false).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(enforce_gates(&diff, false, false).is_ok());
    }

    #[test]
    fn unchanged_set_passes_all_gates() {
        let findings = vec![finding("a.rule", "a.py", 1, 0.5)];
        let baseline = Baseline::capture(&findings);
        let diff = compare(&findings, &baseline);
        assert!(diff.new.is_empty());
        assert!(diff.fixed.is_empty());
        assert!(enforce_gates(&diff, true, true).is_ok());
    }
}
