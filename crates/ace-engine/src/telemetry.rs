//! Rule execution telemetry.
//!
//! Appends `{rule_id, ms, files, ok, reverted, ts}` records to
//! `.ace/telemetry.jsonl`. This stream is advisory: plain appends, no fsync,
//! and a missing or truncated file never fails a run. Aggregation produces
//! per-rule mean and p95 latency, and the cost ranks the planner subtracts
//! from action priority (cheapest rule = rank 0).

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ace_core::canonical::canonical_json_line;
use ace_core::clock::Clock;

/// One rule execution timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub rule_id: String,
    pub ms: f64,
    /// Files processed in this execution.
    pub files: usize,
    pub ok: bool,
    pub reverted: bool,
    /// Seconds since the Unix epoch.
    pub ts: u64,
}

/// Aggregated per-rule statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryStats {
    pub mean_ms: BTreeMap<String, f64>,
    pub p95_ms: BTreeMap<String, f64>,
    pub count: BTreeMap<String, usize>,
}

/// Append-only telemetry sink. Appends serialize through one mutex; the
/// JSONL file is the single source for aggregation.
#[derive(Debug)]
pub struct Telemetry {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl Telemetry {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            append_lock: Mutex::new(()),
        }
    }

    /// Record one rule execution. Disk errors are swallowed by design;
    /// telemetry is advisory.
    pub fn record(&self, rule_id: &str, ms: f64, files: usize, ok: bool, reverted: bool, clock: &Clock) {
        let record = TelemetryRecord {
            rule_id: rule_id.to_owned(),
            ms,
            files,
            ok,
            reverted,
            ts: clock.epoch_seconds(),
        };
        let Ok(line) = canonical_json_line(&record) else {
            return;
        };
        let _guard = self.append_lock.lock();
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{line}");
        }
    }

    /// All records persisted so far, including this run's.
    #[must_use]
    pub fn all_records(&self) -> Vec<TelemetryRecord> {
        Self::load(&self.path)
    }

    /// Parse a telemetry JSONL file, skipping malformed lines.
    #[must_use]
    pub fn load(path: &Path) -> Vec<TelemetryRecord> {
        let Ok(text) = fs::read_to_string(path) else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TelemetryRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    debug!(target: "ace.telemetry", error = %err, "skipping malformed telemetry line");
                }
            }
        }
        records
    }
}

/// Aggregate mean, p95, and count per rule.
#[must_use]
pub fn aggregate(records: &[TelemetryRecord]) -> TelemetryStats {
    let mut durations: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for record in records {
        durations.entry(record.rule_id.clone()).or_default().push(record.ms);
    }

    let mut stats = TelemetryStats::default();
    for (rule_id, mut values) in durations {
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let p95_idx = ((count as f64 * 0.95) as usize).min(count - 1);
        stats.mean_ms.insert(rule_id.clone(), mean);
        stats.p95_ms.insert(rule_id.clone(), values[p95_idx]);
        stats.count.insert(rule_id, count);
    }
    stats
}

/// Rank rules by ascending p95 latency: cheapest = rank 0, so the planner's
/// priority subtraction penalizes expensive rules the most. Rules without
/// telemetry rank as cheapest. Ties break on rule id.
#[must_use]
pub fn cost_ranks(rule_ids: &[&str], stats: &TelemetryStats) -> BTreeMap<String, usize> {
    let mut scored: Vec<(&str, f64)> = rule_ids
        .iter()
        .map(|id| (*id, stats.p95_ms.get(*id).copied().unwrap_or(0.0)))
        .collect();
    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(b.0))
    });
    scored
        .into_iter()
        .enumerate()
        .map(|(rank, (id, _))| (id.to_owned(), rank))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rule: &str, ms: f64) -> TelemetryRecord {
        TelemetryRecord {
            rule_id: rule.into(),
            ms,
            files: 1,
            ok: true,
            reverted: false,
            ts: 100,
        }
    }

    #[test]
    fn record_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");
        let telemetry = Telemetry::new(path.clone());
        let clock = Clock::Fixed(100);
        telemetry.record("net.request-timeout", 12.5, 3, true, false, &clock);
        telemetry.record("style.eof-newline", 0.4, 3, true, false, &clock);

        let records = Telemetry::load(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rule_id, "net.request-timeout");
        assert_eq!(records[0].ts, 100);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");
        fs::write(&path, "not json\n{\"rule_id\":\"r\",\"ms\":1.0,\"files\":1,\"ok\":true,\"reverted\":false,\"ts\":5}\n").unwrap();
        assert_eq!(Telemetry::load(&path).len(), 1);
    }

    #[test]
    fn aggregate_mean_and_p95() {
        let records: Vec<TelemetryRecord> = (1..=100).map(|i| record("r", i as f64)).collect();
        let stats = aggregate(&records);
        assert_eq!(stats.count["r"], 100);
        assert!((stats.mean_ms["r"] - 50.5).abs() < 1e-9);
        assert_eq!(stats.p95_ms["r"], 96.0);
    }

    #[test]
    fn single_sample_p95_is_that_sample() {
        let stats = aggregate(&[record("r", 7.0)]);
        assert_eq!(stats.p95_ms["r"], 7.0);
    }

    #[test]
    fn cost_ranks_cheapest_first() {
        let stats = aggregate(&[
            record("slow.rule", 100.0),
            record("fast.rule", 1.0),
            record("mid.rule", 10.0),
        ]);
        let ranks = cost_ranks(&["slow.rule", "fast.rule", "mid.rule"], &stats);
        assert_eq!(ranks["fast.rule"], 0);
        assert_eq!(ranks["mid.rule"], 1);
        assert_eq!(ranks["slow.rule"], 2);
    }

    #[test]
    fn unknown_rules_rank_cheapest_with_id_tiebreak() {
        let stats = TelemetryStats::default();
        let ranks = cost_ranks(&["b.rule", "a.rule"], &stats);
        assert_eq!(ranks["a.rule"], 0);
        assert_eq!(ranks["b.rule"], 1);
    }
}
