//! Adaptive learning over rule outcomes.
//!
//! Per-rule counters (applied / reverted / suggested / skipped) decay by 0.8
//! per whole week elapsed, quantized from the injectable clock so tests are
//! deterministic. Derived metrics tune the auto threshold within
//! [0.60, 0.85], and three consecutive reverts of the same `(rule, file)`
//! pair nominate it for the persistent skiplist.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ace_core::clock::Clock;
use ace_core::error::AceResult;
use ace_durability::atomic::{read_json_store, write_json_store};

pub const WEEKLY_DECAY: f64 = 0.8;
pub const FLOOR_AUTO_THRESHOLD: f64 = 0.60;
pub const CEIL_AUTO_THRESHOLD: f64 = 0.85;
pub const THRESHOLD_DELTA: f64 = 0.05;
pub const HIGH_REVERT_RATE: f64 = 0.25;
pub const HIGH_SUCCESS_RATE: f64 = 0.80;
/// Minimum applied+reverted sample before rates are trusted.
pub const MIN_SAMPLE_SIZE: f64 = 5.0;
/// Consecutive reverts of one `(rule, file)` pair before auto-skiplisting.
pub const SKIPLIST_CONSECUTIVE_REVERTS: u32 = 3;

/// Outcome of one plan for one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Reverted,
    Suggested,
    Skipped,
}

/// Decayed counters for a single rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub applied: f64,
    pub reverted: f64,
    pub suggested: f64,
    pub skipped: f64,
    /// Per-file consecutive revert streaks.
    pub consecutive_reverts: BTreeMap<String, u32>,
    /// Seconds since the Unix epoch of the last update.
    pub last_updated: u64,
}

impl RuleStats {
    /// Applied + reverted: the denominator for both rates.
    #[must_use]
    pub fn sample_size(&self) -> f64 {
        self.applied + self.reverted
    }

    /// `applied / (applied + reverted)`, defined only at sample size >= 5.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.sample_size();
        (total >= MIN_SAMPLE_SIZE).then(|| self.applied / total)
    }

    #[must_use]
    pub fn revert_rate(&self) -> f64 {
        let total = self.sample_size();
        if total == 0.0 { 0.0 } else { self.reverted / total }
    }

    /// Multiply the decayable counters by `0.8^weeks`.
    fn apply_decay(&mut self, weeks: u64) {
        if weeks == 0 {
            return;
        }
        let multiplier = WEEKLY_DECAY.powi(weeks as i32);
        self.applied *= multiplier;
        self.reverted *= multiplier;
        self.suggested *= multiplier;
    }
}

/// A `(rule, file)` pair that crossed the consecutive-revert threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipCandidate {
    pub rule_id: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LearnerState {
    rules: BTreeMap<String, RuleStats>,
}

/// The learning engine. Held under a single lock by the engine context and
/// persisted with the atomic store at run end.
#[derive(Debug)]
pub struct Learner {
    state: LearnerState,
    clock: Clock,
}

impl Learner {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            state: LearnerState::default(),
            clock,
        }
    }

    pub fn load(path: &Path, clock: Clock) -> AceResult<Self> {
        let state = read_json_store(path)?.unwrap_or_default();
        Ok(Self { state, clock })
    }

    pub fn save(&self, path: &Path) -> AceResult<()> {
        write_json_store(path, &self.state)
    }

    fn decayed_stats(&mut self, rule_id: &str) -> &mut RuleStats {
        let now = self.clock.epoch_seconds();
        let stats = self.state.rules.entry(rule_id.to_owned()).or_default();
        if stats.last_updated > 0 {
            let weeks = now.saturating_sub(stats.last_updated) / (7 * 24 * 3600);
            if weeks > 0 {
                stats.apply_decay(weeks);
            }
        }
        stats.last_updated = now;
        stats
    }

    /// Record one outcome. Returns a skip candidate when the file's
    /// consecutive-revert streak reaches the threshold.
    pub fn record_outcome(
        &mut self,
        rule_id: &str,
        outcome: Outcome,
        file: Option<&str>,
    ) -> Option<SkipCandidate> {
        let stats = self.decayed_stats(rule_id);
        let mut candidate = None;

        match outcome {
            // an apply does not clear the streak: the apply-then-revert
            // cycle is exactly the pattern the skiplist learns, and a
            // changed content hash releases the entry anyway
            Outcome::Applied => stats.applied += 1.0,
            Outcome::Reverted => {
                stats.reverted += 1.0;
                if let Some(file) = file {
                    let streak = stats.consecutive_reverts.entry(file.to_owned()).or_insert(0);
                    *streak += 1;
                    if *streak >= SKIPLIST_CONSECUTIVE_REVERTS {
                        info!(
                            target: "ace.learn",
                            rule_id,
                            file,
                            streak = *streak,
                            "consecutive-revert threshold reached"
                        );
                        candidate = Some(SkipCandidate {
                            rule_id: rule_id.to_owned(),
                            file: file.to_owned(),
                        });
                    }
                }
            }
            Outcome::Suggested => stats.suggested += 1.0,
            Outcome::Skipped => stats.skipped += 1.0,
        }
        debug!(target: "ace.learn", rule_id, outcome = ?outcome, "outcome recorded");
        candidate
    }

    /// Effective auto threshold for a rule: the policy value nudged by
    /// +-0.05 on strong revert/success evidence, clamped to [0.60, 0.85].
    pub fn tuned_auto_threshold(&mut self, rule_id: &str, policy_auto: f64) -> f64 {
        let stats = self.decayed_stats(rule_id);
        let mut threshold = policy_auto;
        if stats.sample_size() >= MIN_SAMPLE_SIZE {
            if stats.revert_rate() > HIGH_REVERT_RATE {
                threshold += THRESHOLD_DELTA;
            } else if stats.success_rate().is_some_and(|rate| rate > HIGH_SUCCESS_RATE) {
                threshold -= THRESHOLD_DELTA;
            }
        }
        threshold.clamp(FLOOR_AUTO_THRESHOLD, CEIL_AUTO_THRESHOLD)
    }

    /// Mean success rate across rules with enough samples, in [0, 1];
    /// zero when no rule qualifies.
    pub fn success_rate_avg(&mut self, rule_ids: &[&str]) -> f64 {
        let mut rates = Vec::new();
        for rule_id in rule_ids {
            if let Some(rate) = self.decayed_stats(rule_id).success_rate() {
                rates.push(rate);
            }
        }
        if rates.is_empty() {
            0.0
        } else {
            rates.iter().sum::<f64>() / rates.len() as f64
        }
    }

    /// Whether any of the rules has been reverted repeatedly on this file
    /// recently (an active streak of two or more).
    #[must_use]
    pub fn high_revert_for_file(&self, rule_ids: &[&str], file: &str) -> bool {
        rule_ids.iter().any(|rule_id| {
            self.state
                .rules
                .get(*rule_id)
                .and_then(|stats| stats.consecutive_reverts.get(file))
                .is_some_and(|streak| *streak >= 2)
        })
    }

    /// Raw stats for reporting.
    #[must_use]
    pub fn stats(&self, rule_id: &str) -> Option<&RuleStats> {
        self.state.rules.get(rule_id)
    }
}
