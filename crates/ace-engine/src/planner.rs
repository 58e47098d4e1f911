//! Deterministic action prioritization.
//!
//! R★ combines policy-weighted severity and complexity (and cohesion for
//! packs); decision thresholds — tuned per rule by the learner — map R★ to
//! AUTO / SUGGEST / SKIP; and a priority formula orders the work:
//!
//! ```text
//! priority = 100·R★ + 20·cohesion_bonus − cost_rank − 20·revert_penalty
//!          + 5·context_boost + 10·success_rate_avg
//! ```
//!
//! Ties break lexicographically on plan id, so the order is a pure function
//! of (plans, policy, learner snapshot, repomap snapshot, fixed clock).

use std::collections::BTreeMap;
use std::fmt::Write;

use tracing::debug;

use ace_core::clock::Clock;
use ace_core::policy::{Policy, RuleMode};
use ace_core::types::{Decision, EditPlan};

use ace_index::RepoMap;

use crate::learn::Learner;

/// R★ for a single-rule plan.
#[must_use]
pub fn rstar_single(policy: &Policy, severity: f64, complexity: f64) -> f64 {
    (policy.alpha * severity + policy.beta * complexity).clamp(0.0, 1.0)
}

/// R★ for a pack: the singleton formula plus the cohesion boost.
#[must_use]
pub fn rstar_pack(policy: &Policy, severity: f64, complexity: f64, cohesion: f64) -> f64 {
    (policy.alpha * severity + policy.beta * complexity + policy.gamma * cohesion).clamp(0.0, 1.0)
}

/// One prioritized unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub plan: EditPlan,
    pub decision: Decision,
    pub priority: f64,
    /// Human-readable breakdown of the numeric contributions. Part of the
    /// public interface; stable formatting.
    pub rationale: String,
}

/// Score, decide, and order plans. The learner is borrowed mutably because
/// threshold reads apply pending decay.
pub fn plan_actions(
    plans: Vec<EditPlan>,
    policy: &Policy,
    learner: &mut Learner,
    cost_ranks: &BTreeMap<String, usize>,
    repomap: &RepoMap,
    clock: &Clock,
) -> Vec<Action> {
    let mut actions: Vec<Action> = plans
        .into_iter()
        .map(|plan| score_plan(plan, policy, learner, cost_ranks, repomap, clock))
        .collect();

    actions.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.plan.id.cmp(&b.plan.id))
    });

    debug!(target: "ace.planner", action_count = actions.len(), "actions ordered");
    actions
}

fn score_plan(
    plan: EditPlan,
    policy: &Policy,
    learner: &mut Learner,
    cost_ranks: &BTreeMap<String, usize>,
    repomap: &RepoMap,
    clock: &Clock,
) -> Action {
    let rule_ids: Vec<&str> = plan.rule_ids.iter().map(String::as_str).collect();
    let rstar = plan.estimated_risk;

    // decision: most conservative tuned threshold across the plan's rules
    let auto_threshold = rule_ids
        .iter()
        .map(|rule| learner.tuned_auto_threshold(rule, policy.auto_threshold))
        .fold(policy.auto_threshold, f64::max);
    let detect_only = rule_ids
        .iter()
        .any(|rule| policy.mode(rule) == RuleMode::DetectOnly);
    let decision = if rstar >= auto_threshold && !detect_only {
        Decision::Auto
    } else if rstar >= policy.suggest_threshold {
        Decision::Suggest
    } else {
        Decision::Skip
    };

    let base = 100.0 * rstar;

    let files = plan.files();
    let cohesion_bonus = if files.len() == 1 && plan.findings.len() >= 2 {
        20.0
    } else {
        0.0
    };

    let cost_rank = if rule_ids.is_empty() {
        0.0
    } else {
        rule_ids
            .iter()
            .map(|rule| cost_ranks.get(*rule).copied().unwrap_or(0) as f64)
            .sum::<f64>()
            / rule_ids.len() as f64
    };

    let revert_penalty = if files
        .iter()
        .any(|file| learner.high_revert_for_file(&rule_ids, file))
    {
        20.0
    } else {
        0.0
    };

    let file_list: Vec<&str> = files.into_iter().collect();
    let context_boost = 5.0 * repomap.context_boost(&file_list, clock);

    let success_bonus = 10.0 * learner.success_rate_avg(&rule_ids);

    let priority = base + cohesion_bonus - cost_rank - revert_penalty + context_boost + success_bonus;

    let mut rationale = String::new();
    let _ = write!(rationale, "R\u{2605}={rstar:.2}\u{2192}+{base:.1}");
    let _ = write!(rationale, "; cohesion +{cohesion_bonus:.0}");
    let _ = write!(rationale, "; cost \u{2212}{cost_rank:.1}");
    let _ = write!(rationale, "; reverts \u{2212}{revert_penalty:.0}");
    let _ = write!(rationale, "; context +{context_boost:.1}");
    let _ = write!(rationale, "; success +{success_bonus:.1}");
    if detect_only {
        rationale.push_str("; detect-only");
    }
    let decision_name = match decision {
        Decision::Auto => "auto",
        Decision::Suggest => "suggest",
        Decision::Skip => "skip",
    };
    let _ = write!(rationale, "; decision={decision_name}");

    Action {
        plan,
        decision,
        priority,
        rationale,
    }
}
