//! Plan synthesis: singletons per finding, packs per recipe.
//!
//! A recipe groups related rules at a context level (file / function /
//! class). Function and class contexts key on the enclosing RepoMap symbol;
//! the line-bucket form is only a fallback when no symbol encloses the
//! finding line, and is an acknowledged approximation. A pack whose merged
//! edits overlap anywhere is discarded in favor of its member singletons,
//! so the cross-plan non-overlap invariant holds by construction.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use ace_core::error::AceResult;
use ace_core::fingerprint::sha256_hex;
use ace_core::policy::Policy;
use ace_core::types::{Edit, EditPlan, Finding, PlanKind};

use ace_index::{RepoMap, SymbolKind};

use crate::planner::{rstar_pack, rstar_single};
use crate::rules::RuleRegistry;

/// Grouping level of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeContext {
    File,
    Function,
    Class,
}

/// Related rules that are worth fixing together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRecipe {
    pub id: &'static str,
    pub rules: &'static [&'static str],
    pub context: RecipeContext,
    pub description: &'static str,
}

/// Synthesis output plus bookkeeping for the run summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisReport {
    /// Plans sorted by id.
    pub plans: Vec<EditPlan>,
    pub packs_formed: usize,
    pub packs_discarded_overlap: usize,
}

/// Context key for a finding at a recipe's grouping level.
fn context_key(finding: &Finding, context: RecipeContext, repomap: &RepoMap) -> String {
    let (kind, bucket) = match context {
        RecipeContext::File => return finding.file.clone(),
        RecipeContext::Function => (SymbolKind::Function, 50),
        RecipeContext::Class => (SymbolKind::Class, 100),
    };
    if let Some(symbol) = repomap.enclosing_symbol(&finding.file, finding.start_line, kind) {
        return format!("{}::{}", finding.file, symbol.name);
    }
    // approximate fallback when the symbol map has no enclosing declaration
    let base = (finding.start_line / bucket) * bucket;
    format!("{}::L{}-{}", finding.file, base, base + bucket)
}

fn pack_id(context_key: &str, stable_ids: &[&str]) -> String {
    let mut sorted: Vec<&str> = stable_ids.to_vec();
    sorted.sort_unstable();
    let seed = format!("{context_key}|{}", sorted.join(","));
    format!("pack-{}", &sha256_hex(seed.as_bytes())[..12])
}

/// Build singleton plans and recipe packs from the run's findings.
///
/// `sources` maps each file in the run to its current bytes; codemods plan
/// against those bytes and each finding keeps only the edits that intersect
/// its line range.
pub fn synthesize_plans(
    findings: &[Finding],
    sources: &BTreeMap<String, Vec<u8>>,
    registry: &RuleRegistry,
    recipes: &[PackRecipe],
    policy: &Policy,
    repomap: &RepoMap,
) -> AceResult<SynthesisReport> {
    // codemod output per (rule, file), planned once
    let mut planned: BTreeMap<(String, String), Vec<Edit>> = BTreeMap::new();
    for finding in findings {
        let key = (finding.rule_id.clone(), finding.file.clone());
        if planned.contains_key(&key) {
            continue;
        }
        let edits = registry
            .codemod_for(&finding.rule_id)
            .and_then(|codemod| {
                let bytes = sources.get(&finding.file)?;
                codemod.plan(&finding.file, bytes)
            })
            .unwrap_or_default();
        planned.insert(key, edits);
    }

    // singleton plan per finding that has at least one intersecting edit
    let mut singletons: BTreeMap<String, EditPlan> = BTreeMap::new();
    for finding in findings {
        let key = (finding.rule_id.clone(), finding.file.clone());
        let edits: Vec<Edit> = planned[&key]
            .iter()
            .filter(|edit| {
                edit.start_line <= finding.end_line && finding.start_line <= edit.end_line
            })
            .cloned()
            .collect();
        if edits.is_empty() {
            continue;
        }
        let mut plan = EditPlan::singleton(finding.clone(), edits)?;
        plan.estimated_risk = rstar_single(policy, finding.severity, finding.complexity);
        singletons.insert(finding.stable_id.clone(), plan);
    }

    let mut report = SynthesisReport::default();
    let mut absorbed: BTreeSet<String> = BTreeSet::new();
    let mut packs: Vec<EditPlan> = Vec::new();

    if policy.packs_enabled && policy.prefer_packs {
        let mut used: BTreeSet<&str> = BTreeSet::new();
        for recipe in recipes {
            let rule_set: BTreeSet<&str> = recipe.rules.iter().copied().collect();
            let mut groups: BTreeMap<String, Vec<&Finding>> = BTreeMap::new();
            for finding in findings {
                if !rule_set.contains(finding.rule_id.as_str())
                    || used.contains(finding.stable_id.as_str())
                {
                    continue;
                }
                groups
                    .entry(context_key(finding, recipe.context, repomap))
                    .or_default()
                    .push(finding);
            }

            for (key, members) in groups {
                if members.len() < policy.packs_min_findings {
                    continue;
                }
                let distinct_rules: BTreeSet<&str> =
                    members.iter().map(|f| f.rule_id.as_str()).collect();
                let cohesion = distinct_rules.len() as f64 / recipe.rules.len() as f64;

                let mut merged: Vec<Edit> = Vec::new();
                for member in &members {
                    if let Some(plan) = singletons.get(&member.stable_id) {
                        for edit in &plan.edits {
                            if !merged.contains(edit) {
                                merged.push(edit.clone());
                            }
                        }
                    }
                }
                if merged.is_empty() {
                    // nothing applicable; findings stay individually reported
                    continue;
                }

                let overlapping = merged
                    .iter()
                    .enumerate()
                    .any(|(i, a)| merged[i + 1..].iter().any(|b| a.overlaps(b)));
                if overlapping {
                    warn!(
                        target: "ace.packs",
                        recipe = recipe.id,
                        context = %key,
                        "pack edits overlap; falling back to singletons"
                    );
                    report.packs_discarded_overlap += 1;
                    continue;
                }

                let stable_ids: Vec<&str> =
                    members.iter().map(|f| f.stable_id.as_str()).collect();
                let severity = members.iter().map(|f| f.severity).fold(0.0, f64::max);
                let complexity = members.iter().map(|f| f.complexity).fold(0.0, f64::max);
                let mut rule_ids: Vec<String> =
                    distinct_rules.iter().map(|r| (*r).to_owned()).collect();
                rule_ids.sort();

                let plan = EditPlan {
                    id: pack_id(&key, &stable_ids),
                    findings: members.iter().map(|f| (*f).clone()).collect(),
                    edits: merged,
                    rule_ids,
                    estimated_risk: rstar_pack(policy, severity, complexity, cohesion),
                    kind: PlanKind::Pack,
                    cohesion: Some(cohesion),
                };
                debug!(
                    target: "ace.packs",
                    pack_id = %plan.id,
                    recipe = recipe.id,
                    findings = plan.findings.len(),
                    cohesion,
                    "pack formed"
                );
                for member in &members {
                    used.insert(member.stable_id.as_str());
                    absorbed.insert(member.stable_id.clone());
                }
                report.packs_formed += 1;
                packs.push(plan);
            }
        }
    }

    let mut plans: Vec<EditPlan> = singletons
        .into_iter()
        .filter(|(stable_id, _)| !absorbed.contains(stable_id))
        .map(|(_, plan)| plan)
        .collect();
    plans.extend(packs);
    plans.sort_by(|a, b| a.id.cmp(&b.id));
    report.plans = plans;
    Ok(report)
}
