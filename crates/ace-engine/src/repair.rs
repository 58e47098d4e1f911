//! Binary-search salvage of a failing edit bundle.
//!
//! When a plan with N edits fails the guard, repair finds a maximal passing
//! subset without trying all 2^N combinations: trial subsets are applied on
//! top of the already-accepted set against the original bytes (so line
//! coordinates stay valid), the guard verifies each candidate end-to-end,
//! and failing subsets split in half and recurse. Single failing edits are
//! recorded as failed. Guard invocations stay within O(N log N), and the
//! final content is a state the guard passed end-to-end.

use tracing::{debug, info};

use ace_core::error::AceResult;
use ace_core::traits::EffectManifest;
use ace_core::types::{Edit, apply_edits};

use crate::guard::Guard;

/// Result of a salvage pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    /// Edits attempted, in stable order.
    pub attempted: Vec<Edit>,
    /// Edits that survived; the subset the final content reflects.
    pub applied: Vec<Edit>,
    /// Edits isolated as failing.
    pub failed: Vec<Edit>,
    /// Guard invocations consumed.
    pub guard_calls: usize,
    /// Content with the applied subset; equals the original text when
    /// nothing survived.
    pub final_text: String,
}

/// Salvage the largest guard-passing subset of `edits` against `before`.
pub fn salvage(
    before: &str,
    edits: &[Edit],
    guard: &Guard<'_>,
    effects: &EffectManifest,
) -> AceResult<RepairOutcome> {
    let mut ordered: Vec<Edit> = edits.to_vec();
    ordered.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then(a.end_line.cmp(&b.end_line))
    });

    let mut state = SalvageState {
        before,
        guard,
        effects,
        accepted: Vec::new(),
        failed: Vec::new(),
        guard_calls: 0,
    };

    let indices: Vec<usize> = (0..ordered.len()).collect();
    state.recurse(&ordered, &indices)?;

    let applied: Vec<Edit> = state.accepted.iter().map(|&i| ordered[i].clone()).collect();
    let failed: Vec<Edit> = state.failed.iter().map(|&i| ordered[i].clone()).collect();
    let final_text = if applied.is_empty() {
        before.to_owned()
    } else {
        apply_edits(before, &applied)?
    };

    info!(
        target: "ace.repair",
        attempted = ordered.len(),
        applied = applied.len(),
        failed = failed.len(),
        guard_calls = state.guard_calls,
        "salvage complete"
    );
    Ok(RepairOutcome {
        attempted: ordered,
        applied,
        failed,
        guard_calls: state.guard_calls,
        final_text,
    })
}

struct SalvageState<'a, 'g> {
    before: &'a str,
    guard: &'a Guard<'g>,
    effects: &'a EffectManifest,
    accepted: Vec<usize>,
    failed: Vec<usize>,
    guard_calls: usize,
}

impl SalvageState<'_, '_> {
    /// Guard the accepted set plus a trial subset against the original.
    fn trial_passes(&mut self, ordered: &[Edit], subset: &[usize]) -> AceResult<bool> {
        let mut candidate_indices: Vec<usize> = self.accepted.clone();
        candidate_indices.extend_from_slice(subset);
        let candidate_edits: Vec<Edit> = candidate_indices
            .iter()
            .map(|&i| ordered[i].clone())
            .collect();
        let candidate = apply_edits(self.before, &candidate_edits)?;
        self.guard_calls += 1;
        let outcome = self
            .guard
            .verify(self.before.as_bytes(), candidate.as_bytes(), self.effects);
        Ok(outcome.passed)
    }

    fn recurse(&mut self, ordered: &[Edit], subset: &[usize]) -> AceResult<()> {
        if subset.is_empty() {
            return Ok(());
        }
        if self.trial_passes(ordered, subset)? {
            self.accepted.extend_from_slice(subset);
            return Ok(());
        }
        if subset.len() == 1 {
            debug!(target: "ace.repair", edit_index = subset[0], "edit isolated as failing");
            self.failed.push(subset[0]);
            return Ok(());
        }
        let mid = subset.len() / 2;
        self.recurse(ordered, &subset[..mid])?;
        self.recurse(ordered, &subset[mid..])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_core::types::EditOp;
    use ace_lang::PySourceParser;

    use crate::guard::GuardMode;

    const AST_CHANGING: EffectManifest = EffectManifest {
        structure_preserving: false,
        may_change_symbol_counts: false,
        may_remove_imports: false,
        may_change_ast: true,
    };

    fn guard() -> Guard<'static> {
        Guard::new(&PySourceParser, GuardMode::Strict)
    }

    fn replace(line: usize, payload: &str) -> Edit {
        Edit::new("m.py", line, line, EditOp::Replace, payload)
    }

    #[test]
    fn all_good_edits_apply() {
        let before = "a = 1\nb = 2\nc = 3\n";
        let edits = vec![replace(1, "a = 10"), replace(3, "c = 30")];
        let outcome = salvage(before, &edits, &guard(), &AST_CHANGING).unwrap();
        assert_eq!(outcome.applied.len(), 2);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.final_text, "a = 10\nb = 2\nc = 30\n");
        assert_eq!(outcome.guard_calls, 1);
    }

    #[test]
    fn single_bad_edit_is_isolated() {
        let before = "a = 1\nb = 2\nc = 3\nd = 4\n";
        let edits = vec![
            replace(1, "a = 10"),
            replace(2, "b = call("), // breaks the parse
            replace(4, "d = 40"),
        ];
        let outcome = salvage(before, &edits, &guard(), &AST_CHANGING).unwrap();
        assert_eq!(outcome.failed, vec![replace(2, "b = call(")]);
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.final_text, "a = 10\nb = 2\nc = 3\nd = 40\n");
    }

    #[test]
    fn sole_failing_edit_leaves_original_text() {
        let before = "a = 1\n";
        let edits = vec![replace(1, "a = (")];
        let outcome = salvage(before, &edits, &guard(), &AST_CHANGING).unwrap();
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.final_text, before);
    }

    #[test]
    fn multiple_bad_edits_all_isolated() {
        let before = "a = 1\nb = 2\nc = 3\nd = 4\n";
        let edits = vec![
            replace(1, "a = ("),
            replace(2, "b = 20"),
            replace(3, "c = )"),
            replace(4, "d = 40"),
        ];
        let outcome = salvage(before, &edits, &guard(), &AST_CHANGING).unwrap();
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(outcome.final_text, "a = 1\nb = 20\nc = 3\nd = 40\n");
    }

    #[test]
    fn salvaged_state_passes_guard_end_to_end() {
        let before = "a = 1\nb = 2\nc = 3\n";
        let edits = vec![replace(1, "a = 10"), replace(2, "b = (")];
        let guard = guard();
        let outcome = salvage(before, &edits, &guard, &AST_CHANGING).unwrap();
        let verdict = guard.verify(
            before.as_bytes(),
            outcome.final_text.as_bytes(),
            &AST_CHANGING,
        );
        assert!(verdict.passed);
    }

    #[test]
    fn guard_call_budget_is_respected() {
        let before = (1..=8).map(|i| format!("v{i} = {i}\n")).collect::<String>();
        let edits: Vec<Edit> = (1..=8)
            .map(|i| {
                if i % 2 == 0 {
                    replace(i, "broken (")
                } else {
                    replace(i, &format!("v{i} = {}", i * 10))
                }
            })
            .collect();
        let outcome = salvage(&before, &edits, &guard(), &AST_CHANGING).unwrap();
        assert_eq!(outcome.failed.len(), 4);
        assert_eq!(outcome.applied.len(), 4);
        // 2 * N * log2(N) = 2 * 8 * 3 = 48
        assert!(outcome.guard_calls <= 48, "used {}", outcome.guard_calls);
    }

    #[test]
    fn attempted_is_in_stable_line_order() {
        let before = "a = 1\nb = 2\n";
        let edits = vec![replace(2, "b = 20"), replace(1, "a = 10")];
        let outcome = salvage(before, &edits, &guard(), &AST_CHANGING).unwrap();
        assert_eq!(outcome.attempted[0].start_line, 1);
        assert_eq!(outcome.attempted[1].start_line, 2);
    }
}
