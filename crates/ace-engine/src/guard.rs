//! Multi-layer edit verification.
//!
//! Stateless and disk-free: given before bytes, after bytes, and the union
//! of the plan's declared effects, run the layers in order — parse,
//! structural equivalence, symbol counts, AST hash, roundtrip, import
//! preservation. Strict mode fails the edit on any violation; lenient mode
//! downgrades structural equivalence, symbol counts, and import
//! preservation to warnings. Parse, AST hash, and roundtrip are hard in
//! both modes.

use tracing::{debug, warn};

use ace_core::traits::{EffectManifest, EmissionFidelity, LanguageParser};
use ace_core::types::GuardLayer;

/// Verification strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardMode {
    #[default]
    Strict,
    Lenient,
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub passed: bool,
    pub failed_layer: Option<GuardLayer>,
    /// Evidence from the failing layer.
    pub evidence: Vec<String>,
    /// Violations downgraded by lenient mode.
    pub warnings: Vec<String>,
    /// A before-parse failure: do not apply, but do not count it against
    /// the rule either.
    pub skip: bool,
}

impl GuardOutcome {
    fn pass(warnings: Vec<String>) -> Self {
        Self {
            passed: true,
            failed_layer: None,
            evidence: Vec::new(),
            warnings,
            skip: false,
        }
    }

    fn fail(layer: GuardLayer, evidence: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            passed: false,
            failed_layer: Some(layer),
            evidence,
            warnings,
            skip: false,
        }
    }
}

/// The verifier. Holds only the parser seam and the mode.
pub struct Guard<'a> {
    parser: &'a dyn LanguageParser,
    mode: GuardMode,
}

impl<'a> Guard<'a> {
    #[must_use]
    pub fn new(parser: &'a dyn LanguageParser, mode: GuardMode) -> Self {
        Self { parser, mode }
    }

    #[must_use]
    pub fn mode(&self) -> GuardMode {
        self.mode
    }

    /// Run all layers over one candidate edit.
    #[must_use]
    pub fn verify(&self, before: &[u8], after: &[u8], effects: &EffectManifest) -> GuardOutcome {
        let mut warnings = Vec::new();

        // layer 1: parse
        let before_tree = match self.parser.parse(before) {
            Ok(tree) => tree,
            Err(diag) => {
                debug!(target: "ace.guard", line = diag.line, "before bytes do not parse; skipping edit");
                let mut outcome = GuardOutcome::fail(
                    GuardLayer::Parse,
                    vec![format!("before bytes do not parse: line {}: {}", diag.line, diag.detail)],
                    warnings,
                );
                outcome.skip = true;
                return outcome;
            }
        };
        let after_tree = match self.parser.parse(after) {
            Ok(tree) => tree,
            Err(diag) => {
                return GuardOutcome::fail(
                    GuardLayer::Parse,
                    vec![format!("after bytes do not parse: line {}: {}", diag.line, diag.detail)],
                    warnings,
                );
            }
        };

        let before_hash = self.parser.canonical_hash(&before_tree);
        let after_hash = self.parser.canonical_hash(&after_tree);

        // layer 2: structural equivalence, only for structure-preserving plans
        if effects.structure_preserving && before_hash != after_hash {
            let evidence = "structure-preserving rule changed the canonical tree".to_owned();
            if self.mode == GuardMode::Strict {
                return GuardOutcome::fail(
                    GuardLayer::StructuralEquivalence,
                    vec![evidence],
                    warnings,
                );
            }
            warn!(target: "ace.guard", "structural equivalence violated (lenient)");
            warnings.push(evidence);
        }

        // layer 3: symbol counts
        let before_counts = self.parser.count_symbols(&before_tree);
        let after_counts = self.parser.count_symbols(&after_tree);
        if before_counts != after_counts && !effects.may_change_symbol_counts {
            let evidence = format!(
                "symbol counts changed: functions {}->{}, classes {}->{}, imports {}->{}",
                before_counts.functions,
                after_counts.functions,
                before_counts.classes,
                after_counts.classes,
                before_counts.imports,
                after_counts.imports,
            );
            if self.mode == GuardMode::Strict {
                return GuardOutcome::fail(GuardLayer::SymbolCounts, vec![evidence], warnings);
            }
            warn!(target: "ace.guard", "symbol count change tolerated (lenient)");
            warnings.push(evidence);
        }

        // layer 4: AST hash, hard in both modes
        let ast_change_permitted = effects.may_change_ast
            || effects.may_change_symbol_counts
            || effects.may_remove_imports;
        if before_hash != after_hash && !ast_change_permitted {
            return GuardOutcome::fail(
                GuardLayer::AstHash,
                vec!["canonical tree hash changed without a declared effect".to_owned()],
                warnings,
            );
        }

        // layer 5: roundtrip, hard in both modes
        let reemitted = self.parser.reemit(&after_tree);
        match self.parser.parse(&reemitted) {
            Ok(reparsed) => {
                let stable = match self.parser.emission_fidelity() {
                    EmissionFidelity::ByteIdentical => reemitted == after,
                    EmissionFidelity::TreeEquivalent => {
                        self.parser.canonical_hash(&reparsed) == after_hash
                    }
                };
                if !stable {
                    return GuardOutcome::fail(
                        GuardLayer::Roundtrip,
                        vec!["re-emitted bytes do not reproduce the edited content".to_owned()],
                        warnings,
                    );
                }
            }
            Err(diag) => {
                return GuardOutcome::fail(
                    GuardLayer::Roundtrip,
                    vec![format!("re-emitted bytes do not re-parse: line {}: {}", diag.line, diag.detail)],
                    warnings,
                );
            }
        }

        // layer 6: import preservation
        let after_imports = after_tree.imports();
        let missing: Vec<&str> = before_tree
            .imports()
            .into_iter()
            .filter(|import| !after_imports.contains(import))
            .collect();
        if !missing.is_empty() && !effects.may_remove_imports {
            let evidence = format!("imports removed without declaration: {}", missing.join(", "));
            if self.mode == GuardMode::Strict {
                return GuardOutcome::fail(GuardLayer::ImportPreservation, vec![evidence], warnings);
            }
            warn!(target: "ace.guard", "import removal tolerated (lenient)");
            warnings.push(evidence);
        }

        GuardOutcome::pass(warnings)
    }
}
