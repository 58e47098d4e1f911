//! Built-in rule set: registry, catalog, and pack recipes.
//!
//! The registry is the dynamic-dispatch seam between the kernel and the
//! rule implementations: detectors and codemods are trait objects keyed by
//! rule id, each carrying a static capability manifest the guard consults.
//! Out-of-tree rules register through the same constructor the built-ins
//! use.

pub mod imports;
pub mod net;
pub mod quality;
pub mod style;

use std::collections::BTreeMap;

use ace_core::traits::{Codemod, Detector, EffectManifest, RuleMeta};

use crate::packs::{PackRecipe, RecipeContext};

pub use imports::{DeadImportCodemod, DeadImportDetector, RULE_DEAD_IMPORT};
pub use net::{RULE_REQUEST_TIMEOUT, RequestTimeoutCodemod, RequestTimeoutDetector};
pub use quality::{
    BroadExceptDetector, PrintCallDetector, RULE_BROAD_EXCEPT, RULE_PRINT_CALL,
    RULE_SUBPROCESS_CHECK, SubprocessCheckDetector,
};
pub use style::{
    EofNewlineCodemod, EofNewlineDetector, RULE_EOF_NEWLINE, RULE_TRAILING_WHITESPACE,
    TrailingWhitespaceCodemod, TrailingWhitespaceDetector,
};

/// Detector and codemod registry with capability manifests.
pub struct RuleRegistry {
    detectors: Vec<Box<dyn Detector>>,
    codemods: BTreeMap<&'static str, Box<dyn Codemod>>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rule_ids())
            .finish()
    }
}

impl RuleRegistry {
    /// Registry over explicit detector and codemod sets.
    #[must_use]
    pub fn new(detectors: Vec<Box<dyn Detector>>, codemods: Vec<Box<dyn Codemod>>) -> Self {
        let codemods = codemods
            .into_iter()
            .map(|codemod| (codemod.rule_id(), codemod))
            .collect();
        Self {
            detectors,
            codemods,
        }
    }

    /// The bundled rule set.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(
            vec![
                Box::new(RequestTimeoutDetector),
                Box::new(DeadImportDetector),
                Box::new(BroadExceptDetector),
                Box::new(SubprocessCheckDetector),
                Box::new(PrintCallDetector),
                Box::new(TrailingWhitespaceDetector),
                Box::new(EofNewlineDetector),
            ],
            vec![
                Box::new(RequestTimeoutCodemod),
                Box::new(DeadImportCodemod),
                Box::new(TrailingWhitespaceCodemod),
                Box::new(EofNewlineCodemod),
            ],
        )
    }

    #[must_use]
    pub fn detectors(&self) -> &[Box<dyn Detector>] {
        &self.detectors
    }

    #[must_use]
    pub fn codemod_for(&self, rule_id: &str) -> Option<&dyn Codemod> {
        self.codemods.get(rule_id).map(AsRef::as_ref)
    }

    /// All rule ids the registry can emit, sorted and deduplicated. Feeds
    /// the ruleset hash.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self
            .detectors
            .iter()
            .flat_map(|d| d.manifest().rule_ids())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Metadata for one rule, if any detector declares it.
    #[must_use]
    pub fn rule_meta(&self, rule_id: &str) -> Option<&RuleMeta> {
        self.detectors
            .iter()
            .find_map(|d| d.manifest().rule(rule_id))
    }

    /// Catalog of all declared rules, sorted by id.
    #[must_use]
    pub fn catalog(&self) -> Vec<&RuleMeta> {
        let mut rules: Vec<&RuleMeta> = self
            .detectors
            .iter()
            .flat_map(|d| d.manifest().rules.iter())
            .collect();
        rules.sort_by(|a, b| a.id.cmp(b.id));
        rules.dedup_by(|a, b| a.id == b.id);
        rules
    }

    /// Union of declared effects across a plan's rules. Rules without a
    /// codemod contribute no edits and therefore no permissions.
    #[must_use]
    pub fn effects_for(&self, rule_ids: &[String]) -> EffectManifest {
        let mut manifests = rule_ids
            .iter()
            .filter_map(|rule_id| self.codemod_for(rule_id))
            .map(Codemod::effects);
        let Some(first) = manifests.next() else {
            return EffectManifest::default();
        };
        manifests.fold(first, EffectManifest::union)
    }
}

/// Built-in pack recipes over the bundled rules.
#[must_use]
pub fn builtin_recipes() -> &'static [PackRecipe] {
    static RECIPES: &[PackRecipe] = &[
        PackRecipe {
            id: "net-safety",
            rules: &[RULE_REQUEST_TIMEOUT, RULE_BROAD_EXCEPT, RULE_SUBPROCESS_CHECK],
            context: RecipeContext::Function,
            description: "Network and subprocess hardening around one function",
        },
        PackRecipe {
            id: "hygiene",
            rules: &[RULE_TRAILING_WHITESPACE, RULE_EOF_NEWLINE, RULE_PRINT_CALL],
            context: RecipeContext::File,
            description: "Whitespace and logging hygiene per file",
        },
    ];
    RECIPES
}
