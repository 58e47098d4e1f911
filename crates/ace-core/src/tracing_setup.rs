//! Tracing conventions for ace.
//!
//! This module fixes the target prefix, span names, and structured field
//! names used across the crate hierarchy so consumers can filter and match
//! them in subscribers, dashboards, and tests. Subscriber installation is
//! left to the embedding application; the helpers here only resolve levels.
//!
//! ```text
//! RUST_LOG=ace=debug
//! ```

use tracing::Level;

/// Target prefix used by all ace tracing spans and events.
pub const TARGET_PREFIX: &str = "ace";

/// Standard tracing span names used across the pipeline.
pub mod span_names {
    /// Root span for one engine run.
    pub const RUN: &str = "ace::run";
    /// Detection pass over the file set.
    pub const DETECT: &str = "ace::detect";
    /// Symbol map build.
    pub const REPOMAP_BUILD: &str = "ace::repomap_build";
    /// Pack synthesis.
    pub const SYNTHESIZE: &str = "ace::synthesize";
    /// Planner scoring and ordering.
    pub const PLAN: &str = "ace::plan";
    /// One plan application (journal intent through success/revert).
    pub const APPLY: &str = "ace::apply";
    /// Guard verification of one edit.
    pub const GUARD: &str = "ace::guard";
    /// Binary-search salvage of a failing plan.
    pub const REPAIR: &str = "ace::repair";
    /// Journal-driven revert of a prior run.
    pub const REVERT: &str = "ace::revert";
}

/// Standard structured field names used in tracing events.
pub mod field_names {
    pub const RUN_ID: &str = "run_id";
    pub const PLAN_ID: &str = "plan_id";
    pub const RULE_ID: &str = "rule_id";
    pub const FILE: &str = "file";
    pub const FILE_COUNT: &str = "file_count";
    pub const FINDING_COUNT: &str = "finding_count";
    pub const GUARD_LAYER: &str = "guard_layer";
    pub const DURATION_MS: &str = "duration_ms";
    pub const CACHE_HITS: &str = "cache_hits";
    pub const CACHE_MISSES: &str = "cache_misses";
    pub const DECISION: &str = "decision";
    pub const PRIORITY: &str = "priority";
}

/// Parse a log level string (case-insensitive).
///
/// Recognized values: `trace`, `debug`, `info`, `warn`, `error`.
/// Returns `None` for unrecognized strings.
#[must_use]
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Returns the recommended `tracing::Level` for the given environment.
///
/// Checks `ACE_LOG_LEVEL` first, then falls back to the provided default.
#[must_use]
pub fn level_from_env(default: Level) -> Level {
    std::env::var("ACE_LOG_LEVEL")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_prefix_is_ace() {
        assert_eq!(TARGET_PREFIX, "ace");
    }

    #[test]
    fn all_span_names_start_with_target_prefix() {
        let all_spans = [
            span_names::RUN,
            span_names::DETECT,
            span_names::REPOMAP_BUILD,
            span_names::SYNTHESIZE,
            span_names::PLAN,
            span_names::APPLY,
            span_names::GUARD,
            span_names::REPAIR,
            span_names::REVERT,
        ];
        for span in all_spans {
            assert!(
                span.starts_with(&format!("{TARGET_PREFIX}::")),
                "span {span:?} must start with \"{TARGET_PREFIX}::\"",
            );
        }
    }

    #[test]
    fn parse_level_recognizes_valid_levels() {
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("info"), Some(Level::INFO));
        assert_eq!(parse_level("warn"), Some(Level::WARN));
        assert_eq!(parse_level("error"), Some(Level::ERROR));
    }

    #[test]
    fn parse_level_case_insensitive() {
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("Info"), Some(Level::INFO));
    }

    #[test]
    fn parse_level_returns_none_for_invalid() {
        assert_eq!(parse_level("loud"), None);
        assert_eq!(parse_level(""), None);
        assert_eq!(parse_level(" info"), None);
    }

    #[test]
    fn field_names_are_non_empty() {
        let all_fields = [
            field_names::RUN_ID,
            field_names::PLAN_ID,
            field_names::RULE_ID,
            field_names::FILE,
            field_names::FILE_COUNT,
            field_names::FINDING_COUNT,
            field_names::GUARD_LAYER,
            field_names::DURATION_MS,
            field_names::CACHE_HITS,
            field_names::CACHE_MISSES,
            field_names::DECISION,
            field_names::PRIORITY,
        ];
        for field in all_fields {
            assert!(!field.is_empty());
        }
    }
}
