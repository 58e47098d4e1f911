//! HTTP client hardening: requests without a timeout hang forever.

use ace_core::policy::PolicyView;
use ace_core::traits::{Codemod, Detector, DetectorManifest, EffectManifest, RuleMeta};
use ace_core::types::{Edit, EditOp, Finding};

pub const RULE_REQUEST_TIMEOUT: &str = "net.request-timeout";

const HTTP_METHODS: &[&str] = &["get", "post", "put", "delete", "patch", "head", "request"];

static RULES: &[RuleMeta] = &[RuleMeta {
    id: RULE_REQUEST_TIMEOUT,
    category: "security",
    default_severity: 0.8,
    default_complexity: 0.2,
    autofix: true,
    description: "HTTP requests without a timeout can hang indefinitely",
}];

static MANIFEST: DetectorManifest = DetectorManifest { rules: RULES };

/// Whether this line carries a `requests.<method>(...)` call with no
/// timeout argument.
fn is_unguarded_request(line: &str) -> bool {
    if line.contains("timeout=") {
        return false;
    }
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return false;
    }
    HTTP_METHODS
        .iter()
        .any(|method| line.contains(&format!("requests.{method}(")))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTimeoutDetector;

impl Detector for RequestTimeoutDetector {
    fn manifest(&self) -> &DetectorManifest {
        &MANIFEST
    }

    fn analyze(&self, file: &str, bytes: &[u8], _policy: &PolicyView) -> Vec<Finding> {
        let Ok(text) = std::str::from_utf8(bytes) else {
            return Vec::new();
        };
        let meta = &RULES[0];
        text.lines()
            .enumerate()
            .filter(|(_, line)| is_unguarded_request(line))
            .map(|(idx, line)| {
                Finding::new(
                    meta.id,
                    file,
                    idx + 1,
                    idx + 1,
                    meta.default_severity,
                    meta.default_complexity,
                    "HTTP request without timeout",
                    line.trim(),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTimeoutCodemod;

impl Codemod for RequestTimeoutCodemod {
    fn rule_id(&self) -> &'static str {
        RULE_REQUEST_TIMEOUT
    }

    fn effects(&self) -> EffectManifest {
        EffectManifest {
            structure_preserving: false,
            may_change_symbol_counts: false,
            may_remove_imports: false,
            may_change_ast: true,
        }
    }

    fn plan(&self, file: &str, bytes: &[u8]) -> Option<Vec<Edit>> {
        let text = std::str::from_utf8(bytes).ok()?;
        let mut edits = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if !is_unguarded_request(line) {
                continue;
            }
            let Some(close) = line.rfind(')') else {
                // multi-line call: leave it for manual review
                continue;
            };
            let before_close = line[..close].trim_end();
            let insertion = if before_close.ends_with('(') {
                "timeout=30"
            } else {
                ", timeout=30"
            };
            let mut fixed = String::with_capacity(line.len() + insertion.len());
            fixed.push_str(&line[..close]);
            fixed.push_str(insertion);
            fixed.push_str(&line[close..]);
            edits.push(Edit::new(file, idx + 1, idx + 1, EditOp::Replace, &fixed));
        }
        if edits.is_empty() { None } else { Some(edits) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_core::policy::Policy;
    use ace_core::types::apply_edits;

    #[test]
    fn detects_missing_timeout() {
        let policy = Policy::default();
        let findings = RequestTimeoutDetector.analyze(
            "app.py",
            b"import requests\nresp = requests.get(url)\n",
            &policy.view(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].start_line, 2);
        assert_eq!(findings[0].severity, 0.8);
    }

    #[test]
    fn ignores_calls_with_timeout() {
        let policy = Policy::default();
        let findings = RequestTimeoutDetector.analyze(
            "app.py",
            b"resp = requests.get(url, timeout=10)\n",
            &policy.view(),
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn ignores_commented_calls() {
        let policy = Policy::default();
        let findings =
            RequestTimeoutDetector.analyze("app.py", b"# requests.get(url)\n", &policy.view());
        assert!(findings.is_empty());
    }

    #[test]
    fn codemod_adds_timeout_argument() {
        let src = "a = 1\nb = 2\nresp = requests.get(url)\n";
        let edits = RequestTimeoutCodemod.plan("app.py", src.as_bytes()).unwrap();
        let fixed = apply_edits(src, &edits).unwrap();
        assert_eq!(fixed, "a = 1\nb = 2\nresp = requests.get(url, timeout=30)\n");
    }

    #[test]
    fn codemod_handles_empty_argument_list() {
        let src = "s = requests.request()\n";
        let edits = RequestTimeoutCodemod.plan("app.py", src.as_bytes()).unwrap();
        let fixed = apply_edits(src, &edits).unwrap();
        assert_eq!(fixed, "s = requests.request(timeout=30)\n");
    }

    #[test]
    fn codemod_is_idempotent() {
        let src = "resp = requests.get(url)\n";
        let edits = RequestTimeoutCodemod.plan("app.py", src.as_bytes()).unwrap();
        let fixed = apply_edits(src, &edits).unwrap();
        assert_eq!(RequestTimeoutCodemod.plan("app.py", fixed.as_bytes()), None);
    }

    #[test]
    fn codemod_skips_multiline_calls() {
        let src = "resp = requests.get(\n    url,\n)\n";
        assert_eq!(RequestTimeoutCodemod.plan("app.py", src.as_bytes()), None);
    }
}
