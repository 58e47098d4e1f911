//! Detect-only quality rules: broad exception handlers, unchecked
//! subprocess invocations, print calls in library source.

use ace_core::policy::PolicyView;
use ace_core::traits::{Detector, DetectorManifest, RuleMeta};
use ace_core::types::Finding;

pub const RULE_BROAD_EXCEPT: &str = "errors.broad-except";
pub const RULE_SUBPROCESS_CHECK: &str = "process.subprocess-check";
pub const RULE_PRINT_CALL: &str = "logging.print-call";

static BROAD_EXCEPT_RULES: &[RuleMeta] = &[RuleMeta {
    id: RULE_BROAD_EXCEPT,
    category: "exceptions",
    default_severity: 0.6,
    default_complexity: 0.3,
    autofix: false,
    description: "Bare or over-broad except swallows system exits and typos alike",
}];

static BROAD_EXCEPT_MANIFEST: DetectorManifest = DetectorManifest {
    rules: BROAD_EXCEPT_RULES,
};

static SUBPROCESS_RULES: &[RuleMeta] = &[RuleMeta {
    id: RULE_SUBPROCESS_CHECK,
    category: "security",
    default_severity: 0.7,
    default_complexity: 0.2,
    autofix: false,
    description: "subprocess.run without check=True silently ignores failures",
}];

static SUBPROCESS_MANIFEST: DetectorManifest = DetectorManifest {
    rules: SUBPROCESS_RULES,
};

static PRINT_RULES: &[RuleMeta] = &[RuleMeta {
    id: RULE_PRINT_CALL,
    category: "logging",
    default_severity: 0.3,
    default_complexity: 0.1,
    autofix: false,
    description: "print in library source; route through logging instead",
}];

static PRINT_MANIFEST: DetectorManifest = DetectorManifest { rules: PRINT_RULES };

fn line_findings(
    file: &str,
    bytes: &[u8],
    meta: &RuleMeta,
    message: &str,
    matches: impl Fn(&str) -> bool,
) -> Vec<Finding> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Vec::new();
    };
    text.lines()
        .enumerate()
        .filter(|(_, line)| matches(line))
        .map(|(idx, line)| {
            Finding::new(
                meta.id,
                file,
                idx + 1,
                idx + 1,
                meta.default_severity,
                meta.default_complexity,
                message,
                line.trim(),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BroadExceptDetector;

impl Detector for BroadExceptDetector {
    fn manifest(&self) -> &DetectorManifest {
        &BROAD_EXCEPT_MANIFEST
    }

    fn analyze(&self, file: &str, bytes: &[u8], _policy: &PolicyView) -> Vec<Finding> {
        line_findings(file, bytes, &BROAD_EXCEPT_RULES[0], "Over-broad exception handler", |line| {
            let trimmed = line.trim_start();
            trimmed.starts_with("except:") || trimmed.starts_with("except Exception")
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessCheckDetector;

impl Detector for SubprocessCheckDetector {
    fn manifest(&self) -> &DetectorManifest {
        &SUBPROCESS_MANIFEST
    }

    fn analyze(&self, file: &str, bytes: &[u8], _policy: &PolicyView) -> Vec<Finding> {
        line_findings(
            file,
            bytes,
            &SUBPROCESS_RULES[0],
            "subprocess call without check=",
            |line| {
                !line.trim_start().starts_with('#')
                    && (line.contains("subprocess.run(") || line.contains("subprocess.call("))
                    && !line.contains("check=")
            },
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrintCallDetector;

impl Detector for PrintCallDetector {
    fn manifest(&self) -> &DetectorManifest {
        &PRINT_MANIFEST
    }

    fn analyze(&self, file: &str, bytes: &[u8], _policy: &PolicyView) -> Vec<Finding> {
        line_findings(file, bytes, &PRINT_RULES[0], "print call in source", |line| {
            line.trim_start().starts_with("print(")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_core::policy::Policy;

    #[test]
    fn detects_bare_and_broad_except() {
        let policy = Policy::default();
        let findings = BroadExceptDetector.analyze(
            "m.py",
            b"try:\n    x()\nexcept:\n    pass\ntry:\n    y()\nexcept Exception:\n    pass\nexcept ValueError:\n    pass\n",
            &policy.view(),
        );
        let lines: Vec<usize> = findings.iter().map(|f| f.start_line).collect();
        assert_eq!(lines, vec![3, 7]);
        assert_eq!(findings[0].severity, 0.6);
        assert_eq!(findings[0].complexity, 0.3);
    }

    #[test]
    fn detects_unchecked_subprocess() {
        let policy = Policy::default();
        let findings = SubprocessCheckDetector.analyze(
            "m.py",
            b"subprocess.run(['ls'])\nsubprocess.run(['ls'], check=True)\n",
            &policy.view(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].start_line, 1);
    }

    #[test]
    fn detects_print_at_statement_start_only() {
        let policy = Policy::default();
        let findings = PrintCallDetector.analyze(
            "m.py",
            b"print('hi')\nlogger.info('print(x) in a string')\n",
            &policy.view(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].start_line, 1);
    }
}
