//! Detection orchestrator.
//!
//! Farms detectors over the file set with a worker pool fed through bounded
//! channels; each worker consumes one file at a time and pushes results to
//! the collector. The only shared mutable state is the lock-protected
//! cache. After collection, findings are sorted by
//! `(file, start_line, end_line, rule_id, context_hash)`, deduplicated, and
//! assigned dense run ids — so one worker and N workers produce
//! byte-identical output.
//!
//! Cancellation is a single atomic flag checked between files; a cancelled
//! run returns what was collected with `partial = true`. A file whose
//! detector exceeds its declared soft timeout is dropped from the run with
//! a timeout event, not a failure.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use ace_core::clock::Clock;
use ace_core::error::AceResult;
use ace_core::fingerprint::{ruleset_hash, sha256_hex};
use ace_core::policy::Policy;
use ace_core::suppressions::FileSuppressions;
use ace_core::traits::LanguageParser;
use ace_core::types::Finding;
use ace_core::{ENGINE_VERSION, INTERNAL_PARSE_RULE};

use ace_index::DetectorCache;

use crate::rules::RuleRegistry;
use crate::telemetry::Telemetry;

/// Severity assigned to `internal.parse` findings.
const PARSE_FINDING_SEVERITY: f64 = 0.1;

/// Result of one detection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionReport {
    /// Sorted, deduplicated, with dense run ids assigned.
    pub findings: Vec<Finding>,
    /// True when the run was cancelled before all files were analyzed.
    pub partial: bool,
    pub files_analyzed: usize,
    /// Content hash per analyzed file; feeds the skiplist and apply loop.
    pub file_hashes: BTreeMap<String, String>,
    /// `(file, reason)` pairs dropped from the run (read errors, timeouts).
    pub dropped: Vec<(String, String)>,
}

struct FileResult {
    file: String,
    sha: Option<String>,
    findings: Vec<Finding>,
    dropped: Option<String>,
}

/// Run all registered detectors over `files` with `jobs` worker threads.
#[allow(clippy::too_many_arguments)]
pub fn run_detection(
    root: &Path,
    files: &[String],
    registry: &RuleRegistry,
    parser: &dyn LanguageParser,
    policy: &Policy,
    cache: Option<&DetectorCache>,
    telemetry: Option<&Telemetry>,
    clock: &Clock,
    cancel: &AtomicBool,
    jobs: usize,
) -> AceResult<DetectionReport> {
    let jobs = jobs.max(1);
    let rule_ids = registry.rule_ids();
    let rules_hash = ruleset_hash(&rule_ids, ENGINE_VERSION);

    let (job_tx, job_rx) = bounded::<String>(jobs * 2);
    let (result_tx, result_rx) = bounded::<FileResult>(256);

    let mut results: Vec<FileResult> = Vec::with_capacity(files.len());

    std::thread::scope(|scope| {
        for _ in 0..jobs {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let rules_hash = &rules_hash;
            scope.spawn(move || {
                while let Ok(file) = job_rx.recv() {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let result = analyze_file(
                        root, &file, registry, parser, policy, cache, telemetry, clock,
                        rules_hash,
                    );
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        drop(job_rx);

        let feeder = scope.spawn(move || {
            for file in files {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                if job_tx.send(file.clone()).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        while let Ok(result) = result_rx.recv() {
            results.push(result);
        }
        let _ = feeder.join();
    });

    let mut report = DetectionReport {
        partial: cancel.load(Ordering::Relaxed),
        ..DetectionReport::default()
    };

    let mut findings: Vec<Finding> = Vec::new();
    for result in results {
        match result.dropped {
            Some(reason) => report.dropped.push((result.file, reason)),
            None => {
                report.files_analyzed += 1;
                if let Some(sha) = result.sha {
                    report.file_hashes.insert(result.file, sha);
                }
                findings.extend(result.findings);
            }
        }
    }
    report.dropped.sort();

    findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    findings.dedup_by(|a, b| a.sort_key() == b.sort_key());
    for (run_id, finding) in findings.iter_mut().enumerate() {
        finding.run_id = run_id;
    }
    report.findings = findings;

    info!(
        target: "ace.kernel",
        files = report.files_analyzed,
        finding_count = report.findings.len(),
        dropped = report.dropped.len(),
        partial = report.partial,
        "detection pass complete"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn analyze_file(
    root: &Path,
    file: &str,
    registry: &RuleRegistry,
    parser: &dyn LanguageParser,
    policy: &Policy,
    cache: Option<&DetectorCache>,
    telemetry: Option<&Telemetry>,
    clock: &Clock,
    rules_hash: &str,
) -> FileResult {
    let abs = root.join(file);
    let bytes = match fs::read(&abs) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(target: "ace.kernel", file, error = %err, "unreadable; dropped from run");
            return FileResult {
                file: file.to_owned(),
                sha: None,
                findings: Vec::new(),
                dropped: Some(format!("read error: {err}")),
            };
        }
    };
    let sha = sha256_hex(&bytes);

    if let Some(cache) = cache {
        if let Ok(Some(cached)) =
            cache.lookup(file, &sha, rules_hash, ENGINE_VERSION, clock.epoch_seconds())
        {
            debug!(target: "ace.kernel", file, "cache hit");
            let findings = apply_policy_suppressions(cached, policy);
            return FileResult {
                file: file.to_owned(),
                sha: Some(sha),
                findings,
                dropped: None,
            };
        }
    }

    let mut findings: Vec<Finding> = Vec::new();
    match parser.parse(&bytes) {
        Ok(_) => {
            for detector in registry.detectors() {
                let started = Instant::now();
                let mut emitted = detector.analyze(file, &bytes, &policy.view());
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

                if let Some(limit) = detector.soft_timeout_ms() {
                    if elapsed_ms > limit as f64 {
                        warn!(target: "ace.kernel", file, elapsed_ms, "detector soft timeout; file dropped");
                        return FileResult {
                            file: file.to_owned(),
                            sha: Some(sha),
                            findings: Vec::new(),
                            dropped: Some("timeout".to_owned()),
                        };
                    }
                }
                if let Some(telemetry) = telemetry {
                    for rule in detector.manifest().rules {
                        telemetry.record(rule.id, elapsed_ms, 1, true, false, clock);
                    }
                }
                findings.append(&mut emitted);
            }

            let text = String::from_utf8_lossy(&bytes);
            let suppressions = FileSuppressions::parse(&text);
            findings = suppressions.filter(findings);
        }
        Err(diag) => {
            debug!(target: "ace.kernel", file, line = diag.line, "parse failed; emitting internal finding");
            findings.push(Finding::new(
                INTERNAL_PARSE_RULE,
                file,
                diag.line.max(1),
                diag.line.max(1),
                PARSE_FINDING_SEVERITY,
                0.0,
                &format!("file skipped: {}", diag.detail),
                "",
            ));
        }
    }

    if let Some(cache) = cache {
        let _ = cache.insert(
            file,
            &sha,
            rules_hash,
            ENGINE_VERSION,
            clock.epoch_seconds(),
            findings.clone(),
        );
    }

    let findings = apply_policy_suppressions(findings, policy);
    FileResult {
        file: file.to_owned(),
        sha: Some(sha),
        findings,
        dropped: None,
    }
}

/// Policy glob suppressions are applied after the cache: they depend on the
/// policy file, not on the cached content, so cached entries stay valid
/// across policy edits.
fn apply_policy_suppressions(findings: Vec<Finding>, policy: &Policy) -> Vec<Finding> {
    findings
        .into_iter()
        .filter(|f| !policy.is_suppressed(&f.file, &f.rule_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_lang::PySourceParser;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn detect(root: &Path, files: &[String], jobs: usize) -> DetectionReport {
        let registry = RuleRegistry::builtin();
        let cancel = AtomicBool::new(false);
        run_detection(
            root,
            files,
            &registry,
            &PySourceParser,
            &Policy::default(),
            None,
            None,
            &Clock::Fixed(1_000),
            &cancel,
            jobs,
        )
        .unwrap()
    }

    #[test]
    fn findings_are_sorted_with_dense_run_ids() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.py", "resp = requests.get(url)\n");
        write(dir.path(), "a.py", "print('hi')  \n");
        let files = vec!["a.py".to_owned(), "b.py".to_owned()];

        let report = detect(dir.path(), &files, 2);
        assert!(!report.findings.is_empty());
        for window in report.findings.windows(2) {
            assert!(window[0].sort_key() <= window[1].sort_key());
        }
        let run_ids: Vec<usize> = report.findings.iter().map(|f| f.run_id).collect();
        let expected: Vec<usize> = (0..report.findings.len()).collect();
        assert_eq!(run_ids, expected);
    }

    #[test]
    fn one_worker_equals_many_workers() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "resp = requests.get(url)\nprint('x')\n");
        write(dir.path(), "b.py", "import os\n\nvalue = 1  \n");
        write(dir.path(), "c.py", "subprocess.run(['ls'])\n");
        let files = vec!["a.py".to_owned(), "b.py".to_owned(), "c.py".to_owned()];

        let serial = detect(dir.path(), &files, 1);
        let parallel = detect(dir.path(), &files, 8);
        assert_eq!(serial.findings, parallel.findings);
        assert_eq!(serial.file_hashes, parallel.file_hashes);
    }

    #[test]
    fn parse_failure_emits_internal_finding() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.py", "def broken(\n");
        let report = detect(dir.path(), &["bad.py".to_owned()], 1);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].rule_id, INTERNAL_PARSE_RULE);
        assert_eq!(report.findings[0].severity, PARSE_FINDING_SEVERITY);
    }

    #[test]
    fn in_source_suppression_filters_findings() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.py",
            "resp = requests.get(url)  # ace:disable=net.request-timeout\n",
        );
        let report = detect(dir.path(), &["a.py".to_owned()], 1);
        assert!(report.findings.iter().all(|f| f.rule_id != "net.request-timeout"));
    }

    #[test]
    fn cancelled_run_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "x = 1\n");
        let registry = RuleRegistry::builtin();
        let cancel = AtomicBool::new(true);
        let report = run_detection(
            dir.path(),
            &["a.py".to_owned()],
            &registry,
            &PySourceParser,
            &Policy::default(),
            None,
            None,
            &Clock::Fixed(1_000),
            &cancel,
            2,
        )
        .unwrap();
        assert!(report.partial);
    }

    #[test]
    fn cache_transparency_cold_off_warm() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "resp = requests.get(url)\nprint('x')  \n");
        let files = vec!["a.py".to_owned()];
        let registry = RuleRegistry::builtin();
        let clock = Clock::Fixed(1_000);

        let run = |cache: Option<&DetectorCache>| {
            let cancel = AtomicBool::new(false);
            run_detection(
                dir.path(),
                &files,
                &registry,
                &PySourceParser,
                &Policy::default(),
                cache,
                None,
                &clock,
                &cancel,
                1,
            )
            .unwrap()
        };

        let off = run(None);
        let cache = DetectorCache::new(None);
        let cold = run(Some(&cache));
        let warm = run(Some(&cache));

        assert_eq!(off.findings, cold.findings);
        assert_eq!(cold.findings, warm.findings);
        assert!(cache.stats().hits >= 1);
    }

    #[test]
    fn unreadable_file_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "x = 1\n");
        let files = vec!["a.py".to_owned(), "missing.py".to_owned()];
        let report = detect(dir.path(), &files, 1);
        assert_eq!(report.files_analyzed, 1);
        assert_eq!(report.dropped.len(), 1);
        assert!(report.dropped[0].1.starts_with("read error"));
    }
}
