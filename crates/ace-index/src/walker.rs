//! Source tree traversal.
//!
//! Walks the project root honoring `.gitignore` plus the engine's own
//! `.aceignore` (same syntax), then filters to files the bundled parser
//! claims and the policy's path suppressions do not exclude. Output is a
//! sorted list of normalized relative paths (POSIX separators), so every
//! downstream stage sees a deterministic file set.

use std::path::Path;

use ignore::WalkBuilder;
use tracing::warn;

use ace_core::error::AceResult;
use ace_core::policy::Policy;
use ace_core::traits::LanguageParser;

/// Ignore file honored in addition to `.gitignore`.
pub const IGNORE_FILE: &str = ".aceignore";

/// Normalize a path relative to `root` into POSIX form.
#[must_use]
pub fn normalize_rel_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let text = rel.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Enumerate analyzable source files under `root`.
pub fn walk_source_files(
    root: &Path,
    policy: &Policy,
    parser: &dyn LanguageParser,
) -> AceResult<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(target: "ace.walker", error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if !parser.handles(path) {
            continue;
        }
        let rel = normalize_rel_path(root, path);
        if policy.is_path_suppressed(&rel) {
            continue;
        }
        files.push(rel);
    }

    files.sort();
    Ok(files)
}
