//! Symbol and import-dependency index.
//!
//! Parses each source file through the language plug-in and records one
//! entry per declared symbol (module, function, class) with its sorted
//! import dependencies, file mtime, and size. Serialization is deterministic
//! — sorted by `(file, line, name)`, no generation timestamp — so two builds
//! over identical bytes produce byte-identical `symbols.json` files.
//!
//! The map also feeds the planner: symbol density and file recency combine
//! into the context boost term.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ace_core::clock::Clock;
use ace_core::error::AceResult;
use ace_core::traits::{LanguageParser, NodeKind};

use ace_durability::atomic::{read_json_store, write_json_store};

/// Days after which a file no longer contributes recency signal.
const RECENCY_WINDOW_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Module,
}

/// One declared symbol or top-level module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub name: String,
    pub kind: SymbolKind,
    /// Normalized relative path.
    pub file: String,
    /// 1-based.
    pub line: usize,
    /// Sorted, deduplicated import dependencies of the enclosing file.
    pub deps: Vec<String>,
    /// File modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// File size in bytes.
    pub size: u64,
}

/// Deterministic symbol index for a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMap {
    pub symbols: Vec<SymbolRecord>,
}

impl RepoMap {
    /// Parse `files` (relative to `root`) and build the index. Files that
    /// fail to parse are skipped with a warning; they simply contribute no
    /// symbols.
    pub fn build(root: &Path, files: &[String], parser: &dyn LanguageParser) -> AceResult<Self> {
        let mut symbols = Vec::new();

        for rel in files {
            let abs = root.join(rel);
            let bytes = match fs::read(&abs) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(target: "ace.repomap", file = %rel, error = %err, "unreadable; skipped");
                    continue;
                }
            };
            let tree = match parser.parse(&bytes) {
                Ok(tree) => tree,
                Err(diag) => {
                    debug!(
                        target: "ace.repomap",
                        file = %rel,
                        line = diag.line,
                        detail = %diag.detail,
                        "parse failed; no symbols emitted"
                    );
                    continue;
                }
            };

            let meta = fs::metadata(&abs)?;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| i64::try_from(d.as_secs()).ok())
                .unwrap_or(0);
            let size = meta.len();

            let mut deps: Vec<String> = tree.imports().iter().map(|s| (*s).to_owned()).collect();
            deps.sort();
            deps.dedup();

            let module_name = rel
                .strip_suffix(".py")
                .unwrap_or(rel)
                .replace('/', ".");
            symbols.push(SymbolRecord {
                name: module_name,
                kind: SymbolKind::Module,
                file: rel.clone(),
                line: 1,
                deps: deps.clone(),
                mtime,
                size,
            });

            for node in &tree.nodes {
                let kind = match node.kind {
                    NodeKind::Function => SymbolKind::Function,
                    NodeKind::Class => SymbolKind::Class,
                    _ => continue,
                };
                let Some(name) = node.name.clone() else {
                    continue;
                };
                symbols.push(SymbolRecord {
                    name,
                    kind,
                    file: rel.clone(),
                    line: node.line,
                    deps: deps.clone(),
                    mtime,
                    size,
                });
            }
        }

        symbols.sort_by(|a, b| {
            a.file
                .cmp(&b.file)
                .then(a.line.cmp(&b.line))
                .then(a.name.cmp(&b.name))
        });
        Ok(Self { symbols })
    }

    pub fn load(path: &Path) -> AceResult<Self> {
        Ok(read_json_store(path)?.unwrap_or_default())
    }

    /// Persist deterministically. No wall-clock field is embedded: identical
    /// bytes in produce identical bytes out.
    pub fn save(&self, path: &Path) -> AceResult<()> {
        write_json_store(path, self)
    }

    #[must_use]
    pub fn file_symbols(&self, file: &str) -> Vec<&SymbolRecord> {
        self.symbols.iter().filter(|s| s.file == file).collect()
    }

    /// All indexed files, sorted and deduplicated.
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        let set: std::collections::BTreeSet<&str> =
            self.symbols.iter().map(|s| s.file.as_str()).collect();
        set.into_iter().collect()
    }

    /// The innermost function or class declared at or above `line` in
    /// `file`, used as the pack-synthesis context key.
    #[must_use]
    pub fn enclosing_symbol(&self, file: &str, line: usize, kind: SymbolKind) -> Option<&SymbolRecord> {
        self.symbols
            .iter()
            .filter(|s| s.file == file && s.kind == kind && s.line <= line)
            .max_by_key(|s| s.line)
    }

    /// Mean density/recency signal across `files`, scaled to [0, 1].
    ///
    /// Density is the file's symbol count relative to the densest file in
    /// the map; recency decays linearly over a 30-day window from the
    /// injectable clock. Deterministic for a fixed clock and map.
    #[must_use]
    pub fn context_boost(&self, files: &[&str], clock: &Clock) -> f64 {
        if files.is_empty() || self.symbols.is_empty() {
            return 0.0;
        }
        let mut per_file: BTreeMap<&str, usize> = BTreeMap::new();
        for symbol in &self.symbols {
            *per_file.entry(symbol.file.as_str()).or_default() += 1;
        }
        let densest = per_file.values().copied().max().unwrap_or(1) as f64;
        let now = clock.epoch_seconds() as f64;

        let mut total = 0.0;
        for file in files {
            let count = per_file.get(*file).copied().unwrap_or(0) as f64;
            let density = count / densest;
            let mtime = self
                .file_symbols(file)
                .first()
                .map_or(0.0, |s| s.mtime as f64);
            let age_days = ((now - mtime).max(0.0)) / 86_400.0;
            let recency = (1.0 - age_days / RECENCY_WINDOW_DAYS).clamp(0.0, 1.0);
            total += (density + recency) / 2.0;
        }
        total / files.len() as f64
    }
}
