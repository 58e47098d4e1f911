//! Indexing layer for the ace code-health engine: source tree walking, the
//! incremental content index, the deterministic symbol map, and the
//! content-addressed detector result cache.

pub mod cache;
pub mod content_index;
pub mod repomap;
pub mod walker;

pub use cache::{CacheEntry, CacheStats, DetectorCache};
pub use content_index::{ContentIndex, FileEntry};
pub use repomap::{RepoMap, SymbolKind, SymbolRecord};
pub use walker::{IGNORE_FILE, normalize_rel_path, walk_source_files};
