//! Bundled language parser plug-in for the ace code-health engine.
//!
//! One implementation ships with the engine: a Python source model
//! ([`PySourceParser`]) that satisfies the `LanguageParser` seam — parse,
//! byte-identical re-emission, canonical hashing, and symbol counts. Richer
//! parsers plug in through the same trait without touching the core.

pub mod pysource;

pub use pysource::PySourceParser;
