//! Content fingerprints and stable identities.
//!
//! All persistent identity in the engine flows through SHA-256 over raw
//! bytes: file content fingerprints, finding context hashes, plan ids,
//! baseline ids, and the ruleset hash that keys the detector cache. Nothing
//! here normalizes newlines or encodings; the canonical AST hash lives with
//! the language parser, not in this module.

use std::fmt::Write;

use sha2::{Digest, Sha256};

/// SHA-256 helper mirroring the content-hash discipline used by every store.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    #[must_use]
    pub fn hash(bytes: &[u8]) -> [u8; 32] {
        let digest = Sha256::digest(bytes);
        digest.into()
    }

    #[must_use]
    pub fn hash_hex(bytes: &[u8]) -> String {
        let digest = Self::hash(bytes);
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }

    #[must_use]
    pub fn matches(a: &[u8; 32], b: &[u8; 32]) -> bool {
        a == b
    }
}

/// SHA-256 of raw bytes as 64 lowercase hex chars.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    ContentHasher::hash_hex(bytes)
}

/// Context hash for a finding: 16 hex chars over
/// `"rule_id|file|content-slice|rationale[:100]"`.
///
/// The rationale is truncated to its first 100 bytes (at a char boundary) so
/// verbose messages cannot destabilize identity.
#[must_use]
pub fn context_hash(rule_id: &str, file: &str, content_slice: &str, rationale: &str) -> String {
    let mut rationale_cut = rationale;
    if rationale_cut.len() > 100 {
        let mut end = 100;
        while !rationale.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        rationale_cut = &rationale[..end];
    }
    let seed = format!("{rule_id}|{file}|{content_slice}|{rationale_cut}");
    let hex = sha256_hex(seed.as_bytes());
    hex[..16].to_string()
}

/// Stable identity for a finding: `"rule_id:file:start_line:context_hash"`.
///
/// Identical source and rule inputs always produce the identical stable id,
/// across runs, machines, and scheduler choices.
#[must_use]
pub fn stable_id(rule_id: &str, file: &str, start_line: usize, context_hash: &str) -> String {
    format!("{rule_id}:{file}:{start_line}:{context_hash}")
}

/// Baseline identity: 16 hex chars over
/// `"rule_id|file|start_line|end_line|context_hash"`.
#[must_use]
pub fn baseline_id(
    rule_id: &str,
    file: &str,
    start_line: usize,
    end_line: usize,
    context_hash: &str,
) -> String {
    let seed = format!("{rule_id}|{file}|{start_line}|{end_line}|{context_hash}");
    let hex = sha256_hex(seed.as_bytes());
    hex[..16].to_string()
}

/// Hash over the sorted enabled rule identifiers concatenated with the
/// engine version. Any rule set or version change invalidates cached
/// detector results.
#[must_use]
pub fn ruleset_hash(rule_ids: &[&str], engine_version: &str) -> String {
    let mut sorted: Vec<&str> = rule_ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut seed = sorted.join("\n");
    seed.push('\n');
    seed.push_str(engine_version);
    sha256_hex(seed.as_bytes())
}
