//! Deterministic JSON serialization for persisted stores.
//!
//! Every JSON file the engine writes (symbol map, skiplist, learner state,
//! content index, receipts, baselines, cache) must be byte-identical for
//! identical logical content. Serialization is routed through
//! `serde_json::Value`, whose map type keeps keys in codepoint order, so
//! struct field declaration order never leaks into the output. Output is
//! UTF-8, 2-space indented when pretty, with a trailing newline.

use serde::Serialize;

use crate::error::{AceError, AceResult};

/// Serialize a value to canonical JSON bytes.
///
/// `pretty` selects 2-space indentation; compact form has no insignificant
/// whitespace. Both forms sort object keys in codepoint order and end with a
/// single trailing newline.
pub fn canonical_json_bytes<T: Serialize>(value: &T, pretty: bool) -> AceResult<Vec<u8>> {
    let tree = serde_json::to_value(value)
        .map_err(|source| AceError::subsystem("canonical-json", source))?;
    let mut bytes = if pretty {
        serde_json::to_vec_pretty(&tree)
    } else {
        serde_json::to_vec(&tree)
    }
    .map_err(|source| AceError::subsystem("canonical-json", source))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Serialize a value to a single canonical JSON line (no trailing newline),
/// as used for journal and telemetry JSONL streams.
pub fn canonical_json_line<T: Serialize>(value: &T) -> AceResult<String> {
    let tree = serde_json::to_value(value)
        .map_err(|source| AceError::subsystem("canonical-json", source))?;
    serde_json::to_string(&tree).map_err(|source| AceError::subsystem("canonical-json", source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Unordered {
        zebra: u32,
        alpha: u32,
        mango: u32,
    }

    #[test]
    fn keys_sort_in_codepoint_order() {
        let value = Unordered {
            zebra: 1,
            alpha: 2,
            mango: 3,
        };
        let line = canonical_json_line(&value).unwrap();
        assert_eq!(line, r#"{"alpha":2,"mango":3,"zebra":1}"#);
    }

    #[test]
    fn pretty_output_uses_two_space_indent_and_trailing_newline() {
        let value = Unordered {
            zebra: 1,
            alpha: 2,
            mango: 3,
        };
        let bytes = canonical_json_bytes(&value, true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("{\n  \"alpha\": 2"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn compact_output_has_no_insignificant_whitespace() {
        let value = Unordered {
            zebra: 1,
            alpha: 2,
            mango: 3,
        };
        let bytes = canonical_json_bytes(&value, false).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "{\"alpha\":2,\"mango\":3,\"zebra\":1}\n");
    }

    #[test]
    fn identical_values_serialize_identically() {
        let a = canonical_json_bytes(
            &Unordered {
                zebra: 9,
                alpha: 9,
                mango: 9,
            },
            true,
        )
        .unwrap();
        let b = canonical_json_bytes(
            &Unordered {
                zebra: 9,
                alpha: 9,
                mango: 9,
            },
            true,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn arrays_preserve_emitter_order() {
        let value = vec!["z", "a", "m"];
        let line = canonical_json_line(&value).unwrap();
        assert_eq!(line, r#"["z","a","m"]"#);
    }
}
