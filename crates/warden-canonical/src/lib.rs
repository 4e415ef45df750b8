//! Deterministic serialization and hashing for everything Warden stores.
//!
//! Every hash in the system — audit entry hashes, binding hashes, trace
//! and snapshot digests — goes through [`canonicalize`] + [`hash_value`]
//! so the same logical value produces the same bytes in every process and
//! on every run. The canonical form is versioned; bump
//! [`CANONICAL_VERSION`] if the byte form ever changes, and record it on
//! the artifacts that embed these hashes.
//!
//! Canonical form v1:
//! - object keys sorted lexicographically at every nesting level
//! - object entries whose value is `null` are dropped (absent and null are
//!   the same logical value; array elements are never dropped)
//! - arrays keep their order
//! - no insignificant whitespace
//! - strings escaped per JSON with `\u00XX` for control characters

pub mod evidence;

pub use evidence::{EvidencePointer, FileSystemEvidenceStore};

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Version of the canonical byte form. Recorded on every audit entry.
pub const CANONICAL_VERSION: u32 = 1;

/// Version of the audit chain-hash construction. Recorded on every entry.
pub const CHAIN_HASH_VERSION: u32 = 1;

/// Errors from the canonical layer. Canonicalization itself is total;
/// these come from the evidence store.
#[derive(Error, Debug)]
pub enum CanonicalError {
    #[error("invalid evidence id {0:?}: must be a single path segment without traversal")]
    InvalidEvidenceId(String),

    #[error("evidence {0} not found")]
    EvidenceNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed evidence blob {id}: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Produce the canonical text form of a JSON value.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Lowercase-hex SHA-256 of the canonical form.
pub fn hash_value(value: &Value) -> String {
    hash_bytes(canonicalize(value).as_bytes())
}

/// Lowercase-hex SHA-256 of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Constant-time equality for hash strings.
///
/// Length is compared first (hash lengths are public); the byte
/// comparison itself does not short-circuit.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort entries ourselves: the map type may preserve insertion
            // order depending on build features.
            let mut entries: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by_key(|(k, _)| k.as_str());
            out.push('{');
            for (i, (key, entry)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(entry, out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_level() {
        let a = json!({"b": 1, "a": {"z": true, "m": [1, 2]}});
        assert_eq!(canonicalize(&a), r#"{"a":{"m":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":2,"c":{"y":1,"x":2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"c":{"x":2,"y":1},"a":2,"b":1}"#).unwrap();
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn null_object_entries_are_dropped() {
        let a = json!({"a": 1, "gone": null});
        let b = json!({"a": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn null_array_elements_are_kept() {
        let a = json!([1, null, 2]);
        assert_eq!(canonicalize(&a), "[1,null,2]");
    }

    #[test]
    fn strings_escape_control_characters() {
        let v = json!({"k": "line\nbreak\t\"quote\" \u{1}"});
        assert_eq!(
            canonicalize(&v),
            "{\"k\":\"line\\nbreak\\t\\\"quote\\\" \\u0001\"}"
        );
    }

    #[test]
    fn canonical_text_reparses_to_same_value() {
        let v = json!({"b": [1, 2.5, -3], "a": {"nested": "x"}, "flag": false});
        let text = canonicalize(&v);
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(canonicalize(&reparsed), text);
    }

    #[test]
    fn hash_is_lowercase_hex_sha256() {
        let h = hash_value(&json!({}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // SHA-256 of "{}"
        assert_eq!(
            h,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn constant_time_eq_behaves_like_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(constant_time_eq("", ""));
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z0-9_]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(depth, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn canonicalize_is_idempotent(v in arb_json(3)) {
            let once = canonicalize(&v);
            let reparsed: Value = serde_json::from_str(&once).unwrap();
            prop_assert_eq!(canonicalize(&reparsed), once);
        }

        #[test]
        fn hash_ignores_key_insertion_order(v in arb_json(3)) {
            // Round-tripping through text reorders nothing logically.
            let text = canonicalize(&v);
            let reparsed: Value = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(hash_value(&v), hash_value(&reparsed));
        }
    }
}
