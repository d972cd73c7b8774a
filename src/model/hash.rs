//! Content hashing over canonical JSON.
//!
//! Every hash the engine takes — symbol content hashes, operation ids,
//! change-set ids, promotion ids — goes through one canonicalization:
//! object keys sorted by codepoint, no whitespace, strings escaped exactly
//! as `serde_json` emits them. Mismatched canonicalization between call
//! sites would silently corrupt ancestry checks, so this module is the only
//! place a digest is computed.
//!
//! Hash format: `hash_` + the first 20 lowercase hex characters of the
//! sha256 of the canonical bytes.

use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix applied to content hashes.
pub const HASH_PREFIX: &str = "hash_";

/// Number of hex characters kept from the sha256 digest.
pub const HASH_LEN: usize = 20;

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

/// Serialize a JSON value canonically: sorted object keys, no whitespace.
///
/// Strings and numbers are emitted by `serde_json`, so escaping and number
/// formatting match the standard emitter byte for byte.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => {
            // serde_json::to_string on a &str cannot fail.
            let _ = write!(out, "{}", Value::String(s.clone()));
        }
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
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String((*key).clone()));
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

/// Lowercase hex sha256 of the given bytes, truncated to `len` characters.
#[must_use]
pub fn sha256_hex(bytes: &[u8], len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for b in &digest {
        let _ = write!(hex, "{b:02x}");
    }
    hex.truncate(len);
    hex
}

/// Content hash of an arbitrary JSON value: `hash_<20-hex>`.
#[must_use]
pub fn content_hash_value(value: &Value) -> String {
    format!(
        "{HASH_PREFIX}{}",
        sha256_hex(canonical_json(value).as_bytes(), HASH_LEN)
    )
}

/// Content hash of a raw string, hashed as its canonical JSON string form.
#[must_use]
pub fn content_hash_text(text: &str) -> String {
    content_hash_value(&Value::String(text.to_owned()))
}

/// Derive a content-addressed id with the given prefix (`op_`, `cs_`, ...)
/// from a JSON value, after removing the volatile fields that are not part
/// of the identity (`id` plus acceptance bookkeeping).
#[must_use]
pub fn derive_id(prefix: &str, value: &Value) -> String {
    let mut stripped = value.clone();
    if let Value::Object(map) = &mut stripped {
        map.remove("id");
        map.remove("accepted_at");
        map.remove("canonical_order");
    }
    format!(
        "{prefix}{}",
        sha256_hex(canonical_json(&stripped).as_bytes(), HASH_LEN)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
