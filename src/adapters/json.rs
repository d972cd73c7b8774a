//! JSON adapter — top-level object keys are the symbols.
//!
//! Only top-level keys of a JSON *object* file are addressable. Files that
//! do not parse as an object expose no symbols and cannot be diffed.
//! Applying an effect re-serializes the object with sorted keys, two-space
//! indent, and a trailing newline, so materialized output is byte-stable.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::model::hash::{canonical_json, content_hash_value};
use crate::model::symbol::SymbolId;

/// A single top-level key edit between two versions of a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonEdit {
    pub key: String,
    pub before_exists: bool,
    pub after_exists: bool,
    pub before_value: Option<Value>,
    pub after_value: Option<Value>,
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Map each top-level key to the content hash of its value.
///
/// Returns an empty map when the text is not a JSON object.
#[must_use]
pub fn symbol_hashes(path: &str, text: &str) -> BTreeMap<SymbolId, String> {
    let Some(map) = parse_object(text) else {
        return BTreeMap::new();
    };
    map.iter()
        .map(|(key, value)| (SymbolId::json_key(path, key), content_hash_value(value)))
        .collect()
}

/// Per-key edits between two versions, skipping keys whose canonical JSON
/// values are equal. `None` when either side is not a JSON object.
#[must_use]
pub fn diff(before: &str, after: &str) -> Option<Vec<JsonEdit>> {
    let before = parse_object(before)?;
    let after = parse_object(after)?;

    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut edits = Vec::new();
    for key in keys {
        let b = before.get(key);
        let a = after.get(key);
        let unchanged = match (b, a) {
            (Some(bv), Some(av)) => canonical_json(bv) == canonical_json(av),
            _ => false,
        };
        if unchanged {
            continue;
        }
        edits.push(JsonEdit {
            key: key.clone(),
            before_exists: b.is_some(),
            after_exists: a.is_some(),
            before_value: b.cloned(),
            after_value: a.cloned(),
        });
    }
    Some(edits)
}

/// Render an object with sorted keys, two-space indent, trailing newline.
fn render(map: &Map<String, Value>) -> String {
    // serde_json maps iterate in sorted key order; pretty printing uses
    // two-space indentation. Serializing a Value cannot fail.
    let body = serde_json::to_string_pretty(&Value::Object(map.clone()))
        .unwrap_or_else(|_| "{}".to_owned());
    format!("{body}\n")
}

/// Set one top-level key. Total: unparseable non-empty input is returned
/// unchanged; empty input starts from an empty object.
#[must_use]
pub fn set_key(current: &str, key: &str, value: &Value) -> String {
    let mut map = if current.trim().is_empty() {
        Map::new()
    } else {
        match parse_object(current) {
            Some(map) => map,
            None => return current.to_owned(),
        }
    };
    map.insert(key.to_owned(), value.clone());
    render(&map)
}

/// Delete one top-level key. Total: unparseable input is returned
/// unchanged, as is a delete of an absent key (modulo re-rendering).
#[must_use]
pub fn delete_key(current: &str, key: &str) -> String {
    let Some(mut map) = parse_object(current) else {
        return current.to_owned();
    };
    map.remove(key);
    render(&map)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
