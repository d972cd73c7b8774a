//! Shared helpers for forge integration tests.
//!
//! Engines are built with the regex python parser so no external process
//! is involved; everything runs in memory.

use std::sync::Arc;

use serde_json::{Value, json};

use forge::adapters::Adapters;
use forge::engine::Engine;
use forge::parser::fallback::RegexParser;

/// A fresh engine with the regex parser and a bootstrapped `main`.
pub fn engine() -> Engine {
    Engine::new(Adapters::new(Arc::new(RegexParser::new())))
}

/// The adapter facade the test engine uses (for derived hashes).
pub fn adapters() -> Adapters {
    Adapters::new(Arc::new(RegexParser::new()))
}

/// A raw `upsert_file` op value for `state`.
pub fn upsert_op(state: &str, path: &str, content: &str) -> Value {
    let symbol = document_symbol(path);
    json!({
        "state": state,
        "target": {"symbol_id": symbol},
        "writes": [symbol],
        "effect": {"kind": "upsert_file", "path": path, "content": content},
    })
}

/// A raw `delete_file` op value for `state`.
pub fn delete_op(state: &str, path: &str) -> Value {
    let symbol = document_symbol(path);
    json!({
        "state": state,
        "target": {"symbol_id": symbol},
        "writes": [symbol],
        "effect": {"kind": "delete_file", "path": path},
    })
}

/// A raw `python_replace_symbol` op for `def <name>` in `path`.
pub fn py_replace_op(state: &str, path: &str, name: &str, before: &str, after: &str) -> Value {
    let symbol = format!("sym://python/{path}#def:{name}");
    json!({
        "state": state,
        "target": {"symbol_id": symbol},
        "writes": [symbol],
        "effect": {
            "kind": "python_replace_symbol",
            "path": path,
            "symbol_kind": "def",
            "symbol_name": name,
            "before_content": before,
            "after_content": after,
        },
    })
}

/// Wrap ops in a raw change-set value.
pub fn change_set(state: &str, ops: Vec<Value>) -> Value {
    json!({"state": state, "ops": ops})
}

/// The `sym://` document symbol for a path (extension-dispatched adapter).
pub fn document_symbol(path: &str) -> String {
    let adapter = match path.rsplit_once('.').map(|(_, e)| e) {
        Some("py") => "python",
        Some("json") => "json",
        Some("md" | "markdown") => "markdown",
        Some("txt") => "text",
        _ => "file",
    };
    format!("sym://{adapter}/{path}#document")
}

/// Submit a single-op change set and expect full acceptance; returns the
/// accepted op id.
pub fn submit_ok(engine: &Engine, state: &str, op: Value) -> String {
    let outcome = engine
        .submit(change_set(state, vec![op]))
        .expect("submission should not be an input error");
    assert!(
        outcome.ok,
        "expected acceptance, got {:?}: {:?}",
        outcome.status, outcome.conflict_details
    );
    outcome.accepted[0].to_string()
}
