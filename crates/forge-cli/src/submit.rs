//! Build semantic ops from local files.
//!
//! `forge submit --file <path>` compares the local file against the
//! attached state's materialized tree and lowers the difference into
//! symbol-level ops via the adapter diff: per-key edits for JSON, per-def
//! edits for Python, whole-file upserts for documents (and for files the
//! adapters cannot diff). Deleted files become `delete_file` ops.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use forge::adapters::{Adapters, Edit, PythonEdit};
use forge::model::hash::{content_hash_text, content_hash_value};
use forge::model::op::{Effect, EffectKind};

/// One op value ready for submission.
fn op_value(state: &str, symbol: &str, parents: &[String], effect: Value) -> Value {
    json!({
        "state": state,
        "parents": parents,
        "target": {"symbol_id": symbol},
        "writes": [symbol],
        "effect": effect,
    })
}

fn effect_value(kind: EffectKind, symbol: &str, after_hash: Option<String>) -> Result<Value> {
    let mut hashes = BTreeMap::new();
    hashes.insert(symbol.to_owned(), after_hash);
    let effect = Effect {
        kind,
        symbol_hashes: Some(hashes),
        after_hash: None,
    };
    serde_json::to_value(&effect).context("encode effect")
}

/// The declared post-effect hash for one edit (`None` = symbol deleted).
fn edit_after_hash(edit: &Edit) -> Option<String> {
    match edit {
        Edit::Json(edit) => edit
            .after_exists
            .then(|| edit.after_value.as_ref().map(content_hash_value))
            .flatten(),
        Edit::Python(PythonEdit::Insert { after_content, .. } | PythonEdit::Replace { after_content, .. }) => {
            Some(content_hash_text(after_content))
        }
        Edit::Python(PythonEdit::Delete { .. }) => None,
    }
}

/// Lower the difference between the server tree and one local file into
/// op values.
///
/// # Errors
/// Fails only on unreadable local files.
pub fn ops_for_file(
    adapters: &Adapters,
    state: &str,
    parents: &[String],
    tree: &BTreeMap<String, String>,
    repo_path: &str,
    local: &Path,
) -> Result<Vec<Value>> {
    let server_text = tree.get(repo_path).map(String::as_str);
    let document_symbol = forge::model::symbol::SymbolId::document(repo_path).to_string();

    if !local.exists() {
        if server_text.is_none() {
            return Ok(vec![]);
        }
        let effect = effect_value(
            EffectKind::DeleteFile {
                path: repo_path.to_owned(),
            },
            &document_symbol,
            None,
        )?;
        return Ok(vec![op_value(state, &document_symbol, parents, effect)]);
    }

    let local_text = std::fs::read_to_string(local)
        .with_context(|| format!("read {}", local.display()))?;

    if let Some(edits) = adapters.diff(repo_path, server_text.unwrap_or(""), &local_text) {
        let mut ops = Vec::with_capacity(edits.len());
        for edit in edits {
            let symbol = edit.symbol(repo_path).to_string();
            let after_hash = edit_after_hash(&edit);
            let effect = effect_value(edit.to_effect(repo_path), &symbol, after_hash)?;
            ops.push(op_value(state, &symbol, parents, effect));
        }
        return Ok(ops);
    }

    // Document adapters (or undiffable content): whole-file upsert.
    if server_text == Some(local_text.as_str()) {
        return Ok(vec![]);
    }
    let effect = effect_value(
        EffectKind::UpsertFile {
            path: repo_path.to_owned(),
            content: local_text.clone(),
        },
        &document_symbol,
        Some(content_hash_text(&local_text)),
    )?;
    Ok(vec![op_value(state, &document_symbol, parents, effect)])
}

/// Normalize a local path into the repo-relative `/`-separated form.
#[must_use]
pub fn repo_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let trimmed = raw.strip_prefix("./").unwrap_or(raw.as_ref());
    trimmed.replace('\\', "/")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
