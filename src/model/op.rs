//! Operation model — canonical JSON for deterministic content addressing.
//!
//! Operations are the fundamental unit of the log. Each records a single
//! semantic mutation of one file (an [`Effect`]), the symbols it reads and
//! writes, its causal parents, and optional preconditions. The operation's
//! id is derived from its canonical JSON with the `id` and acceptance
//! fields removed, so identical contents always collapse to one identity.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::hash::derive_id;
use super::symbol::{PyKind, SymbolId};
use super::types::{ConflictId, OpId, StateName};

// ---------------------------------------------------------------------------
// ShapeError
// ---------------------------------------------------------------------------

/// An operation or change set failed shape validation.
///
/// Shape errors are input errors: they are reported synchronously and never
/// mutate engine state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapeError {
    /// Human-readable description of the malformed shape.
    pub detail: String,
}

impl ShapeError {
    pub(crate) fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shape error: {}", self.detail)
    }
}

impl std::error::Error for ShapeError {}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// The primary symbol an operation addresses, plus an optional file hint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// The primary symbol.
    pub symbol_id: SymbolId,

    /// File path for effects that do not carry one (legacy `replace_body`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_hint: Option<String>,
}

impl Target {
    /// Target a symbol with no path hint.
    #[must_use]
    pub const fn symbol(symbol_id: SymbolId) -> Self {
        Self {
            symbol_id,
            path_hint: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Precondition
// ---------------------------------------------------------------------------

/// A check evaluated against the staged state before an op is accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Precondition {
    /// The target symbol must currently have a head writer.
    SymbolExists,

    /// The target symbol's current content hash must equal `value`.
    ///
    /// The classifier derives the hash from the staged file content when it
    /// can; the declared per-state hash cache is only a fallback.
    SignatureHash {
        /// Expected `hash_`-prefixed content hash.
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Effect
// ---------------------------------------------------------------------------

/// The semantic mutation an operation applies to one file.
///
/// The tagged `kind` selects the variant; `symbol_hashes` optionally
/// declares the post-effect content hash per written symbol (`null` means
/// the symbol was deleted), and `after_hash` is the legacy single-hash
/// declaration older clients send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    /// The mutation itself.
    #[serde(flatten)]
    pub kind: EffectKind,

    /// Declared post-effect hash per written symbol; `null` = deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_hashes: Option<BTreeMap<String, Option<String>>>,

    /// Legacy single post-effect hash declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_hash: Option<String>,
}

impl Effect {
    /// Wrap an [`EffectKind`] with no hash declarations.
    #[must_use]
    pub const fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            symbol_hashes: None,
            after_hash: None,
        }
    }

    /// The file path this effect addresses, if the variant carries one.
    ///
    /// Legacy `replace_body` carries none and relies on the op target's
    /// `path_hint`.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match &self.kind {
            EffectKind::UpsertFile { path, .. }
            | EffectKind::DeleteFile { path }
            | EffectKind::JsonSetKey { path, .. }
            | EffectKind::JsonDeleteKey { path, .. }
            | EffectKind::PythonReplaceSymbol { path, .. }
            | EffectKind::PythonInsertSymbol { path, .. }
            | EffectKind::PythonDeleteSymbol { path, .. } => Some(path),
            EffectKind::ReplaceBody { .. } => None,
        }
    }
}

/// The effect variants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectKind {
    /// Create or replace a whole file.
    UpsertFile { path: String, content: String },

    /// Remove a file.
    DeleteFile { path: String },

    /// Set one top-level key of a JSON object file.
    JsonSetKey {
        path: String,
        key: String,
        value: Value,
    },

    /// Delete one top-level key of a JSON object file.
    JsonDeleteKey { path: String, key: String },

    /// Replace a top-level Python `def`/`class` block.
    PythonReplaceSymbol {
        path: String,
        symbol_kind: PyKind,
        symbol_name: String,
        before_content: String,
        after_content: String,
    },

    /// Insert a new top-level Python `def`/`class` block.
    ///
    /// Anchored after `insert_after_key`, else before `insert_before_key`,
    /// else at end of file. Keys are `kind:name` parser keys.
    PythonInsertSymbol {
        path: String,
        symbol_kind: PyKind,
        symbol_name: String,
        after_content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        insert_after_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        insert_before_key: Option<String>,
    },

    /// Delete a top-level Python `def`/`class` block.
    PythonDeleteSymbol {
        path: String,
        symbol_kind: PyKind,
        symbol_name: String,
        before_content: String,
    },

    /// Legacy whole-document replacement; the file comes from the op
    /// target's `path_hint`.
    ReplaceBody { after_content: String },
}

impl EffectKind {
    /// The `kind` tag as serialized.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UpsertFile { .. } => "upsert_file",
            Self::DeleteFile { .. } => "delete_file",
            Self::JsonSetKey { .. } => "json_set_key",
            Self::JsonDeleteKey { .. } => "json_delete_key",
            Self::PythonReplaceSymbol { .. } => "python_replace_symbol",
            Self::PythonInsertSymbol { .. } => "python_insert_symbol",
            Self::PythonDeleteSymbol { .. } => "python_delete_symbol",
            Self::ReplaceBody { .. } => "replace_body",
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Free-form operation metadata.
///
/// `timestamp` is an RFC 3339 string — strings keep the canonical JSON
/// deterministic across platforms. Unknown fields are preserved in `extra`
/// (promotion records `source_state` / `source_op_id` there).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    /// Metadata with just an author.
    #[must_use]
    pub fn by(author: &str) -> Self {
        Self {
            author: Some(author.to_owned()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

fn pending_id() -> OpId {
    // Placeholder used only between deserialization and id assignment;
    // `derive_id` strips the id field, so the placeholder never leaks into
    // a hash.
    OpId::new("op_pending").unwrap_or_else(|_| unreachable!("static id is valid"))
}

/// A single operation over per-file semantic symbols.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Content-addressed id (`op_<hash>`).
    #[serde(default = "pending_id")]
    pub id: OpId,

    /// The state this op belongs to. Immutable once accepted.
    pub state: StateName,

    /// Op ids that must be ancestors; defines causal order.
    #[serde(default)]
    pub parents: Vec<OpId>,

    /// Primary symbol and file hint.
    pub target: Target,

    /// Checks evaluated before acceptance.
    #[serde(default)]
    pub preconditions: Vec<Precondition>,

    /// Symbols read by this op.
    #[serde(default)]
    pub reads: BTreeSet<SymbolId>,

    /// Symbols written by this op. Must be non-empty.
    pub writes: BTreeSet<SymbolId>,

    /// The semantic mutation.
    pub effect: Effect,

    /// Conflict ids this op supersedes on acceptance.
    #[serde(default)]
    pub resolves: Vec<ConflictId>,

    /// Author, intent, timestamp, free fields.
    #[serde(default)]
    pub metadata: Metadata,

    /// Assigned on acceptance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<String>,

    /// Monotonic acceptance order. Assigned on acceptance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_order: Option<u64>,
}

impl Operation {
    /// Normalize a raw JSON operation: fill `state` (from the enclosing
    /// change set), default the metadata timestamp, validate the shape, and
    /// assign a content-addressed id when none was provided.
    ///
    /// # Errors
    /// Returns a [`ShapeError`] if the value is not an object, fails
    /// deserialization, or violates a shape rule.
    pub fn normalize(
        value: Value,
        default_state: Option<&StateName>,
        now: &str,
    ) -> Result<Self, ShapeError> {
        let Value::Object(mut map) = value else {
            return Err(ShapeError::new("operation must be a JSON object"));
        };
        if !map.contains_key("state")
            && let Some(state) = default_state
        {
            map.insert("state".to_owned(), Value::String(state.to_string()));
        }
        let had_id = map.contains_key("id");
        let metadata = map
            .entry("metadata".to_owned())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        match metadata {
            Value::Object(meta) => {
                meta.entry("timestamp".to_owned())
                    .or_insert_with(|| Value::String(now.to_owned()));
            }
            _ => return Err(ShapeError::new("operation metadata must be an object")),
        }

        let mut op: Self = serde_json::from_value(Value::Object(map))
            .map_err(|e| ShapeError::new(format!("malformed operation: {e}")))?;
        op.validate_shape()?;
        if !had_id {
            op.id = op.computed_id()?;
        }
        Ok(op)
    }

    /// The id this op's contents hash to (independent of the stored id).
    ///
    /// # Errors
    /// Returns a [`ShapeError`] if the op cannot be serialized.
    pub fn computed_id(&self) -> Result<OpId, ShapeError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ShapeError::new(format!("cannot serialize operation: {e}")))?;
        OpId::new(&derive_id("op_", &value)).map_err(|e| ShapeError::new(e.to_string()))
    }

    /// Validate shape rules that serde cannot express.
    ///
    /// # Errors
    /// Returns a [`ShapeError`] when `writes` is empty or a legacy
    /// `replace_body` effect has no `path_hint` to address.
    pub fn validate_shape(&self) -> Result<(), ShapeError> {
        if self.writes.is_empty() {
            return Err(ShapeError::new("operation writes must be non-empty"));
        }
        if matches!(self.effect.kind, EffectKind::ReplaceBody { .. })
            && self.target.path_hint.is_none()
        {
            return Err(ShapeError::new(
                "replace_body effects require target.path_hint",
            ));
        }
        Ok(())
    }

    /// The file path this op's effect addresses (effect path, else the
    /// target's `path_hint`).
    #[must_use]
    pub fn effect_path(&self) -> Option<&str> {
        self.effect.path().or(self.target.path_hint.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
