//! Change sets — the atomic submission unit.
//!
//! A change set bundles one or more operations targeting the same state.
//! Acceptance is all-or-nothing: either every op is accepted, or nothing is
//! and a durable record captures the per-op results and conflict ids.
//! Records make resubmission idempotent — submitting an already-recorded
//! change-set id returns the recorded outcome unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conflict::Conflict;
use super::hash::derive_id;
use super::op::{Metadata, Operation, ShapeError};
use super::types::{ChangeSetId, ConflictId, OpId, StateName};

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

fn pending_id() -> ChangeSetId {
    ChangeSetId::new("cs_pending").unwrap_or_else(|_| unreachable!("static id is valid"))
}

/// An atomic batch of operations sharing one target state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Content-addressed id (`cs_<hash>`).
    #[serde(default = "pending_id")]
    pub id: ChangeSetId,

    /// The state every op in this set targets.
    pub state: StateName,

    /// Author, message, timestamp, free fields.
    #[serde(default)]
    pub metadata: Metadata,

    /// The operations, evaluated in order.
    pub ops: Vec<Operation>,
}

impl ChangeSet {
    /// Normalize a raw JSON change set: normalize each op (filling its
    /// state from the set), default the metadata timestamp, validate the
    /// shape, and assign a content-addressed id when none was provided.
    ///
    /// # Errors
    /// Returns a [`ShapeError`] if the value or any contained op is
    /// malformed, or the set has no ops.
    pub fn normalize(value: Value, now: &str) -> Result<Self, ShapeError> {
        let Value::Object(mut map) = value else {
            return Err(ShapeError::new("change set must be a JSON object"));
        };
        let state_value = map
            .get("state")
            .cloned()
            .ok_or_else(|| ShapeError::new("change set must name a state"))?;
        let state: StateName = serde_json::from_value(state_value)
            .map_err(|e| ShapeError::new(format!("malformed change-set state: {e}")))?;

        let ops_value = map
            .remove("ops")
            .ok_or_else(|| ShapeError::new("change set must carry an 'ops' array"))?;
        let Value::Array(raw_ops) = ops_value else {
            return Err(ShapeError::new("change-set 'ops' must be an array"));
        };
        if raw_ops.is_empty() {
            return Err(ShapeError::new("change set must contain at least one op"));
        }
        let mut ops = Vec::with_capacity(raw_ops.len());
        for (i, raw) in raw_ops.into_iter().enumerate() {
            let op = Operation::normalize(raw, Some(&state), now)
                .map_err(|e| ShapeError::new(format!("op #{i}: {}", e.detail)))?;
            ops.push(op);
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
            _ => return Err(ShapeError::new("change-set metadata must be an object")),
        }
        map.insert(
            "ops".to_owned(),
            serde_json::to_value(&ops)
                .map_err(|e| ShapeError::new(format!("cannot serialize ops: {e}")))?,
        );

        let mut change_set: Self = serde_json::from_value(Value::Object(map))
            .map_err(|e| ShapeError::new(format!("malformed change set: {e}")))?;
        if !had_id {
            change_set.id = change_set.computed_id()?;
        }
        Ok(change_set)
    }

    /// Wrap bare operations in an anonymous change set (legacy `submit_ops`).
    ///
    /// # Errors
    /// Returns a [`ShapeError`] if `ops` is empty or the ops disagree on
    /// their target state.
    pub fn anonymous(ops: Vec<Value>, now: &str) -> Result<Self, ShapeError> {
        let first_state = ops
            .first()
            .and_then(|op| op.get("state"))
            .cloned()
            .ok_or_else(|| ShapeError::new("ops submission requires at least one op with a state"))?;
        let value = serde_json::json!({
            "state": first_state,
            "ops": ops,
        });
        Self::normalize(value, now)
    }

    /// The id this change set's contents hash to.
    ///
    /// # Errors
    /// Returns a [`ShapeError`] if the set cannot be serialized.
    pub fn computed_id(&self) -> Result<ChangeSetId, ShapeError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ShapeError::new(format!("cannot serialize change set: {e}")))?;
        ChangeSetId::new(&derive_id("cs_", &value)).map_err(|e| ShapeError::new(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Outcome statuses
// ---------------------------------------------------------------------------

/// Terminal status of a recorded change set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    /// Every op was accepted.
    Accepted,
    /// At least one op produced conflicts; nothing was accepted.
    Conflicted,
    /// An op failed validation; nothing was accepted.
    Rejected,
}

impl ChangeSetStatus {
    /// `true` only for full acceptance.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Per-op evaluation result inside a change set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    /// Passed the classifier (or was already in the log).
    Accepted,
    /// The classifier produced conflicts.
    Conflicted,
    /// Failed shape or state validation.
    Rejected,
    /// Not evaluated because an earlier op failed.
    Skipped,
}

/// The recorded result for one op of a change set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    /// The op's id, when normalization got far enough to know it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<OpId>,

    /// The evaluation status.
    pub status: OpStatus,

    /// `true` when the op was already present in the log.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,

    /// Conflict ids produced by this op, sorted lexicographically.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictId>,

    /// Validation detail for rejected ops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    /// An accepted result.
    #[must_use]
    pub const fn accepted(op_id: OpId, duplicate: bool) -> Self {
        Self {
            op_id: Some(op_id),
            status: OpStatus::Accepted,
            duplicate,
            conflicts: Vec::new(),
            error: None,
        }
    }

    /// A skipped result.
    #[must_use]
    pub const fn skipped(op_id: OpId) -> Self {
        Self {
            op_id: Some(op_id),
            status: OpStatus::Skipped,
            duplicate: false,
            conflicts: Vec::new(),
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeSetRecord
// ---------------------------------------------------------------------------

/// The immutable audit row persisted for every recorded change set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetRecord {
    /// The change set's id.
    pub id: ChangeSetId,

    /// Monotonic record sequence.
    pub sequence: u64,

    /// The target state.
    pub state: StateName,

    /// Terminal status.
    pub status: ChangeSetStatus,

    /// Per-op results in submission order.
    pub results: Vec<OpResult>,

    /// Ids of ops accepted into the log (empty unless `status = accepted`).
    pub accepted: Vec<OpId>,

    /// All conflict ids produced, sorted lexicographically.
    pub conflicts: Vec<ConflictId>,

    /// The change set's metadata.
    pub metadata: Metadata,

    /// RFC 3339 record time.
    pub recorded_at: String,
}

// ---------------------------------------------------------------------------
// SubmitOutcome
// ---------------------------------------------------------------------------

/// The structured response to a change-set submission.
///
/// Semantic outcomes are not errors: a conflicted submission still returns
/// this body, distinguished by `status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// `true` iff the change set was fully accepted.
    pub ok: bool,

    /// The (possibly assigned) change-set id.
    pub change_set_id: ChangeSetId,

    /// Terminal status.
    pub status: ChangeSetStatus,

    /// Accepted op ids in acceptance order.
    pub accepted: Vec<OpId>,

    /// Conflict ids, sorted lexicographically.
    pub conflicts: Vec<ConflictId>,

    /// Full conflict records for the ids above.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_details: Vec<Conflict>,

    /// Per-op results in submission order.
    pub results: Vec<OpResult>,

    /// `true` when this outcome was replayed from an existing record.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,
}

impl SubmitOutcome {
    /// Rebuild an outcome from a stored record (idempotent resubmission).
    #[must_use]
    pub fn from_record(record: &ChangeSetRecord, details: Vec<Conflict>) -> Self {
        Self {
            ok: record.status.is_accepted(),
            change_set_id: record.id.clone(),
            status: record.status,
            accepted: record.accepted.clone(),
            conflicts: record.conflicts.clone(),
            conflict_details: details,
            results: record.results.clone(),
            idempotent: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: &str = "2026-03-01T12:00:00Z";

    fn raw_change_set() -> Value {
        json!({
            "state": "main",
            "ops": [{
                "target": {"symbol_id": "sym://text/a.txt#document"},
                "writes": ["sym://text/a.txt#document"],
                "effect": {"kind": "upsert_file", "path": "a.txt", "content": "hi\n"},
            }],
        })
    }

    // -- Normalization --

    #[test]
    fn normalize_assigns_ids_and_state() {
        let cs = ChangeSet::normalize(raw_change_set(), NOW).unwrap();
        assert!(cs.id.as_str().starts_with("cs_"));
        assert_eq!(cs.ops.len(), 1);
        assert_eq!(cs.ops[0].state.as_str(), "main");
        assert!(cs.ops[0].id.as_str().starts_with("op_"));
    }

    #[test]
    fn normalize_is_deterministic() {
        let a = ChangeSet::normalize(raw_change_set(), NOW).unwrap();
        let b = ChangeSet::normalize(raw_change_set(), NOW).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.ops[0].id, b.ops[0].id);
    }

    #[test]
    fn normalize_requires_state_and_ops() {
        assert!(ChangeSet::normalize(json!({"ops": []}), NOW).is_err());
        assert!(ChangeSet::normalize(json!({"state": "main"}), NOW).is_err());
        assert!(ChangeSet::normalize(json!({"state": "main", "ops": []}), NOW).is_err());
    }

    #[test]
    fn normalize_reports_op_index_on_shape_error() {
        let mut value = raw_change_set();
        value["ops"].as_array_mut().unwrap().push(json!({
            "target": {"symbol_id": "sym://text/b.txt#document"},
            "writes": [],
            "effect": {"kind": "delete_file", "path": "b.txt"},
        }));
        let err = ChangeSet::normalize(value, NOW).unwrap_err();
        assert!(err.detail.contains("op #1"));
    }

    #[test]
    fn normalize_keeps_mismatched_op_state_for_engine_rejection() {
        // An op naming a different state must survive normalization; the
        // submission pipeline rejects it, not the shape layer.
        let mut value = raw_change_set();
        value["ops"][0]["state"] = json!("ws/other");
        let cs = ChangeSet::normalize(value, NOW).unwrap();
        assert_eq!(cs.ops[0].state.as_str(), "ws/other");
    }

    #[test]
    fn anonymous_wraps_ops() {
        let op = json!({
            "state": "main",
            "target": {"symbol_id": "sym://text/a.txt#document"},
            "writes": ["sym://text/a.txt#document"],
            "effect": {"kind": "upsert_file", "path": "a.txt", "content": "hi\n"},
        });
        let cs = ChangeSet::anonymous(vec![op], NOW).unwrap();
        assert_eq!(cs.state.as_str(), "main");
        assert_eq!(cs.ops.len(), 1);
    }

    #[test]
    fn anonymous_requires_ops() {
        assert!(ChangeSet::anonymous(vec![], NOW).is_err());
    }

    // -- Result serde --

    #[test]
    fn op_result_omits_false_duplicate() {
        let v = serde_json::to_value(OpResult::accepted(
            OpId::new("op_aaaaaaaaaaaaaaaaaaaa").unwrap(),
            false,
        ))
        .unwrap();
        assert!(v.get("duplicate").is_none());
        assert!(v.get("conflicts").is_none());

        let v = serde_json::to_value(OpResult::accepted(
            OpId::new("op_aaaaaaaaaaaaaaaaaaaa").unwrap(),
            true,
        ))
        .unwrap();
        assert_eq!(v["duplicate"], true);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(ChangeSetStatus::Conflicted).unwrap(),
            "conflicted"
        );
        assert_eq!(serde_json::to_value(OpStatus::Skipped).unwrap(), "skipped");
    }

    #[test]
    fn outcome_from_record_is_idempotent() {
        let record = ChangeSetRecord {
            id: ChangeSetId::new("cs_aaaaaaaaaaaaaaaaaaaa").unwrap(),
            sequence: 4,
            state: StateName::new("main").unwrap(),
            status: ChangeSetStatus::Conflicted,
            results: vec![],
            accepted: vec![],
            conflicts: vec![ConflictId::from_counter(2)],
            metadata: Metadata::default(),
            recorded_at: NOW.to_owned(),
        };
        let outcome = SubmitOutcome::from_record(&record, vec![]);
        assert!(!outcome.ok);
        assert!(outcome.idempotent);
        assert_eq!(outcome.conflicts, record.conflicts);
    }
}
