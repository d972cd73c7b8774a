//! State-to-state promotion.
//!
//! Promotion replays a source state's accepted ops onto a target state, in
//! order, as fresh rebased ops. Each clone is submitted as a single-op
//! change set through the normal pipeline, so the classifier, policy, and
//! bookkeeping all apply. The loop stops at the first conflict or
//! rejection.
//!
//! Determinism: a promoted op's id is derived from
//! `(source_op_id, source, target, parent_heads)`, so re-running a
//! partially applied promotion regenerates the same ids and change-set
//! idempotency short-circuits the already-committed prefix.
//!
//! `parent_heads` starts at the source's recorded fork point
//! (`base_heads`) and rolls forward over each promoted op — including ops
//! promoted by an earlier run, which are skipped but still advance the
//! rolling parent. Seeding from the fork point rather than the target's
//! current heads is what makes a diverged target surface as a semantic
//! write conflict instead of a silent overwrite.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::events::EngineEvent;
use super::Core;
use crate::error::EngineError;
use crate::model::change_set::{ChangeSet, ChangeSetStatus};
use crate::model::hash::{canonical_json, sha256_hex, HASH_LEN};
use crate::model::op::{Metadata, Operation};
use crate::model::types::{ConflictId, OpId, StateName};

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Per-source-op promotion status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoteStatus {
    /// Rebased and accepted onto the target.
    Promoted,
    /// Already promoted by an earlier run.
    Skipped,
    /// The rebased candidate produced conflicts; promotion stopped.
    Conflicted,
    /// The rebased candidate was rejected; promotion stopped.
    Rejected,
}

/// The result for one source op.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoteResult {
    pub source_op_id: OpId,
    pub status: PromoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_op_id: Option<OpId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictId>,
}

/// The response to a promotion request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoteOutcome {
    /// `true` when no op conflicted or was rejected.
    pub ok: bool,
    /// Ids of ops accepted onto the target, in order.
    pub accepted: Vec<OpId>,
    /// All conflict ids produced, sorted lexicographically.
    pub conflicts: Vec<ConflictId>,
    /// Per-source-op results in source order.
    pub results: Vec<PromoteResult>,
}

/// Deterministic id for a promoted op.
#[must_use]
pub fn promote_op_id(
    source_op_id: &OpId,
    source: &StateName,
    target: &StateName,
    parent_heads: &[OpId],
) -> OpId {
    let seed = json!({
        "source_op_id": source_op_id,
        "source": source,
        "target": target,
        "parent_heads": parent_heads,
    });
    let hash = sha256_hex(canonical_json(&seed).as_bytes(), HASH_LEN);
    OpId::new(&format!("op_promote_{hash}"))
        .unwrap_or_else(|_| unreachable!("derived id is valid"))
}

// ---------------------------------------------------------------------------
// promote
// ---------------------------------------------------------------------------

pub(super) fn promote(
    core: &mut Core,
    source: &StateName,
    target: &StateName,
    author: &str,
    now: &str,
    events: &mut Vec<EngineEvent>,
) -> Result<PromoteOutcome, EngineError> {
    if source == target {
        return Err(EngineError::BadPromotion {
            reason: format!("source and target are both '{source}'"),
        });
    }
    for name in [source, target] {
        if !core.states.contains_key(name) {
            return Err(EngineError::StateNotFound {
                name: name.to_string(),
            });
        }
    }

    // source_op_id → the op that already carried it onto the target.
    let already_promoted: std::collections::BTreeMap<String, OpId> = core
        .log
        .state_ops(target)
        .iter()
        .filter_map(|id| core.log.get(id))
        .filter_map(|op| {
            op.metadata
                .extra
                .get("source_op_id")
                .and_then(|v| v.as_str())
                .map(|src| (src.to_owned(), op.id.clone()))
        })
        .collect();

    let mut parent_heads: Vec<OpId> = core
        .states
        .get(source)
        .map(|s| s.base_heads.clone())
        .unwrap_or_default();

    let source_ops: Vec<OpId> = core.log.state_ops(source).to_vec();
    let mut results = Vec::with_capacity(source_ops.len());
    let mut accepted = Vec::new();
    let mut all_conflicts: Vec<ConflictId> = Vec::new();
    let mut ok = true;

    for source_op_id in source_ops {
        if let Some(counterpart) = already_promoted.get(source_op_id.as_str()) {
            parent_heads = vec![counterpart.clone()];
            results.push(PromoteResult {
                source_op_id,
                status: PromoteStatus::Skipped,
                promoted_op_id: Some(counterpart.clone()),
                conflicts: vec![],
            });
            continue;
        }

        let Some(source_op) = core.log.get(&source_op_id).cloned() else {
            continue;
        };
        let candidate = rebase(&source_op, source, target, &parent_heads, author, now);
        let candidate_id = candidate.id.clone();

        let change_set = single_op_change_set(target, candidate, author, now)?;
        let outcome = core.submit(&change_set, now, events)?;

        match outcome.status {
            ChangeSetStatus::Accepted => {
                parent_heads = vec![candidate_id.clone()];
                accepted.push(candidate_id.clone());
                results.push(PromoteResult {
                    source_op_id,
                    status: PromoteStatus::Promoted,
                    promoted_op_id: Some(candidate_id),
                    conflicts: vec![],
                });
            }
            ChangeSetStatus::Conflicted => {
                ok = false;
                all_conflicts.extend(outcome.conflicts.clone());
                results.push(PromoteResult {
                    source_op_id,
                    status: PromoteStatus::Conflicted,
                    promoted_op_id: Some(candidate_id),
                    conflicts: outcome.conflicts,
                });
                break;
            }
            ChangeSetStatus::Rejected => {
                ok = false;
                results.push(PromoteResult {
                    source_op_id,
                    status: PromoteStatus::Rejected,
                    promoted_op_id: Some(candidate_id),
                    conflicts: vec![],
                });
                break;
            }
        }
    }

    all_conflicts.sort();
    info!(
        source = %source,
        target = %target,
        accepted = accepted.len(),
        conflicts = all_conflicts.len(),
        ok,
        "promotion finished"
    );
    Ok(PromoteOutcome {
        ok,
        accepted,
        conflicts: all_conflicts,
        results,
    })
}

/// Clone a source op as a rebased candidate for the target state.
fn rebase(
    source_op: &Operation,
    source: &StateName,
    target: &StateName,
    parent_heads: &[OpId],
    author: &str,
    now: &str,
) -> Operation {
    let mut metadata = Metadata {
        author: Some(author.to_owned()),
        intent: Some(format!("Promote {} from {source}", source_op.id)),
        timestamp: Some(now.to_owned()),
        extra: source_op.metadata.extra.clone(),
    };
    metadata
        .extra
        .insert("source_state".to_owned(), json!(source.as_str()));
    metadata
        .extra
        .insert("source_op_id".to_owned(), json!(source_op.id.as_str()));

    Operation {
        id: promote_op_id(&source_op.id, source, target, parent_heads),
        state: target.clone(),
        parents: parent_heads.to_vec(),
        target: source_op.target.clone(),
        preconditions: source_op.preconditions.clone(),
        reads: source_op.reads.clone(),
        writes: source_op.writes.clone(),
        effect: source_op.effect.clone(),
        resolves: Vec::new(),
        metadata,
        accepted_at: None,
        canonical_order: None,
    }
}

fn single_op_change_set(
    target: &StateName,
    op: Operation,
    author: &str,
    now: &str,
) -> Result<ChangeSet, EngineError> {
    let mut change_set = ChangeSet {
        id: crate::model::types::ChangeSetId::new("cs_pending")
            .unwrap_or_else(|_| unreachable!("static id is valid")),
        state: target.clone(),
        metadata: Metadata {
            author: Some(author.to_owned()),
            intent: None,
            timestamp: Some(now.to_owned()),
            extra: std::collections::BTreeMap::new(),
        },
        ops: vec![op],
    };
    change_set.id = change_set.computed_id()?;
    Ok(change_set)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn op(s: &str) -> OpId {
        OpId::new(s).unwrap()
    }

    fn st(s: &str) -> StateName {
        StateName::new(s).unwrap()
    }

    #[test]
    fn promote_id_is_deterministic() {
        let a = promote_op_id(&op("op_src1"), &st("ws/a"), &st("main"), &[op("op_h1")]);
        let b = promote_op_id(&op("op_src1"), &st("ws/a"), &st("main"), &[op("op_h1")]);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("op_promote_"));
    }

    #[test]
    fn promote_id_varies_with_inputs() {
        let base = promote_op_id(&op("op_src1"), &st("ws/a"), &st("main"), &[op("op_h1")]);
        assert_ne!(
            base,
            promote_op_id(&op("op_src2"), &st("ws/a"), &st("main"), &[op("op_h1")])
        );
        assert_ne!(
            base,
            promote_op_id(&op("op_src1"), &st("ws/b"), &st("main"), &[op("op_h1")])
        );
        assert_ne!(
            base,
            promote_op_id(&op("op_src1"), &st("ws/a"), &st("prod"), &[op("op_h1")])
        );
        assert_ne!(
            base,
            promote_op_id(&op("op_src1"), &st("ws/a"), &st("main"), &[op("op_h2")])
        );
    }
}
