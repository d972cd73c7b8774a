//! The conflict classifier.
//!
//! Evaluates one operation against a staged view of its target state and
//! returns the conflicts it would create (possibly none). Rules run in a
//! fixed order and all of them may contribute:
//!
//! 1. preconditions (`symbol_exists`, `signature_hash`);
//! 2. semantic write conflicts (symbol head not ancestor-or-self of the
//!    op's parents);
//! 3. policy conflicts (open conflicts on a state that forbids them);
//! 4. verification conflicts (the applied effect breaks a `.py` file).
//!
//! Conflict ids are assigned by the engine when the drafts are recorded;
//! the classifier itself is pure.

use std::collections::BTreeMap;

use super::index::OpLog;
use crate::adapters::Adapters;
use crate::model::conflict::ConflictType;
use crate::model::op::Operation;
use crate::model::state::State;
use crate::model::symbol::SymbolId;
use crate::model::types::OpId;

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// The staged view a change set is evaluated against.
///
/// Copied from the target state at the start of submission and advanced as
/// each op of the set is provisionally applied.
#[derive(Clone, Debug, Default)]
pub struct Staging {
    /// Staged symbol → head-op map.
    pub symbol_head: BTreeMap<SymbolId, OpId>,
    /// Staged symbol → declared-hash map.
    pub symbol_hash: BTreeMap<SymbolId, String>,
    /// Staged materialized tree.
    pub tree: BTreeMap<String, String>,
    /// Parents of ops staged earlier in the same change set, so later ops
    /// may cite them as ancestors before they reach the log.
    pub local_parents: BTreeMap<OpId, Vec<OpId>>,
    /// Whether the target state had open conflicts at staging time.
    pub has_open_conflicts: bool,
}

// ---------------------------------------------------------------------------
// ConflictDraft
// ---------------------------------------------------------------------------

/// A conflict the classifier found, before an id is assigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictDraft {
    pub conflict_type: ConflictType,
    /// Involved ops: the colliding head first (when there is one), then the
    /// new op.
    pub ops: Vec<OpId>,
    pub target: Option<String>,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

/// Run every rule against the staged view. Empty result = acceptable.
#[must_use]
pub fn classify(
    log: &OpLog,
    adapters: &Adapters,
    state: &State,
    staging: &Staging,
    op: &Operation,
) -> Vec<ConflictDraft> {
    let mut drafts = Vec::new();
    check_preconditions(adapters, staging, op, &mut drafts);
    check_semantic_writes(log, staging, op, &mut drafts);
    check_policy(state, staging, op, &mut drafts);
    check_verification(adapters, staging, op, &mut drafts);
    drafts
}

fn check_preconditions(
    adapters: &Adapters,
    staging: &Staging,
    op: &Operation,
    drafts: &mut Vec<ConflictDraft>,
) {
    use crate::model::op::Precondition;

    let target = &op.target.symbol_id;
    for precondition in &op.preconditions {
        match precondition {
            Precondition::SymbolExists => {
                if !staging.symbol_head.contains_key(target) {
                    drafts.push(ConflictDraft {
                        conflict_type: ConflictType::PreconditionFailure,
                        ops: vec![op.id.clone()],
                        target: Some(target.to_string()),
                        reason: format!(
                            "precondition symbol_exists failed: {target} has no head in '{}'",
                            op.state
                        ),
                    });
                }
            }
            Precondition::SignatureHash { value } => {
                // The hash derived from actual staged file content wins over
                // the declared-hash cache; legacy ops may never have
                // declared one.
                let resolved = adapters
                    .derived_symbol_hash(&staging.tree, target)
                    .or_else(|| staging.symbol_hash.get(target).cloned());
                if resolved.as_deref() != Some(value.as_str()) {
                    drafts.push(ConflictDraft {
                        conflict_type: ConflictType::PreconditionFailure,
                        ops: vec![op.id.clone()],
                        target: Some(target.to_string()),
                        reason: format!(
                            "precondition signature_hash failed for {target}: expected {value}, found {}",
                            resolved.as_deref().unwrap_or("none")
                        ),
                    });
                }
            }
        }
    }
}

fn check_semantic_writes(
    log: &OpLog,
    staging: &Staging,
    op: &Operation,
    drafts: &mut Vec<ConflictDraft>,
) {
    for symbol in &op.writes {
        let Some(head) = staging.symbol_head.get(symbol) else {
            continue;
        };
        if log.is_ancestor_or_self(&staging.local_parents, head, &op.parents) {
            continue;
        }
        drafts.push(ConflictDraft {
            conflict_type: ConflictType::SemanticWriteConflict,
            ops: vec![head.clone(), op.id.clone()],
            target: Some(symbol.to_string()),
            reason: format!(
                "concurrent write: {head} is the head of {symbol} and is not an ancestor of the new op"
            ),
        });
    }
}

fn check_policy(state: &State, staging: &Staging, op: &Operation, drafts: &mut Vec<ConflictDraft>) {
    if !state.policy.allow_open_conflicts && staging.has_open_conflicts {
        drafts.push(ConflictDraft {
            conflict_type: ConflictType::PolicyConflict,
            ops: vec![op.id.clone()],
            target: None,
            reason: format!(
                "state '{}' does not accept writes while conflicts are open",
                state.name
            ),
        });
    }
}

fn check_verification(
    adapters: &Adapters,
    staging: &Staging,
    op: &Operation,
    drafts: &mut Vec<ConflictDraft>,
) {
    let Some(path) = op.effect_path().map(str::to_owned) else {
        return;
    };
    if !path.ends_with(".py") {
        return;
    }

    let mut preview = staging.tree.clone();
    adapters.apply_effect(&mut preview, &op.effect, op.target.path_hint.as_deref());
    let Some(text) = preview.get(&path) else {
        // The effect removed the file; nothing left to verify.
        return;
    };

    let parse = adapters.parser().parse_top_level(text);
    if parse.parse_error {
        drafts.push(ConflictDraft {
            conflict_type: ConflictType::VerificationConflict,
            ops: vec![op.id.clone()],
            target: Some(op.target.symbol_id.to_string()),
            reason: "python adapter parse failed after applying operation".to_owned(),
        });
    } else if !parse.duplicates.is_empty() {
        drafts.push(ConflictDraft {
            conflict_type: ConflictType::VerificationConflict,
            ops: vec![op.id.clone()],
            target: Some(op.target.symbol_id.to_string()),
            reason: format!(
                "duplicate top-level symbols after applying operation: {}",
                parse.duplicates.join(", ")
            ),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
