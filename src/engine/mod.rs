//! The Forge engine — single-writer core over the op log, state index,
//! conflict table, and change-set log.
//!
//! All mutating operations (submit, promote, resolve, create-state)
//! serialize on one lock around [`Core`]; readers take the same lock
//! briefly and see a consistent snapshot. Outcomes are as if operations
//! executed one at a time in submission order. Events are published while
//! the lock is held, so subscribers observe commit order.

pub mod classify;
pub mod events;
pub mod index;
pub mod materialize;
pub mod promote;

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapters::Adapters;
use crate::config::Config;
use crate::error::EngineError;
use crate::model::change_set::{
    ChangeSet, ChangeSetRecord, ChangeSetStatus, OpResult, OpStatus, SubmitOutcome,
};
use crate::model::conflict::{Conflict, ConflictStatus};
use crate::model::op::Operation;
use crate::model::state::{State, StatePolicy};
use crate::model::types::{ChangeSetId, ConflictId, OpId, StateName};
use crate::parser::build_parser;
use crate::store::EngineSnapshot;
use classify::{ConflictDraft, Staging};
use events::{EngineEvent, EventBus};
use index::{OpLog, update_symbol_indexes};

pub use promote::{PromoteOutcome, PromoteResult, PromoteStatus};

/// Current time as an RFC 3339 string (millisecond precision, UTC).
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Read-side views
// ---------------------------------------------------------------------------

/// A complete, self-contained view of one state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: State,
    pub op_count: usize,
    pub open_conflicts: Vec<Conflict>,
    pub tree: BTreeMap<String, String>,
}

/// One row of the state listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub name: StateName,
    pub heads: Vec<OpId>,
    pub op_count: usize,
    pub open_conflicts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_state: Option<StateName>,
    pub policy: StatePolicy,
    pub created_at: String,
    pub updated_at: String,
}

/// The response to a conflict resolution request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub ok: bool,
    pub conflict: Conflict,
    pub submit_result: SubmitOutcome,
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// The engine's owned aggregate. One instance behind one lock.
pub(crate) struct Core {
    pub(crate) adapters: Adapters,
    pub(crate) log: OpLog,
    pub(crate) states: BTreeMap<StateName, State>,
    pub(crate) conflicts: BTreeMap<ConflictId, Conflict>,
    pub(crate) records: BTreeMap<ChangeSetId, ChangeSetRecord>,
    pub(crate) record_order: Vec<ChangeSetId>,
    /// Last assigned `canonical_order`.
    pub(crate) sequence: u64,
    /// Last assigned conflict counter.
    pub(crate) conflict_sequence: u64,
    /// Last assigned change-set record sequence.
    pub(crate) change_set_sequence: u64,
}

impl Core {
    fn new(adapters: Adapters) -> Self {
        Self {
            adapters,
            log: OpLog::default(),
            states: BTreeMap::new(),
            conflicts: BTreeMap::new(),
            records: BTreeMap::new(),
            record_order: Vec::new(),
            sequence: 0,
            conflict_sequence: 0,
            change_set_sequence: 0,
        }
    }

    pub(crate) fn state_snapshot(&self, name: &StateName) -> Option<StateSnapshot> {
        let state = self.states.get(name)?.clone();
        let tree = materialize::materialize(&self.states, &self.log, &self.adapters, name);
        Some(StateSnapshot {
            op_count: self.log.state_ops(name).len(),
            open_conflicts: self
                .conflicts
                .values()
                .filter(|c| &c.state == name && c.is_open())
                .cloned()
                .collect(),
            state,
            tree,
        })
    }

    fn open_conflict_count(&self, name: &StateName) -> usize {
        self.conflicts
            .values()
            .filter(|c| &c.state == name && c.is_open())
            .count()
    }

    fn record_conflict(
        &mut self,
        draft: ConflictDraft,
        state: &StateName,
        now: &str,
        events: &mut Vec<EngineEvent>,
    ) -> ConflictId {
        self.conflict_sequence += 1;
        let id = ConflictId::from_counter(self.conflict_sequence);
        let conflict = Conflict {
            id: id.clone(),
            state: state.clone(),
            ops: draft.ops,
            conflict_type: draft.conflict_type,
            target: draft.target,
            reason: draft.reason,
            status: ConflictStatus::Open,
            created_at: now.to_owned(),
            resolved_at: None,
            resolved_by: None,
        };
        warn!(conflict = %conflict, "conflict recorded");
        events.push(EngineEvent::Conflict {
            state: state.clone(),
            conflict: conflict.clone(),
        });
        self.conflicts.insert(id.clone(), conflict);
        id
    }

    /// The change-set submission pipeline. The only write path for ops.
    pub(crate) fn submit(
        &mut self,
        change_set: &ChangeSet,
        now: &str,
        events: &mut Vec<EngineEvent>,
    ) -> Result<SubmitOutcome, EngineError> {
        // Idempotency: a recorded id returns its recorded outcome unchanged.
        if let Some(record) = self.records.get(&change_set.id) {
            let details = record
                .conflicts
                .iter()
                .filter_map(|id| self.conflicts.get(id).cloned())
                .collect();
            debug!(change_set = %change_set.id, "idempotent resubmission");
            return Ok(SubmitOutcome::from_record(record, details));
        }

        let Some(state) = self.states.get(&change_set.state).cloned() else {
            return Err(EngineError::StateNotFound {
                name: change_set.state.to_string(),
            });
        };

        // Stage a private copy of the target state's view.
        let (symbol_head, symbol_hash) = self.log.staging_maps(&change_set.state);
        let mut staging = Staging {
            symbol_head,
            symbol_hash,
            tree: materialize::materialize(
                &self.states,
                &self.log,
                &self.adapters,
                &change_set.state,
            ),
            local_parents: BTreeMap::new(),
            has_open_conflicts: self.open_conflict_count(&change_set.state) > 0,
        };

        let mut results: Vec<OpResult> = Vec::with_capacity(change_set.ops.len());
        let mut staged: Vec<Operation> = Vec::new();
        let mut all_conflicts: Vec<ConflictId> = Vec::new();
        let mut status = ChangeSetStatus::Accepted;
        let mut stopped = false;

        for op in &change_set.ops {
            if stopped {
                results.push(OpResult::skipped(op.id.clone()));
                continue;
            }
            if op.state != change_set.state {
                results.push(OpResult {
                    op_id: Some(op.id.clone()),
                    status: OpStatus::Rejected,
                    duplicate: false,
                    conflicts: vec![],
                    error: Some(format!(
                        "op state '{}' does not match change-set state '{}'",
                        op.state, change_set.state
                    )),
                });
                status = ChangeSetStatus::Rejected;
                stopped = true;
                continue;
            }
            if let Err(err) = op.validate_shape() {
                results.push(OpResult {
                    op_id: Some(op.id.clone()),
                    status: OpStatus::Rejected,
                    duplicate: false,
                    conflicts: vec![],
                    error: Some(err.detail),
                });
                status = ChangeSetStatus::Rejected;
                stopped = true;
                continue;
            }
            if self.log.contains(&op.id) {
                results.push(OpResult::accepted(op.id.clone(), true));
                continue;
            }

            let drafts = classify::classify(&self.log, &self.adapters, &state, &staging, op);
            if drafts.is_empty() {
                self.adapters.apply_effect(
                    &mut staging.tree,
                    &op.effect,
                    op.target.path_hint.as_deref(),
                );
                update_symbol_indexes(op, &mut staging.symbol_head, &mut staging.symbol_hash);
                staging
                    .local_parents
                    .insert(op.id.clone(), op.parents.clone());
                staged.push(op.clone());
                results.push(OpResult::accepted(op.id.clone(), false));
            } else {
                let mut ids: Vec<ConflictId> = drafts
                    .into_iter()
                    .map(|draft| self.record_conflict(draft, &change_set.state, now, events))
                    .collect();
                ids.sort();
                all_conflicts.extend(ids.clone());
                results.push(OpResult {
                    op_id: Some(op.id.clone()),
                    status: OpStatus::Conflicted,
                    duplicate: false,
                    conflicts: ids,
                    error: None,
                });
                status = ChangeSetStatus::Conflicted;
                stopped = true;
            }
        }

        let accepted: Vec<OpId> = if status == ChangeSetStatus::Accepted {
            // Commit every staged op in order. Nothing before this point
            // touched the log, so a conflicted set mutated nothing.
            for op in staged {
                self.commit_op(op, now, events);
            }
            results
                .iter()
                .filter(|r| r.status == OpStatus::Accepted)
                .filter_map(|r| r.op_id.clone())
                .collect()
        } else {
            Vec::new()
        };

        all_conflicts.sort();
        self.change_set_sequence += 1;
        let record = ChangeSetRecord {
            id: change_set.id.clone(),
            sequence: self.change_set_sequence,
            state: change_set.state.clone(),
            status,
            results: results.clone(),
            accepted: accepted.clone(),
            conflicts: all_conflicts.clone(),
            metadata: change_set.metadata.clone(),
            recorded_at: now.to_owned(),
        };
        self.records.insert(change_set.id.clone(), record);
        self.record_order.push(change_set.id.clone());

        events.push(EngineEvent::ChangeSet {
            state: change_set.state.clone(),
            change_set_id: change_set.id.clone(),
            status,
        });
        if status == ChangeSetStatus::Accepted
            && let Some(snapshot) = self.state_snapshot(&change_set.state)
        {
            events.push(EngineEvent::StateUpdate {
                state: change_set.state.clone(),
                snapshot: Box::new(snapshot),
            });
        }

        info!(
            change_set = %change_set.id,
            state = %change_set.state,
            status = ?status,
            accepted = accepted.len(),
            conflicts = all_conflicts.len(),
            "change set recorded"
        );

        let conflict_details = all_conflicts
            .iter()
            .filter_map(|id| self.conflicts.get(id).cloned())
            .collect();
        Ok(SubmitOutcome {
            ok: status.is_accepted(),
            change_set_id: change_set.id.clone(),
            status,
            accepted,
            conflicts: all_conflicts,
            conflict_details,
            results,
            idempotent: false,
        })
    }

    /// Commit one evaluated op: assign acceptance fields, append to the
    /// log, advance heads, resolve listed conflicts, emit events.
    fn commit_op(&mut self, mut op: Operation, now: &str, events: &mut Vec<EngineEvent>) {
        self.sequence += 1;
        op.accepted_at = Some(now.to_owned());
        op.canonical_order = Some(self.sequence);

        let state_name = op.state.clone();
        if let Some(state) = self.states.get_mut(&state_name) {
            state.advance_heads(&op.id, &op.parents, now);
        }
        events.push(EngineEvent::OpAccepted {
            state: state_name.clone(),
            op_id: op.id.clone(),
            canonical_order: self.sequence,
        });

        for conflict_id in op.resolves.clone() {
            if let Some(conflict) = self.conflicts.get_mut(&conflict_id)
                && conflict.is_open()
            {
                conflict.status = ConflictStatus::Resolved;
                conflict.resolved_by = Some(op.id.clone());
                conflict.resolved_at = Some(now.to_owned());
                events.push(EngineEvent::Conflict {
                    state: conflict.state.clone(),
                    conflict: conflict.clone(),
                });
            }
        }

        self.log.accept(op);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The public engine handle. Cheap to share behind an `Arc`.
pub struct Engine {
    core: Mutex<Core>,
    events: EventBus,
}

impl Engine {
    /// Create an engine with the given adapters and a bootstrapped `main`
    /// state.
    #[must_use]
    pub fn new(adapters: Adapters) -> Self {
        let mut core = Core::new(adapters);
        let now = now_rfc3339();
        let main = StateName::new("main").unwrap_or_else(|_| unreachable!("static name is valid"));
        core.log.init_state(&main);
        core.states
            .insert(main.clone(), State::bootstrap(main, &now));
        Self {
            core: Mutex::new(core),
            events: EventBus::new(),
        }
    }

    /// Create an engine from the process configuration (parser selection).
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let parser = build_parser(
            config.parser_bin.clone(),
            config.parser_mode,
            config.parser_strict,
        );
        Self::new(Adapters::new(parser))
    }

    /// Subscribe to engine events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    // -- states -------------------------------------------------------------

    /// Create a new state, optionally forked from an existing one.
    ///
    /// # Errors
    /// Name validation, duplicate names, and a missing parent are input
    /// errors.
    pub fn create_state(&self, name: &str, from_state: Option<&str>) -> Result<State, EngineError> {
        let name = StateName::new(name)?;
        let now = now_rfc3339();
        let mut core = self.core.lock();
        if core.states.contains_key(&name) {
            return Err(EngineError::StateExists {
                name: name.to_string(),
            });
        }
        let state = match from_state {
            Some(parent_str) => {
                let parent_name = StateName::new(parent_str)?;
                let Some(parent) = core.states.get(&parent_name).cloned() else {
                    return Err(EngineError::StateNotFound {
                        name: parent_str.to_owned(),
                    });
                };
                core.log.init_state_from(&name, &parent_name);
                State::forked_from(name.clone(), &parent, &now)
            }
            None => {
                core.log.init_state(&name);
                State::bootstrap(name.clone(), &now)
            }
        };
        core.states.insert(name.clone(), state.clone());
        info!(state = %name, base = ?state.base_state, "state created");

        let mut events = Vec::new();
        if let Some(snapshot) = core.state_snapshot(&name) {
            events.push(EngineEvent::StateUpdate {
                state: name,
                snapshot: Box::new(snapshot),
            });
        }
        drop(core);
        self.emit_all(events);
        Ok(state)
    }

    /// List all states, sorted by name.
    #[must_use]
    pub fn list_states(&self) -> Vec<StateSummary> {
        let core = self.core.lock();
        core.states
            .values()
            .map(|state| StateSummary {
                name: state.name.clone(),
                heads: state.heads.clone(),
                op_count: core.log.state_ops(&state.name).len(),
                open_conflicts: core.open_conflict_count(&state.name),
                base_state: state.base_state.clone(),
                policy: state.policy.clone(),
                created_at: state.created_at.clone(),
                updated_at: state.updated_at.clone(),
            })
            .collect()
    }

    /// A complete snapshot of one state.
    ///
    /// # Errors
    /// Unknown states are a not-found input error.
    pub fn state_snapshot(&self, name: &str) -> Result<StateSnapshot, EngineError> {
        let name = StateName::new(name)?;
        self.core
            .lock()
            .state_snapshot(&name)
            .ok_or(EngineError::StateNotFound {
                name: name.to_string(),
            })
    }

    /// Materialize a state's file tree.
    ///
    /// # Errors
    /// Unknown states are a not-found input error.
    pub fn materialize(&self, name: &str) -> Result<BTreeMap<String, String>, EngineError> {
        let name = StateName::new(name)?;
        let core = self.core.lock();
        if !core.states.contains_key(&name) {
            return Err(EngineError::StateNotFound {
                name: name.to_string(),
            });
        }
        Ok(materialize::materialize(
            &core.states,
            &core.log,
            &core.adapters,
            &name,
        ))
    }

    // -- submission ---------------------------------------------------------

    /// Submit a change set given as raw JSON. The only write path for ops.
    ///
    /// # Errors
    /// Shape errors and unknown states are input errors; conflicted or
    /// rejected submissions are *outcomes*, returned in the `Ok` body.
    pub fn submit(&self, change_set: Value) -> Result<SubmitOutcome, EngineError> {
        let now = now_rfc3339();
        let change_set = ChangeSet::normalize(change_set, &now)?;
        let mut events = Vec::new();
        let mut core = self.core.lock();
        let outcome = core.submit(&change_set, &now, &mut events)?;
        drop(core);
        self.emit_all(events);
        Ok(outcome)
    }

    /// Legacy single-op / op-list submission: wraps the input in an
    /// anonymous change set.
    ///
    /// # Errors
    /// Same contract as [`Engine::submit`].
    pub fn submit_ops(&self, ops: Vec<Value>) -> Result<SubmitOutcome, EngineError> {
        let now = now_rfc3339();
        let change_set = ChangeSet::anonymous(ops, &now)?;
        let mut events = Vec::new();
        let mut core = self.core.lock();
        let outcome = core.submit(&change_set, &now, &mut events)?;
        drop(core);
        self.emit_all(events);
        Ok(outcome)
    }

    // -- conflicts ----------------------------------------------------------

    /// List conflicts, optionally filtered by state.
    ///
    /// # Errors
    /// An invalid state name is an input error.
    pub fn list_conflicts(&self, state: Option<&str>) -> Result<Vec<Conflict>, EngineError> {
        let filter = state.map(StateName::new).transpose()?;
        let core = self.core.lock();
        Ok(core
            .conflicts
            .values()
            .filter(|c| filter.as_ref().is_none_or(|name| &c.state == name))
            .cloned()
            .collect())
    }

    /// Look up one conflict.
    ///
    /// # Errors
    /// Unknown ids are a not-found input error.
    pub fn get_conflict(&self, id: &str) -> Result<Conflict, EngineError> {
        let id = ConflictId::new(id)?;
        self.core
            .lock()
            .conflicts
            .get(&id)
            .cloned()
            .ok_or(EngineError::ConflictNotFound { id: id.to_string() })
    }

    /// Resolve a conflict with an operation: the op's `resolves` is
    /// extended with the conflict id, then the op is submitted normally.
    /// The conflict closes only if the op is accepted.
    ///
    /// # Errors
    /// Unknown conflict ids and malformed ops are input errors.
    pub fn resolve(&self, conflict_id: &str, op: Value) -> Result<ResolveOutcome, EngineError> {
        let id = ConflictId::new(conflict_id)?;
        {
            let core = self.core.lock();
            if !core.conflicts.contains_key(&id) {
                return Err(EngineError::ConflictNotFound { id: id.to_string() });
            }
        }

        // Union the conflict id into resolves before the id is derived.
        let mut op = op;
        match &mut op {
            Value::Object(map) => {
                let resolves = map
                    .entry("resolves".to_owned())
                    .or_insert_with(|| Value::Array(vec![]));
                match resolves {
                    Value::Array(list) => {
                        let id_value = Value::String(id.to_string());
                        if !list.contains(&id_value) {
                            list.push(id_value);
                        }
                    }
                    _ => {
                        return Err(crate::model::op::ShapeError::new(
                            "op resolves must be an array",
                        )
                        .into());
                    }
                }
            }
            _ => {
                return Err(crate::model::op::ShapeError::new("op must be a JSON object").into());
            }
        }

        let submit_result = self.submit_ops(vec![op])?;
        let conflict = self.get_conflict(conflict_id)?;
        Ok(ResolveOutcome {
            ok: submit_result.ok,
            conflict,
            submit_result,
        })
    }

    // -- promotion ----------------------------------------------------------

    /// Rebase a source state's ops onto a target state, stopping at the
    /// first conflict.
    ///
    /// # Errors
    /// Missing or identical states are input errors.
    pub fn promote(
        &self,
        source: &str,
        target: &str,
        author: &str,
    ) -> Result<PromoteOutcome, EngineError> {
        let source = StateName::new(source)?;
        let target = StateName::new(target)?;
        let now = now_rfc3339();
        let mut events = Vec::new();
        let mut core = self.core.lock();
        let outcome = promote::promote(&mut core, &source, &target, author, &now, &mut events)?;
        drop(core);
        self.emit_all(events);
        Ok(outcome)
    }

    // -- lookups ------------------------------------------------------------

    /// Look up an accepted op.
    ///
    /// # Errors
    /// Unknown ids are a not-found input error.
    pub fn get_op(&self, id: &str) -> Result<Operation, EngineError> {
        let id = OpId::new(id)?;
        self.core
            .lock()
            .log
            .get(&id)
            .cloned()
            .ok_or(EngineError::OpNotFound { id: id.to_string() })
    }

    /// Look up a recorded change set.
    ///
    /// # Errors
    /// Unknown ids are a not-found input error.
    pub fn get_change_set(&self, id: &str) -> Result<ChangeSetRecord, EngineError> {
        let id = ChangeSetId::new(id)?;
        self.core
            .lock()
            .records
            .get(&id)
            .cloned()
            .ok_or(EngineError::ChangeSetNotFound { id: id.to_string() })
    }

    /// List recorded change sets in record order, optionally filtered by
    /// state.
    ///
    /// # Errors
    /// An invalid state name is an input error.
    pub fn list_change_sets(&self, state: Option<&str>) -> Result<Vec<ChangeSetRecord>, EngineError> {
        let filter = state.map(StateName::new).transpose()?;
        let core = self.core.lock();
        Ok(core
            .record_order
            .iter()
            .filter_map(|id| core.records.get(id))
            .filter(|r| filter.as_ref().is_none_or(|name| &r.state == name))
            .cloned()
            .collect())
    }

    /// The head writer of a symbol in a state, if any.
    ///
    /// # Errors
    /// Invalid names are input errors; an unknown state or symbol is `None`.
    pub fn symbol_head(&self, state: &str, symbol: &str) -> Result<Option<OpId>, EngineError> {
        let state = StateName::new(state)?;
        let symbol = crate::model::symbol::SymbolId::parse(symbol)?;
        Ok(self.core.lock().log.symbol_head(&state, &symbol).cloned())
    }

    /// The last known declared hash of a symbol in a state, if any.
    ///
    /// # Errors
    /// Invalid names are input errors; an unknown state or symbol is `None`.
    pub fn symbol_hash(&self, state: &str, symbol: &str) -> Result<Option<String>, EngineError> {
        let state = StateName::new(state)?;
        let symbol = crate::model::symbol::SymbolId::parse(symbol)?;
        Ok(self
            .core
            .lock()
            .log
            .symbol_hash(&state, &symbol)
            .map(str::to_owned))
    }

    // -- persistence --------------------------------------------------------

    /// Serialize the whole engine into the single snapshot document.
    #[must_use]
    pub fn to_snapshot(&self) -> EngineSnapshot {
        let core = self.core.lock();
        let mut ops: Vec<Operation> = core.log.ops().cloned().collect();
        ops.sort_by_key(|op| op.canonical_order.unwrap_or(u64::MAX));
        EngineSnapshot {
            sequence: core.sequence,
            conflict_sequence: core.conflict_sequence,
            change_set_sequence: core.change_set_sequence,
            ops,
            change_sets: core
                .record_order
                .iter()
                .filter_map(|id| core.records.get(id))
                .cloned()
                .collect(),
            conflicts: core.conflicts.values().cloned().collect(),
            states: core.states.values().cloned().collect(),
        }
    }

    /// Rebuild an engine from a snapshot document: reload the log, then
    /// reconstruct `state_ops`, the symbol indexes (as the ancestry fold),
    /// and, as a self-heal, each state's `heads` and the counters.
    #[must_use]
    pub fn from_snapshot(snapshot: EngineSnapshot, adapters: Adapters) -> Self {
        let mut core = Core::new(adapters);
        core.sequence = snapshot.sequence;
        core.conflict_sequence = snapshot.conflict_sequence;
        core.change_set_sequence = snapshot.change_set_sequence;

        for state in snapshot.states {
            core.log.init_state(&state.name);
            core.states.insert(state.name.clone(), state);
        }

        let mut ops = snapshot.ops;
        ops.sort_by_key(|op| op.canonical_order.unwrap_or(u64::MAX));
        for op in ops {
            core.sequence = core.sequence.max(op.canonical_order.unwrap_or(0));
            core.log.accept(op);
        }

        rebuild_symbol_indexes(&mut core);
        rebuild_heads(&mut core);

        for conflict in snapshot.conflicts {
            if let Some(n) = conflict
                .id
                .as_str()
                .strip_prefix("conf_")
                .and_then(|n| n.parse::<u64>().ok())
            {
                core.conflict_sequence = core.conflict_sequence.max(n);
            }
            core.conflicts.insert(conflict.id.clone(), conflict);
        }

        let mut records = snapshot.change_sets;
        records.sort_by_key(|r| r.sequence);
        for record in records {
            core.change_set_sequence = core.change_set_sequence.max(record.sequence);
            core.record_order.push(record.id.clone());
            core.records.insert(record.id.clone(), record);
        }

        info!(
            states = core.states.len(),
            sequence = core.sequence,
            "engine rebuilt from snapshot"
        );
        Self {
            core: Mutex::new(core),
            events: EventBus::new(),
        }
    }
}

/// Recompute every state's symbol indexes as the fold over its ancestry
/// plus local ops, memoized, with a visiting set breaking base cycles.
fn rebuild_symbol_indexes(core: &mut Core) {
    type Maps = (BTreeMap<crate::model::symbol::SymbolId, OpId>, BTreeMap<crate::model::symbol::SymbolId, String>);

    fn fold(
        name: &StateName,
        states: &BTreeMap<StateName, State>,
        log: &OpLog,
        memo: &mut BTreeMap<StateName, Maps>,
        visiting: &mut std::collections::BTreeSet<StateName>,
    ) -> Maps {
        if let Some(maps) = memo.get(name) {
            return maps.clone();
        }
        if !visiting.insert(name.clone()) {
            return (BTreeMap::new(), BTreeMap::new());
        }
        let (mut heads, mut hashes) = states
            .get(name)
            .and_then(|s| s.base_state.clone())
            .map_or_else(
                || (BTreeMap::new(), BTreeMap::new()),
                |base| fold(&base, states, log, memo, visiting),
            );
        for op_id in log.state_ops(name) {
            if let Some(op) = log.get(op_id) {
                update_symbol_indexes(op, &mut heads, &mut hashes);
            }
        }
        visiting.remove(name);
        memo.insert(name.clone(), (heads.clone(), hashes.clone()));
        (heads, hashes)
    }

    let names: Vec<StateName> = core.states.keys().cloned().collect();
    let mut memo = BTreeMap::new();
    for name in names {
        let mut visiting = std::collections::BTreeSet::new();
        let (heads, hashes) = fold(&name, &core.states, &core.log, &mut memo, &mut visiting);
        core.log.set_symbol_indexes(&name, heads, hashes);
    }
}

/// Self-heal `state.heads`: seed from `base_heads` and advance with each
/// local op in acceptance order.
fn rebuild_heads(core: &mut Core) {
    let names: Vec<StateName> = core.states.keys().cloned().collect();
    for name in names {
        let op_ids: Vec<OpId> = core.log.state_ops(&name).to_vec();
        let Some(state) = core.states.get_mut(&name) else {
            continue;
        };
        let mut heads = state.base_heads.clone();
        for op_id in op_ids {
            if let Some(op) = core.log.get(&op_id) {
                heads.retain(|h| !op.parents.contains(h));
                if !heads.contains(&op.id) {
                    heads.push(op.id.clone());
                }
            }
        }
        state.heads = heads;
    }
}
