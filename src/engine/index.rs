//! Append-only op log and per-state derived indexes.
//!
//! The log stores every accepted operation keyed by id. Per state it keeps:
//!
//! - `state_ops` — accepted op ids in acceptance order;
//! - `symbol_head` — the most recent op id that wrote each symbol;
//! - `symbol_hash` — the last declared post-effect hash per symbol.
//!
//! State creation inherits the parent's index maps by deep copy; orphan
//! states start empty. All three maps are derivable from the log and state
//! metadata; the rebuild procedure lives in the engine restore path.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::model::op::{EffectKind, Operation};
use crate::model::symbol::{Fragment, SymbolId};
use crate::model::types::{OpId, StateName};

// ---------------------------------------------------------------------------
// Symbol bookkeeping
// ---------------------------------------------------------------------------

/// Update `heads` and `hashes` for one accepted (or staged) write.
///
/// Declared `effect.symbol_hashes` wins: a string sets the hash, `null`
/// deletes it. Legacy ops that omit the map fall back to `after_hash` for
/// the effect kinds that identify exactly one written symbol; anything else
/// leaves the hash untouched. The head always moves to the writing op.
pub fn update_symbol_indexes(
    op: &Operation,
    heads: &mut BTreeMap<SymbolId, OpId>,
    hashes: &mut BTreeMap<SymbolId, String>,
) {
    for symbol in &op.writes {
        if let Some(declared) = &op.effect.symbol_hashes
            && let Some(entry) = declared.get(&symbol.to_string())
        {
            match entry {
                Some(hash) => {
                    hashes.insert(symbol.clone(), hash.clone());
                }
                None => {
                    hashes.remove(symbol);
                }
            }
        } else if let Some(after_hash) = legacy_after_hash(op, symbol) {
            hashes.insert(symbol.clone(), after_hash.to_owned());
        }
        heads.insert(symbol.clone(), op.id.clone());
    }
}

/// The legacy `after_hash` for `symbol`, when the effect kind identifies it.
fn legacy_after_hash<'a>(op: &'a Operation, symbol: &SymbolId) -> Option<&'a str> {
    let after_hash = op.effect.after_hash.as_deref()?;
    let applies = match &op.effect.kind {
        EffectKind::UpsertFile { path, .. } => {
            symbol.path() == path && matches!(symbol.fragment(), Fragment::Document)
        }
        EffectKind::ReplaceBody { .. } => true,
        EffectKind::JsonSetKey { path, key, .. } => symbol == &SymbolId::json_key(path, key),
        EffectKind::PythonReplaceSymbol {
            path,
            symbol_kind,
            symbol_name,
            ..
        }
        | EffectKind::PythonInsertSymbol {
            path,
            symbol_kind,
            symbol_name,
            ..
        } => symbol == &SymbolId::python(path, *symbol_kind, symbol_name),
        EffectKind::DeleteFile { .. }
        | EffectKind::JsonDeleteKey { .. }
        | EffectKind::PythonDeleteSymbol { .. } => false,
    };
    applies.then_some(after_hash)
}

// ---------------------------------------------------------------------------
// OpLog
// ---------------------------------------------------------------------------

/// The append-only log plus per-state derived indexes.
#[derive(Clone, Debug, Default)]
pub struct OpLog {
    ops: BTreeMap<OpId, Operation>,
    state_ops: BTreeMap<StateName, Vec<OpId>>,
    symbol_head: BTreeMap<StateName, BTreeMap<SymbolId, OpId>>,
    symbol_hash: BTreeMap<StateName, BTreeMap<SymbolId, String>>,
}

impl OpLog {
    /// `true` if the op id is already in the log.
    #[must_use]
    pub fn contains(&self, id: &OpId) -> bool {
        self.ops.contains_key(id)
    }

    /// Look up an accepted op.
    #[must_use]
    pub fn get(&self, id: &OpId) -> Option<&Operation> {
        self.ops.get(id)
    }

    /// All accepted ops (unordered iteration over the id index).
    pub fn ops(&self) -> impl Iterator<Item = &Operation> {
        self.ops.values()
    }

    /// Accepted op ids for a state, in acceptance order.
    #[must_use]
    pub fn state_ops(&self, state: &StateName) -> &[OpId] {
        self.state_ops.get(state).map_or(&[], Vec::as_slice)
    }

    /// The head writer of a symbol in a state.
    #[must_use]
    pub fn symbol_head(&self, state: &StateName, symbol: &SymbolId) -> Option<&OpId> {
        self.symbol_head.get(state)?.get(symbol)
    }

    /// The last known declared hash of a symbol in a state.
    #[must_use]
    pub fn symbol_hash(&self, state: &StateName, symbol: &SymbolId) -> Option<&str> {
        self.symbol_hash.get(state)?.get(symbol).map(String::as_str)
    }

    /// Clone a state's index maps for staging.
    #[must_use]
    pub fn staging_maps(
        &self,
        state: &StateName,
    ) -> (BTreeMap<SymbolId, OpId>, BTreeMap<SymbolId, String>) {
        (
            self.symbol_head.get(state).cloned().unwrap_or_default(),
            self.symbol_hash.get(state).cloned().unwrap_or_default(),
        )
    }

    /// Register a brand-new state with empty indexes.
    pub fn init_state(&mut self, state: &StateName) {
        self.state_ops.entry(state.clone()).or_default();
        self.symbol_head.entry(state.clone()).or_default();
        self.symbol_hash.entry(state.clone()).or_default();
    }

    /// Replace a state's symbol index maps (rebuild path).
    pub fn set_symbol_indexes(
        &mut self,
        state: &StateName,
        heads: BTreeMap<SymbolId, OpId>,
        hashes: BTreeMap<SymbolId, String>,
    ) {
        self.symbol_head.insert(state.clone(), heads);
        self.symbol_hash.insert(state.clone(), hashes);
    }

    /// Register a forked state, deep-copying the parent's symbol indexes.
    ///
    /// `state_ops` starts empty — the fork sees the parent's history via
    /// ancestry, not via its own op list.
    pub fn init_state_from(&mut self, state: &StateName, parent: &StateName) {
        let head = self.symbol_head.get(parent).cloned().unwrap_or_default();
        let hash = self.symbol_hash.get(parent).cloned().unwrap_or_default();
        self.state_ops.entry(state.clone()).or_default();
        self.symbol_head.insert(state.clone(), head);
        self.symbol_hash.insert(state.clone(), hash);
    }

    /// Append an accepted op and update the target state's indexes.
    ///
    /// The op must already carry `accepted_at` and `canonical_order`.
    /// Accepting an id already in the log is a no-op.
    pub fn accept(&mut self, op: Operation) {
        if self.ops.contains_key(&op.id) {
            return;
        }
        let state = op.state.clone();
        self.state_ops
            .entry(state.clone())
            .or_default()
            .push(op.id.clone());
        let heads = self.symbol_head.entry(state.clone()).or_default();
        let hashes = self.symbol_hash.entry(state).or_default();
        update_symbol_indexes(&op, heads, hashes);
        self.ops.insert(op.id.clone(), op);
    }

    /// `true` iff `candidate` is an ancestor-or-self of the `start` set.
    ///
    /// The walk is the reflexive-transitive closure over `parents`,
    /// following committed ops in the log plus `local_parents` for ops
    /// staged inside the current change set.
    #[must_use]
    pub fn is_ancestor_or_self(
        &self,
        local_parents: &BTreeMap<OpId, Vec<OpId>>,
        candidate: &OpId,
        start: &[OpId],
    ) -> bool {
        let mut queue: VecDeque<OpId> = start.iter().cloned().collect();
        let mut seen: BTreeSet<OpId> = queue.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if &id == candidate {
                return true;
            }
            let parents = self
                .ops
                .get(&id)
                .map(|op| op.parents.clone())
                .or_else(|| local_parents.get(&id).cloned())
                .unwrap_or_default();
            for parent in parents {
                if seen.insert(parent.clone()) {
                    queue.push_back(parent);
                }
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::op::{Effect, Metadata, Target};
    use serde_json::json;

    const NOW: &str = "2026-03-01T12:00:00Z";

    fn state(s: &str) -> StateName {
        StateName::new(s).unwrap()
    }

    fn accepted_upsert(id: &str, state_name: &str, path: &str, parents: &[&str]) -> Operation {
        let sym = SymbolId::document(path);
        Operation {
            id: OpId::new(id).unwrap(),
            state: state(state_name),
            parents: parents.iter().map(|p| OpId::new(p).unwrap()).collect(),
            target: Target::symbol(sym.clone()),
            preconditions: vec![],
            reads: BTreeSet::new(),
            writes: [sym].into_iter().collect(),
            effect: Effect::new(EffectKind::UpsertFile {
                path: path.to_owned(),
                content: "hi\n".to_owned(),
            }),
            resolves: vec![],
            metadata: Metadata::default(),
            accepted_at: Some(NOW.to_owned()),
            canonical_order: Some(1),
        }
    }

    #[test]
    fn accept_updates_state_ops_and_heads() {
        let mut log = OpLog::default();
        let op = accepted_upsert("op_a1", "main", "a.txt", &[]);
        let sym = SymbolId::document("a.txt");
        log.accept(op.clone());

        assert!(log.contains(&op.id));
        assert_eq!(log.state_ops(&state("main")), &[op.id.clone()]);
        assert_eq!(log.symbol_head(&state("main"), &sym), Some(&op.id));
    }

    #[test]
    fn accept_is_idempotent_by_id() {
        let mut log = OpLog::default();
        let op = accepted_upsert("op_a1", "main", "a.txt", &[]);
        log.accept(op.clone());
        log.accept(op.clone());
        assert_eq!(log.state_ops(&state("main")).len(), 1);
    }

    #[test]
    fn fork_deep_copies_symbol_indexes() {
        let mut log = OpLog::default();
        log.init_state(&state("main"));
        log.accept(accepted_upsert("op_a1", "main", "a.txt", &[]));
        log.init_state_from(&state("ws/alice"), &state("main"));

        let sym = SymbolId::document("a.txt");
        assert!(log.symbol_head(&state("ws/alice"), &sym).is_some());
        assert!(log.state_ops(&state("ws/alice")).is_empty());

        // Writes in the fork do not leak back.
        log.accept(accepted_upsert("op_b2", "ws/alice", "a.txt", &["op_a1"]));
        assert_eq!(
            log.symbol_head(&state("main"), &sym).unwrap().as_str(),
            "op_a1"
        );
        assert_eq!(
            log.symbol_head(&state("ws/alice"), &sym).unwrap().as_str(),
            "op_b2"
        );
    }

    // -- bookkeeping --

    #[test]
    fn declared_symbol_hashes_win() {
        let sym = SymbolId::document("a.txt");
        let mut op = accepted_upsert("op_a1", "main", "a.txt", &[]);
        op.effect.symbol_hashes = Some(
            [(sym.to_string(), Some("hash_declared000000000".to_owned()))]
                .into_iter()
                .collect(),
        );
        op.effect.after_hash = Some("hash_legacy0000000000".to_owned());

        let mut heads = BTreeMap::new();
        let mut hashes = BTreeMap::new();
        update_symbol_indexes(&op, &mut heads, &mut hashes);
        assert_eq!(hashes[&sym], "hash_declared000000000");
    }

    #[test]
    fn declared_null_deletes_hash() {
        let sym = SymbolId::document("a.txt");
        let mut op = accepted_upsert("op_a1", "main", "a.txt", &[]);
        op.effect.symbol_hashes = Some([(sym.to_string(), None)].into_iter().collect());

        let mut heads = BTreeMap::new();
        let mut hashes: BTreeMap<SymbolId, String> =
            [(sym.clone(), "hash_old0000000000000".to_owned())]
                .into_iter()
                .collect();
        update_symbol_indexes(&op, &mut heads, &mut hashes);
        assert!(!hashes.contains_key(&sym));
        assert_eq!(heads[&sym], op.id);
    }

    #[test]
    fn legacy_after_hash_applies_to_matching_symbol_only() {
        let sym = SymbolId::json_key("c.json", "retries");
        let other = SymbolId::json_key("c.json", "other");
        let mut op = accepted_upsert("op_a1", "main", "c.json", &[]);
        op.effect = Effect {
            kind: EffectKind::JsonSetKey {
                path: "c.json".to_owned(),
                key: "retries".to_owned(),
                value: json!(3),
            },
            symbol_hashes: None,
            after_hash: Some("hash_after00000000000".to_owned()),
        };
        op.writes = [sym.clone(), other.clone()].into_iter().collect();

        let mut heads = BTreeMap::new();
        let mut hashes = BTreeMap::new();
        update_symbol_indexes(&op, &mut heads, &mut hashes);
        assert_eq!(hashes.get(&sym).map(String::as_str), Some("hash_after00000000000"));
        assert!(!hashes.contains_key(&other), "non-matching symbol untouched");
        assert_eq!(heads[&other], op.id, "head still moves");
    }

    #[test]
    fn legacy_delete_kinds_leave_hash_unchanged() {
        let sym = SymbolId::document("a.txt");
        let mut op = accepted_upsert("op_a1", "main", "a.txt", &[]);
        op.effect = Effect {
            kind: EffectKind::DeleteFile {
                path: "a.txt".to_owned(),
            },
            symbol_hashes: None,
            after_hash: Some("hash_after00000000000".to_owned()),
        };
        let mut heads = BTreeMap::new();
        let mut hashes: BTreeMap<SymbolId, String> =
            [(sym.clone(), "hash_old0000000000000".to_owned())]
                .into_iter()
                .collect();
        update_symbol_indexes(&op, &mut heads, &mut hashes);
        assert_eq!(hashes[&sym], "hash_old0000000000000");
    }

    // -- ancestry --

    #[test]
    fn ancestor_walk_follows_committed_parents() {
        let mut log = OpLog::default();
        log.accept(accepted_upsert("op_a1", "main", "a.txt", &[]));
        log.accept(accepted_upsert("op_b2", "main", "a.txt", &["op_a1"]));
        log.accept(accepted_upsert("op_c3", "main", "a.txt", &["op_b2"]));

        let locals = BTreeMap::new();
        let a = OpId::new("op_a1").unwrap();
        let c = OpId::new("op_c3").unwrap();
        assert!(log.is_ancestor_or_self(&locals, &a, &[c.clone()]));
        assert!(log.is_ancestor_or_self(&locals, &c, &[c.clone()]), "reflexive");
        assert!(!log.is_ancestor_or_self(&locals, &c, &[a]));
    }

    #[test]
    fn ancestor_walk_follows_local_parents() {
        let mut log = OpLog::default();
        log.accept(accepted_upsert("op_a1", "main", "a.txt", &[]));

        // op_l2 is staged in the current change set, not yet in the log.
        let locals: BTreeMap<OpId, Vec<OpId>> = [(
            OpId::new("op_l2").unwrap(),
            vec![OpId::new("op_a1").unwrap()],
        )]
        .into_iter()
        .collect();

        let a = OpId::new("op_a1").unwrap();
        let l = OpId::new("op_l2").unwrap();
        assert!(log.is_ancestor_or_self(&locals, &a, &[l]));
    }

    #[test]
    fn ancestor_walk_terminates_on_cycles() {
        // Malformed local parents forming a cycle must not hang the walk.
        let log = OpLog::default();
        let locals: BTreeMap<OpId, Vec<OpId>> = [
            (OpId::new("op_x1").unwrap(), vec![OpId::new("op_y2").unwrap()]),
            (OpId::new("op_y2").unwrap(), vec![OpId::new("op_x1").unwrap()]),
        ]
        .into_iter()
        .collect();
        let ghost = OpId::new("op_zz").unwrap();
        assert!(!log.is_ancestor_or_self(&locals, &ghost, &[OpId::new("op_x1").unwrap()]));
    }
}
