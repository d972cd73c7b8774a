//! Deterministic tree materialization.
//!
//! A state's file tree is a pure fold: recurse into `base_state` first,
//! then apply the state's own accepted ops in canonical order through the
//! adapters. Equal ancestry always yields a byte-identical tree. A
//! visiting set breaks `base_state` cycles (possible after state renames).

use std::collections::{BTreeMap, BTreeSet};

use super::index::OpLog;
use crate::adapters::Adapters;
use crate::model::state::State;
use crate::model::types::StateName;

/// Materialize `name` into a `path → text` map (sorted by path).
///
/// Unknown states contribute nothing; unknown effect kinds are skipped by
/// the adapter layer. Staged, uncommitted change sets are never visible
/// here — the fold reads only the accepted log.
#[must_use]
pub fn materialize(
    states: &BTreeMap<StateName, State>,
    log: &OpLog,
    adapters: &Adapters,
    name: &StateName,
) -> BTreeMap<String, String> {
    let mut tree = BTreeMap::new();
    let mut visiting = BTreeSet::new();
    fold(states, log, adapters, name, &mut visiting, &mut tree);
    tree
}

fn fold(
    states: &BTreeMap<StateName, State>,
    log: &OpLog,
    adapters: &Adapters,
    name: &StateName,
    visiting: &mut BTreeSet<StateName>,
    tree: &mut BTreeMap<String, String>,
) {
    if !visiting.insert(name.clone()) {
        return;
    }
    if let Some(state) = states.get(name)
        && let Some(base) = &state.base_state
    {
        fold(states, log, adapters, base, visiting, tree);
    }
    for op_id in log.state_ops(name) {
        if let Some(op) = log.get(op_id) {
            adapters.apply_effect(tree, &op.effect, op.target.path_hint.as_deref());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet as SymbolSet;
    use std::sync::Arc;

    use super::*;
    use crate::model::op::{Effect, EffectKind, Metadata, Operation, Target};
    use crate::model::symbol::SymbolId;
    use crate::model::types::OpId;
    use crate::parser::fallback::RegexParser;

    const NOW: &str = "2026-03-01T12:00:00Z";

    fn adapters() -> Adapters {
        Adapters::new(Arc::new(RegexParser::new()))
    }

    fn name(s: &str) -> StateName {
        StateName::new(s).unwrap()
    }

    fn accepted(id: &str, state: &str, effect: EffectKind, order: u64) -> Operation {
        let path = match &effect {
            EffectKind::UpsertFile { path, .. } | EffectKind::DeleteFile { path } => path.clone(),
            _ => "x".to_owned(),
        };
        let sym = SymbolId::document(&path);
        Operation {
            id: OpId::new(id).unwrap(),
            state: name(state),
            parents: vec![],
            target: Target::symbol(sym.clone()),
            preconditions: vec![],
            reads: SymbolSet::new(),
            writes: [sym].into_iter().collect(),
            effect: Effect::new(effect),
            resolves: vec![],
            metadata: Metadata::default(),
            accepted_at: Some(NOW.to_owned()),
            canonical_order: Some(order),
        }
    }

    fn upsert(id: &str, state: &str, path: &str, content: &str, order: u64) -> Operation {
        accepted(
            id,
            state,
            EffectKind::UpsertFile {
                path: path.to_owned(),
                content: content.to_owned(),
            },
            order,
        )
    }

    #[test]
    fn folds_ops_in_order() {
        let mut log = OpLog::default();
        log.accept(upsert("op_a1", "main", "a.txt", "v1\n", 1));
        log.accept(upsert("op_a2", "main", "a.txt", "v2\n", 2));
        log.accept(upsert("op_b1", "main", "b.txt", "b\n", 3));

        let mut states = BTreeMap::new();
        states.insert(name("main"), State::bootstrap(name("main"), NOW));

        let tree = materialize(&states, &log, &adapters(), &name("main"));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree["a.txt"], "v2\n", "later op wins");
        assert_eq!(tree["b.txt"], "b\n");
    }

    #[test]
    fn delete_removes_path() {
        let mut log = OpLog::default();
        log.accept(upsert("op_a1", "main", "a.txt", "v1\n", 1));
        log.accept(accepted(
            "op_d2",
            "main",
            EffectKind::DeleteFile {
                path: "a.txt".to_owned(),
            },
            2,
        ));

        let mut states = BTreeMap::new();
        states.insert(name("main"), State::bootstrap(name("main"), NOW));
        let tree = materialize(&states, &log, &adapters(), &name("main"));
        assert!(tree.is_empty());
    }

    #[test]
    fn base_state_is_folded_first() {
        let mut log = OpLog::default();
        log.accept(upsert("op_a1", "main", "a.txt", "base\n", 1));
        log.accept(upsert("op_a2", "ws/alice", "a.txt", "fork\n", 2));
        log.accept(upsert("op_b3", "ws/alice", "b.txt", "only-fork\n", 3));

        let mut states = BTreeMap::new();
        let main = State::bootstrap(name("main"), NOW);
        let fork = State::forked_from(name("ws/alice"), &main, NOW);
        states.insert(name("main"), main);
        states.insert(name("ws/alice"), fork);

        let tree = materialize(&states, &log, &adapters(), &name("ws/alice"));
        assert_eq!(tree["a.txt"], "fork\n", "fork overrides base");
        assert_eq!(tree["b.txt"], "only-fork\n");

        let base_tree = materialize(&states, &log, &adapters(), &name("main"));
        assert_eq!(base_tree["a.txt"], "base\n");
        assert!(!base_tree.contains_key("b.txt"));
    }

    #[test]
    fn base_cycles_are_broken() {
        let mut states = BTreeMap::new();
        let mut a = State::bootstrap(name("a"), NOW);
        let mut b = State::bootstrap(name("b"), NOW);
        a.base_state = Some(name("b"));
        b.base_state = Some(name("a"));
        states.insert(name("a"), a);
        states.insert(name("b"), b);

        let mut log = OpLog::default();
        log.accept(upsert("op_a1", "a", "a.txt", "a\n", 1));
        log.accept(upsert("op_b1", "b", "b.txt", "b\n", 2));

        let tree = materialize(&states, &log, &adapters(), &name("a"));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn unknown_state_is_empty() {
        let log = OpLog::default();
        let states = BTreeMap::new();
        assert!(materialize(&states, &log, &adapters(), &name("ghost")).is_empty());
    }

    #[test]
    fn determinism_same_inputs_same_bytes() {
        let mut log = OpLog::default();
        log.accept(upsert("op_a1", "main", "z.txt", "z\n", 1));
        log.accept(upsert("op_a2", "main", "a.txt", "a\n", 2));
        let mut states = BTreeMap::new();
        states.insert(name("main"), State::bootstrap(name("main"), NOW));

        let t1 = materialize(&states, &log, &adapters(), &name("main"));
        let t2 = materialize(&states, &log, &adapters(), &name("main"));
        assert_eq!(t1, t2);
        let keys: Vec<&String> = t1.keys().collect();
        assert_eq!(keys, vec!["a.txt", "z.txt"], "sorted by path");
    }
}
