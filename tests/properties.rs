//! Property tests for the universal engine invariants.
//!
//! 1. op ids are a pure function of contents; resubmission deduplicates
//! 2. change-set acceptance is all-or-nothing
//! 3. equal ancestry ⇒ byte-identical materialization
//! 4. accepted resolution flips the conflict record (covered in scenarios)
//! 5. `canonical_order` is strictly increasing
//! 6. `symbol_head` always points at an op that writes the symbol
//! 7. promotion is idempotent (covered in scenarios)

mod common;

use common::{change_set, engine, upsert_op};
use proptest::prelude::*;
use serde_json::json;

use forge::model::Operation;
use forge::model::change_set::{ChangeSetStatus, OpStatus};

const NOW: &str = "2026-03-01T12:00:00Z";

/// A small pool of paths so writes collide across cases.
fn path_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "a.txt".to_owned(),
        "b.txt".to_owned(),
        "docs/readme.md".to_owned(),
        "notes/x.txt".to_owned(),
    ])
}

fn content_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9 ]{0,24}\n".prop_map(|s| s)
}

proptest! {
    // -- invariant 1: id is a pure function of contents ---------------------

    #[test]
    fn op_id_is_pure_function_of_contents(
        path in path_strategy(),
        content in content_strategy(),
    ) {
        let mut value = upsert_op("main", &path, &content);
        value["metadata"] = json!({"timestamp": NOW});
        let a = Operation::normalize(value.clone(), None, NOW).unwrap();
        let b = Operation::normalize(value, None, NOW).unwrap();
        prop_assert_eq!(&a.id, &b.id);
        prop_assert_eq!(a.id.clone(), a.computed_id().unwrap());
    }

    #[test]
    fn resubmitted_op_is_deduplicated(
        path in path_strategy(),
        content in content_strategy(),
    ) {
        let engine = engine();
        let mut op = upsert_op("main", &path, &content);
        op["metadata"] = json!({"timestamp": NOW});

        let mut first_cs = change_set("main", vec![op.clone()]);
        first_cs["metadata"] = json!({"message": "first"});
        let first = engine.submit(first_cs).unwrap();
        prop_assert!(first.ok);
        prop_assert!(!first.results[0].duplicate);

        // A different change set carrying the identical op.
        let mut second_cs = change_set("main", vec![op]);
        second_cs["metadata"] = json!({"message": "second"});
        let second = engine.submit(second_cs).unwrap();
        prop_assert!(second.ok);
        prop_assert!(!second.idempotent);
        prop_assert!(second.results[0].duplicate, "second submission reports duplicate");

        // One accepted record in the log.
        prop_assert_eq!(engine.to_snapshot().ops.len(), 1);
    }

    // -- invariant 2: all-or-nothing ----------------------------------------

    #[test]
    fn change_set_acceptance_is_atomic(
        contents in prop::collection::vec(content_strategy(), 1..5),
        fail_at in 0usize..5,
    ) {
        let engine = engine();
        let fail_at = fail_at.min(contents.len());
        // Distinct paths per op: in-set collisions are not what this
        // property exercises.
        let mut ops: Vec<serde_json::Value> = contents
            .iter()
            .enumerate()
            .map(|(i, content)| upsert_op("main", &format!("f{i}.txt"), content))
            .collect();
        let failing_set = fail_at < ops.len();
        if failing_set {
            ops[fail_at]["preconditions"] = json!([{"kind": "symbol_exists"}]);
        }

        let outcome = engine.submit(change_set("main", ops.clone())).unwrap();
        if failing_set {
            prop_assert_eq!(outcome.status, ChangeSetStatus::Conflicted);
            prop_assert!(outcome.accepted.is_empty());
            prop_assert!(!outcome.conflicts.is_empty());
            for (i, result) in outcome.results.iter().enumerate() {
                let expected = match i.cmp(&fail_at) {
                    std::cmp::Ordering::Less => OpStatus::Accepted,
                    std::cmp::Ordering::Equal => OpStatus::Conflicted,
                    std::cmp::Ordering::Greater => OpStatus::Skipped,
                };
                prop_assert_eq!(result.status, expected, "op #{}", i);
            }
            prop_assert!(engine.materialize("main").unwrap().is_empty());
        } else {
            prop_assert_eq!(outcome.status, ChangeSetStatus::Accepted);
            prop_assert_eq!(outcome.accepted.len(), ops.len());
            prop_assert!(outcome.conflicts.is_empty());
        }
    }

    // -- invariant 3 / 6: materialization determinism, head coherence -------

    #[test]
    fn equal_histories_materialize_identically(
        writes in prop::collection::vec((path_strategy(), content_strategy()), 1..8),
    ) {
        let a = engine();
        let b = engine();
        for (path, content) in &writes {
            // Identical op sequences; later writes to the same path descend
            // from the current head so both engines accept everything.
            for engine in [&a, &b] {
                let mut op = upsert_op("main", path, content);
                if let Some(head) = engine
                    .symbol_head("main", &common::document_symbol(path))
                    .unwrap()
                {
                    op["parents"] = json!([head.to_string()]);
                }
                let outcome = engine.submit(change_set("main", vec![op])).unwrap();
                prop_assert!(outcome.ok, "{:?}", outcome.conflict_details);
            }
        }
        prop_assert_eq!(a.materialize("main").unwrap(), b.materialize("main").unwrap());

        // Reload determinism on top.
        let reloaded = forge::engine::Engine::from_snapshot(a.to_snapshot(), common::adapters());
        prop_assert_eq!(a.materialize("main").unwrap(), reloaded.materialize("main").unwrap());
    }

    #[test]
    fn symbol_head_points_at_a_writer(
        writes in prop::collection::vec((path_strategy(), content_strategy()), 1..8),
    ) {
        let engine = engine();
        for (path, content) in &writes {
            let mut op = upsert_op("main", path, content);
            if let Some(head) = engine
                .symbol_head("main", &common::document_symbol(path))
                .unwrap()
            {
                op["parents"] = json!([head.to_string()]);
            }
            prop_assert!(engine.submit(change_set("main", vec![op])).unwrap().ok);
        }

        for (path, _) in &writes {
            let symbol = common::document_symbol(path);
            let head = engine.symbol_head("main", &symbol).unwrap().unwrap();
            let op = engine.get_op(head.as_str()).unwrap();
            prop_assert!(
                op.writes.iter().any(|w| w.to_string() == symbol),
                "head {} must write {}",
                head,
                symbol
            );
        }
    }

    // -- invariant 5: canonical order is strictly increasing ----------------

    #[test]
    fn canonical_order_increases_monotonically(
        writes in prop::collection::vec((path_strategy(), content_strategy()), 2..8),
    ) {
        let engine = engine();
        for (path, content) in &writes {
            let mut op = upsert_op("main", path, content);
            if let Some(head) = engine
                .symbol_head("main", &common::document_symbol(path))
                .unwrap()
            {
                op["parents"] = json!([head.to_string()]);
            }
            prop_assert!(engine.submit(change_set("main", vec![op])).unwrap().ok);
        }

        let snapshot = engine.to_snapshot();
        let orders: Vec<u64> = snapshot
            .ops
            .iter()
            .map(|op| op.canonical_order.unwrap())
            .collect();
        for window in orders.windows(2) {
            prop_assert!(window[0] < window[1], "orders: {:?}", orders);
        }
    }
}
