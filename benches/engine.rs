//! Criterion micro-benchmarks: content hashing, submission, and
//! materialization.

use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use serde_json::json;

use forge::adapters::Adapters;
use forge::engine::Engine;
use forge::model::hash::{canonical_json, content_hash_value};
use forge::parser::fallback::RegexParser;

fn engine() -> Engine {
    Engine::new(Adapters::new(Arc::new(RegexParser::new())))
}

fn upsert(state: &str, path: &str, content: &str) -> serde_json::Value {
    let symbol = format!("sym://text/{path}#document");
    json!({
        "state": state,
        "ops": [{
            "target": {"symbol_id": symbol},
            "writes": [symbol],
            "effect": {"kind": "upsert_file", "path": path, "content": content},
        }],
    })
}

fn bench_canonical_hash(c: &mut Criterion) {
    let value = json!({
        "state": "main",
        "parents": ["op_aaaaaaaaaaaaaaaaaaaa"],
        "effect": {"kind": "upsert_file", "path": "src/deep/module.py", "content": "def f():\n    pass\n".repeat(40)},
        "metadata": {"author": "bench", "timestamp": "2026-03-01T12:00:00Z"},
    });
    c.bench_function("canonical_json", |b| b.iter(|| canonical_json(&value)));
    c.bench_function("content_hash_value", |b| {
        b.iter(|| content_hash_value(&value));
    });
}

fn bench_submit(c: &mut Criterion) {
    c.bench_function("submit_100_upserts", |b| {
        b.iter_batched(
            engine,
            |engine| {
                for i in 0..100 {
                    let cs = upsert("main", &format!("f{i}.txt"), "content\n");
                    engine.submit(cs).expect("accepted");
                }
                engine
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_materialize(c: &mut Criterion) {
    let engine = engine();
    for i in 0..200 {
        engine
            .submit(upsert("main", &format!("f{i}.txt"), "content\n"))
            .expect("accepted");
    }
    c.bench_function("materialize_200_files", |b| {
        b.iter(|| engine.materialize("main").expect("state exists"));
    });
}

criterion_group!(benches, bench_canonical_hash, bench_submit, bench_materialize);
criterion_main!(benches);
