//! Entity graph benchmarks: mutation, save cycles and persistence.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use entigraph_codec::{Operation, Value};
use entigraph_core::{PointerMode, Session};
use entigraph_storage::{FileBlobStore, InMemoryBlobStore};
use serde_json::json;
use tempfile::tempdir;

/// Benchmark composing a run of operations on one field.
fn bench_mutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutation");

    for count in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("increments", count), &count, |b, &count| {
            let session = Session::new();
            b.iter(|| {
                let node = session.create("Counter");
                let mut entity = node.write();
                for _ in 0..count {
                    entity.increment("hits", 1i64).unwrap();
                }
                black_box(entity.get_i64("hits"));
            });
        });

        group.bench_with_input(BenchmarkId::new("add_unique", count), &count, |b, &count| {
            let session = Session::new();
            b.iter(|| {
                let node = session.create("Tagged");
                let mut entity = node.write();
                for i in 0..count {
                    entity
                        .add_unique("tags", vec![Value::from((i % 17) as i64)])
                        .unwrap();
                }
                black_box(entity.get_list("tags"));
            });
        });
    }

    group.bench_function("compose_pair", |b| {
        let earlier = Operation::Increment(3i64.into());
        let later = Operation::Increment(4i64.into());
        b.iter(|| black_box(Operation::compose(black_box(&earlier), black_box(&later)).unwrap()));
    });

    group.finish();
}

/// Benchmark a full local save cycle.
fn bench_save_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_cycle");

    group.bench_function("create_flush_complete", |b| {
        let session = Session::new();
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let node = session.create("Game");
            node.write().set("score", 140i64).unwrap();
            let (flush, body) = session.begin_save(&node, PointerMode::Strict).unwrap();
            black_box(body);
            session
                .complete_save(&node, &flush, &json!({"objectId": format!("g{counter}")}))
                .unwrap();
        });
    });

    group.finish();
}

/// Benchmark writing and reading cached entities.
fn bench_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");
    let session = Session::new();
    let node = session.create("Game");
    {
        let mut entity = node.write();
        entity.set("score", 140i64).unwrap();
        entity.set("player", "ann").unwrap();
        entity.set("tags", vec![Value::from("a"), Value::from("b")]).unwrap();
    }
    let (flush, _) = session.begin_save(&node, PointerMode::Strict).unwrap();
    session
        .complete_save(&node, &flush, &json!({"objectId": "g1"}))
        .unwrap();

    let memory = InMemoryBlobStore::new();
    group.bench_function("memory_round_trip", |b| {
        b.iter(|| {
            session.save_to_store(&memory, "game", &node).unwrap();
            black_box(session.load_from_store(&memory, "game").unwrap());
        });
    });

    let dir = tempdir().unwrap();
    let files = FileBlobStore::open(dir.path()).unwrap();
    group.bench_function("file_round_trip", |b| {
        b.iter(|| {
            session.save_to_store(&files, "game", &node).unwrap();
            black_box(session.load_from_store(&files, "game").unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_mutation, bench_save_cycle, bench_persistence);
criterion_main!(benches);
