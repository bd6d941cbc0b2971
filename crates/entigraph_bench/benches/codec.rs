//! Wire codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use entigraph_bench::{flat_record, int_list, nested_value, random_data};
use entigraph_codec::{decode, encode, PlainContext, StrictPointers, UnresolvedLocalIds, Value};

/// Benchmark encoding values to wire JSON.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let lookup = UnresolvedLocalIds;
    let strategy = StrictPointers::new(&lookup);

    group.bench_function("flat_record", |b| {
        let value = flat_record();
        b.iter(|| black_box(encode(black_box(&value), &strategy).unwrap()));
    });

    for size in [64usize, 1024, 16 * 1024] {
        let value = Value::Bytes(random_data(size));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("bytes", size), &value, |b, value| {
            b.iter(|| black_box(encode(black_box(value), &strategy).unwrap()));
        });
    }

    for (depth, width) in [(2usize, 4usize), (3, 4), (4, 4)] {
        let value = nested_value(depth, width);
        group.bench_with_input(
            BenchmarkId::new("nested", format!("{depth}x{width}")),
            &value,
            |b, value| b.iter(|| black_box(encode(black_box(value), &strategy).unwrap())),
        );
    }

    group.finish();
}

/// Benchmark decoding wire JSON.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let lookup = UnresolvedLocalIds;
    let strategy = StrictPointers::new(&lookup);

    let flat = encode(&flat_record(), &strategy).unwrap();
    group.bench_function("flat_record", |b| {
        b.iter(|| black_box(decode(black_box(&flat), &PlainContext).unwrap()));
    });

    for len in [10usize, 100, 1000] {
        let json = encode(&int_list(len), &strategy).unwrap();
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("int_list", len), &json, |b, json| {
            b.iter(|| black_box(decode(black_box(json), &PlainContext).unwrap()));
        });
    }

    let text = encode(&nested_value(3, 4), &strategy).unwrap().to_string();
    group.bench_function("nested_from_text", |b| {
        b.iter(|| {
            let json: serde_json::Value = serde_json::from_str(black_box(&text)).unwrap();
            black_box(decode(&json, &PlainContext).unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
