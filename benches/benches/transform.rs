//! Benchmarks for the parallel transform layer.
//!
//! Performance-critical paths:
//! - `map_vec`: indexed write-once slots
//! - `flat_map_vec`: concatenation of per-element sequences
//! - `map_hash_map`: mutex-guarded merge
//! - `map_index_map`: indexed slots followed by ordered replay

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::collections::HashMap;
use tokio::runtime::Runtime;

const SIZES: [usize; 3] = [64, 1024, 8192];

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_map_vec(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("transform/map_vec");

    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let input: Vec<u64> = (0..size as u64).collect();
                let out = fanout::map_vec(8, input, |_ctx, n: u64| async move { Ok(n.wrapping_mul(31)) })
                    .await
                    .unwrap();
                black_box(out);
            });
        });
    }

    group.finish();
}

fn bench_flat_map_vec(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("transform/flat_map_vec");

    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let input: Vec<u64> = (0..size as u64).collect();
                let out = fanout::flat_map_vec(8, input, |_ctx, n: u64| async move { Ok(vec![n; 4]) })
                    .await
                    .unwrap();
                black_box(out);
            });
        });
    }

    group.finish();
}

fn bench_maps(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("transform/maps");

    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("hash_map", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let input: HashMap<u64, u64> = (0..size as u64).map(|n| (n, n)).collect();
                let out = fanout::map_hash_map(8, input, |_ctx, k: u64, v: u64| async move { Ok((k, v + 1)) })
                    .await
                    .unwrap();
                black_box(out);
            });
        });
        group.bench_with_input(BenchmarkId::new("index_map", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let input: indexmap::IndexMap<u64, u64> = (0..size as u64).map(|n| (n, n)).collect();
                let out = fanout::map_index_map(8, input, |_ctx, k: u64, v: u64| async move { Ok((k, v + 1)) })
                    .await
                    .unwrap();
                black_box(out);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_map_vec, bench_flat_map_vec, bench_maps);
criterion_main!(benches);
