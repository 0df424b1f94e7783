//! Benchmarks for batch dispatch.
//!
//! Performance-critical paths:
//! - `run`: executor construction, semaphore dispatch and outcome collection
//! - `run_with`: dispatch on a reused executor
//! - panic recovery with and without stack capture

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use fanout::{BoxError, Context, Executor, Task, task};
use tokio::runtime::Runtime;

fn noop_units(count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| {
            task(move |_ctx| async move {
                black_box(i);
                Ok(())
            })
        })
        .collect()
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_run(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("batch/run");

    for count in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(count as u64));
        for bound in [1usize, 8, 0] {
            group.bench_with_input(
                BenchmarkId::new(format!("bound_{bound}"), count),
                &count,
                |b, &count| {
                    b.to_async(&rt)
                        .iter(|| async move { fanout::run(bound, noop_units(count)).await.unwrap() });
                },
            );
        }
    }

    group.finish();
}

fn bench_run_with_shared_executor(c: &mut Criterion) {
    let rt = runtime();
    let executor = Executor::new(8);
    let ctx = Context::background();
    let mut group = c.benchmark_group("batch/run_with");

    for count in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&rt)
                .iter(|| async { fanout::run_with(&ctx, &executor, noop_units(count)).await.unwrap() });
        });
    }

    group.finish();
    rt.block_on(executor.close()).unwrap();
}

async fn explode() -> Result<(), BoxError> {
    panic!("bench panic");
}

fn bench_panic_recovery(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("batch/panic_recovery");
    std::panic::set_hook(Box::new(|_| {}));

    for capture_stack in [false, true] {
        let executor = Executor::builder().slots(4).capture_stack(capture_stack).build();
        group.bench_function(BenchmarkId::new("capture_stack", capture_stack), |b| {
            b.to_async(&rt).iter(|| async {
                let units = vec![task(|_ctx| explode())];
                let err = fanout::run_with(&Context::background(), &executor, units)
                    .await
                    .unwrap_err();
                black_box(err);
            });
        });
        rt.block_on(executor.close()).unwrap();
    }

    let _ = std::panic::take_hook();
    group.finish();
}

criterion_group!(
    benches,
    bench_run,
    bench_run_with_shared_executor,
    bench_panic_recovery
);
criterion_main!(benches);
