//! Integration tests for batch execution.
//!
//! Covers the concurrency bound, cancellation propagation, panic isolation,
//! deadlines, and executor reuse across batches.

use anyhow::Result;
use fanout::{BoxError, Context, ContextError, Error, Executor, Task, task};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

mod common;

#[derive(Debug, PartialEq)]
struct Boom(&'static str);

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

impl std::error::Error for Boom {}

fn boom(label: &'static str) -> Task {
    task(move |_ctx| async move { Err(BoxError::from(Boom(label))) })
}

// =============================================================================
// Concurrency bound
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_units_never_exceed_bound() -> Result<()> {
    for bound in [1, 2, 3, 5] {
        let gauge = common::Gauge::new();
        let units: Vec<Task> = (0..bound * 3 + 1)
            .map(|_| common::gauged(&gauge, Duration::from_millis(15)))
            .collect();

        fanout::run(bound, units).await?;

        assert!(
            gauge.peak() <= bound,
            "bound {bound} exceeded: peak {}",
            gauge.peak()
        );
        assert_eq!(gauge.finished(), bound * 3 + 1);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executor_from_settings_respects_concurrency() -> Result<()> {
    let settings = fanout::Settings {
        concurrency: 2,
        capture_stack: false,
    };
    let executor = Executor::from_settings(&settings);
    let gauge = common::Gauge::new();
    let units: Vec<Task> = (0..6)
        .map(|_| common::gauged(&gauge, Duration::from_millis(10)))
        .collect();

    fanout::run_with(&Context::background(), &executor, units).await?;
    executor.close().await?;

    assert!(gauge.peak() <= 2);
    Ok(())
}

// =============================================================================
// Cancellation
// =============================================================================

/// `run(2, f1, f2, f3)` where `f2` fails and the others nap then check the context.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_cancels_siblings() {
    let observed = Arc::new(AtomicUsize::new(0));
    let units = vec![
        common::napping(Duration::from_millis(50), &observed),
        boom("f2"),
        common::napping(Duration::from_millis(50), &observed),
    ];

    let err = fanout::run(2, units).await.unwrap_err();

    assert_eq!(err.find::<Boom>(), Some(&Boom("f2")));
    // f1 was already running and sees the canceled context after its nap.
    // f3 either does the same or is rejected before it starts.
    let observed = observed.load(Ordering::SeqCst);
    assert!(observed >= 1);
    if observed == 1 {
        assert!(err.is_cancellation());
    }
}

#[tokio::test]
async fn test_every_failure_is_reported() {
    let units = vec![boom("a"), boom("b"), boom("c")];

    let err = fanout::run(0, units).await.unwrap_err();

    let Error::Aggregate(errors) = &err else {
        panic!("expected aggregate, got {err:?}");
    };
    assert_eq!(errors.len(), 3);
    let mut labels: Vec<_> = err
        .iter()
        .filter_map(|leaf| match leaf {
            Error::Unit(inner) => inner.downcast_ref::<Boom>().map(|b| b.0),
            _ => None,
        })
        .collect();
    labels.sort_unstable();
    assert_eq!(labels, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_rejects_waiting_units() {
    let (ctx, _cancel) = Context::background().with_timeout(Duration::from_millis(20));
    let gauge = common::Gauge::new();
    let units = vec![
        common::gauged(&gauge, Duration::from_millis(50)),
        common::gauged(&gauge, Duration::from_millis(50)),
    ];

    let err = fanout::run_ctx(&ctx, 1, units).await.unwrap_err();

    assert_eq!(err.find::<ContextError>(), Some(&ContextError::DeadlineExceeded));
    assert_eq!(gauge.finished(), 1);
}

#[tokio::test]
async fn test_parent_cancel_after_start() {
    let (ctx, cancel) = Context::background().with_cancel();
    let started = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&started);

    let units = vec![
        task(move |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
            Ok(())
        }),
        task(move |ctx| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.check()?;
            Ok(())
        }),
    ];

    let err = fanout::run_ctx(&ctx, 1, units).await.unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(started.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Panic isolation
// =============================================================================

async fn explode() -> Result<(), BoxError> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    panic!("unit exploded");
}

#[tokio::test]
async fn test_panic_is_isolated_from_siblings() {
    let gauge = common::Gauge::new();
    let units = vec![
        common::gauged(&gauge, Duration::from_millis(20)),
        task(|_ctx| explode()),
        common::gauged(&gauge, Duration::from_millis(20)),
        common::gauged(&gauge, Duration::from_millis(20)),
    ];

    let err = fanout::run(0, units).await.unwrap_err();

    assert!(err.is_panic());
    let Some(Error::Panicked { message, stack }) = err.iter().find(|leaf| leaf.is_panic()) else {
        panic!("expected a recovered panic, got {err:?}");
    };
    assert!(message.contains("unit exploded"));
    assert!(!stack.is_empty());
    assert_eq!(gauge.finished(), 3);
}

// =============================================================================
// Executor lifecycle
// =============================================================================

#[tokio::test]
async fn test_executor_reused_across_batches() -> Result<()> {
    let executor = Executor::builder().slots(2).build();
    let ctx = Context::background();
    let gauge = common::Gauge::new();

    for _ in 0..3 {
        let units: Vec<Task> = (0..4)
            .map(|_| common::gauged(&gauge, Duration::from_millis(1)))
            .collect();
        fanout::run_with(&ctx, &executor, units).await?;
    }
    assert_eq!(gauge.finished(), 12);

    executor.close().await?;
    let err = fanout::run_with(&ctx, &executor, [common::gauged(&gauge, Duration::ZERO)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert!(matches!(executor.close().await, Err(Error::Closed)));
    assert_eq!(gauge.finished(), 12);
    Ok(())
}

#[tokio::test]
async fn test_nested_batch_error_is_searchable() {
    let outer = vec![task(|ctx| async move {
        fanout::run_ctx(&ctx, 2, [boom("inner"), common::failing("plain")])
            .await
            .map_err(BoxError::from)
    })];

    let err = fanout::run(1, outer).await.unwrap_err();

    assert!(err.contains::<Boom>());
    assert_eq!(err.len(), 2);
}
