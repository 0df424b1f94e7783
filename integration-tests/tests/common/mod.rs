//! Shared test utilities for integration tests.
//!
//! Provides instrumented work units that record how many of them run at
//! once and whether they observed cancellation.

#![allow(dead_code)]

use fanout::{BoxError, Task, task};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Tracks the number of units currently running and the highest value seen.
#[derive(Debug, Default)]
pub struct Gauge {
    running: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

impl Gauge {
    /// Creates a shared gauge.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks a unit as running for `hold`.
    pub async fn hold(&self, hold: Duration) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(hold).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    /// Highest number of units observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of units that ran to completion.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

/// A unit that holds the gauge for `hold` and then succeeds.
pub fn gauged(gauge: &Arc<Gauge>, hold: Duration) -> Task {
    let gauge = Arc::clone(gauge);
    task(move |_ctx| async move {
        gauge.hold(hold).await;
        Ok(())
    })
}

/// A unit that fails immediately with `message`.
pub fn failing(message: &'static str) -> Task {
    task(move |_ctx| async move { Err(BoxError::from(message)) })
}

/// A unit that sleeps for `nap`, then counts itself in `observed` if its
/// context was canceled by then.
pub fn napping(nap: Duration, observed: &Arc<AtomicUsize>) -> Task {
    let observed = Arc::clone(observed);
    task(move |ctx| async move {
        tokio::time::sleep(nap).await;
        if ctx.err().is_some() {
            observed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    })
}
