//! Launches a batch of units and gathers their outcomes.
//!
//! Successes and failures travel over two unbounded queues so a finishing
//! unit never waits on the consumer. The first failure cancels the batch
//! context through a single-shot gate; later failures are still collected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::task::TaskTracker;
use tracing::trace;

use crate::context::Context;
use crate::error::Error;
use crate::executor::{Executor, Task};

/// Fires the wrapped cancel action at most once.
struct CancelOnce {
    fired: AtomicBool,
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl CancelOnce {
    fn fire(&self) {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            trace!("first unit failed, canceling batch");
            (self.cancel)();
        }
    }
}

/// Drives one batch of units through an [`Executor`].
///
/// Usage is always `launch`, then `collect`, then `cleanup`.
pub struct Collector<'e> {
    executor: &'e Executor,
    cancel: Arc<CancelOnce>,
    size: usize,
    pending: TaskTracker,
    err_tx: UnboundedSender<Error>,
    err_rx: UnboundedReceiver<Error>,
    done_tx: UnboundedSender<()>,
    done_rx: UnboundedReceiver<()>,
}

impl std::fmt::Debug for Collector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("executor", &self.executor)
            .field("size", &self.size)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<'e> Collector<'e> {
    /// Creates a collector for a batch of `size` units.
    ///
    /// `cancel` is invoked at most once, on the first failing unit.
    pub fn new<C>(executor: &'e Executor, cancel: C, size: usize) -> Self
    where
        C: Fn() + Send + Sync + 'static,
    {
        let (err_tx, err_rx) = unbounded_channel();
        let (done_tx, done_rx) = unbounded_channel();
        Self {
            executor,
            cancel: Arc::new(CancelOnce {
                fired: AtomicBool::new(false),
                cancel: Box::new(cancel),
            }),
            size,
            pending: TaskTracker::new(),
            err_tx,
            err_rx,
            done_tx,
            done_rx,
        }
    }

    /// Batch size this collector was created for.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Submits every unit to the executor.
    ///
    /// Returns once all units have either been spawned or rejected; it does
    /// not wait for them to finish.
    pub async fn launch(&self, ctx: &Context, units: Vec<Task>) {
        for unit in units {
            let pending = self.pending.token();
            let cancel = Arc::clone(&self.cancel);
            let err_tx = self.err_tx.clone();
            let done_tx = self.done_tx.clone();

            self.executor
                .submit(ctx, unit, move |outcome| {
                    match outcome {
                        Ok(()) => {
                            let _ = done_tx.send(());
                        }
                        Err(err) => {
                            cancel.fire();
                            let _ = err_tx.send(err);
                        }
                    }
                    drop(pending);
                })
                .await;
        }
    }

    /// Waits for `count` outcomes, in completion order, and returns the errors among them.
    pub async fn collect(&mut self, count: usize) -> Vec<Error> {
        let mut errors = Vec::new();
        let mut seen = 0;
        while seen < count {
            tokio::select! {
                Some(err) = self.err_rx.recv() => errors.push(err),
                Some(()) = self.done_rx.recv() => {}
                else => break,
            }
            seen += 1;
        }
        errors
    }

    /// Waits until no completion callback is still running, then closes both queues.
    pub async fn cleanup(self) {
        self.pending.close();
        self.pending.wait().await;
        trace!(size = self.size, "collector drained");
    }
}
