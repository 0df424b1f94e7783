//! Bounded executor for work units.
//!
//! An [`Executor`] owns a fixed number of slots (semaphore permits). Each
//! submitted unit waits for a slot, runs on its own tokio task, and gives the
//! slot back once its completion callback has returned. Panics raised by a
//! unit are caught here and reported as [`Error::Panicked`].

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::config::Settings;
use crate::context::Context;
use crate::error::{BoxError, Error};

/// A unit of deferred work: invoked at most once with the batch context.
pub type Task = Box<dyn FnOnce(Context) -> BoxFuture<'static, Result<(), BoxError>> + Send + 'static>;

/// Boxes an async closure into a [`Task`].
///
/// ```
/// use fanout::{task, Context};
///
/// let unit = task(|ctx: Context| async move {
///     ctx.check()?;
///     Ok(())
/// });
/// # drop(unit);
/// ```
pub fn task<F, Fut>(f: F) -> Task
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Box::new(move |ctx| f(ctx).boxed())
}

/// Largest slot count the underlying semaphore can hand out in one `acquire_many`.
fn max_slots() -> usize {
    Semaphore::MAX_PERMITS.min(u32::MAX as usize)
}

/// Runs work units with at most `slots` of them in flight.
#[derive(Debug)]
pub struct Executor {
    slots: usize,
    capture_stack: bool,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
    closing: CancellationToken,
}

impl Executor {
    /// Creates an executor with `slots` concurrent slots. Zero is treated as one.
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self::builder().slots(slots).build()
    }

    /// Creates an executor from loaded [`Settings`].
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::builder()
            .slots(settings.concurrency)
            .capture_stack(settings.capture_stack)
            .build()
    }

    /// Returns a builder for configuring an executor.
    #[must_use]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    /// Number of slots, i.e. the concurrency bound.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Number of units currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        if self.semaphore.is_closed() {
            return 0;
        }
        self.slots.saturating_sub(self.semaphore.available_permits())
    }

    /// Returns `true` once [`Executor::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Submits a unit for execution.
    ///
    /// Waits until a slot is free, the context is done, or the executor is
    /// closed, whichever happens first. In the last two cases the unit is
    /// dropped without running and `on_done` is called right away with
    /// [`Error::Context`] or [`Error::Closed`]. Otherwise the unit is spawned
    /// and `on_done` receives its outcome when it finishes.
    pub async fn submit<F>(&self, ctx: &Context, unit: Task, on_done: F)
    where
        F: FnOnce(Result<(), Error>) + Send + 'static,
    {
        let acquired = tokio::select! {
            biased;
            () = self.closing.cancelled() => Err(Error::Closed),
            cause = ctx.done() => Err(Error::Context(cause)),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.map_err(|_| Error::Closed),
        };

        let permit = match acquired.and_then(|permit| self.admit(permit)) {
            Ok(permit) => permit,
            Err(err) => {
                drop(unit);
                on_done(Err(err));
                return;
            }
        };

        let ctx = ctx.clone();
        let capture_stack = self.capture_stack;
        tokio::spawn(async move {
            let outcome = run_unit(ctx, unit, capture_stack).await;
            on_done(outcome);
            drop(permit);
        });
    }

    /// Re-checks the closed flag after a slot was acquired. A close that
    /// started while we were waiting wins and the slot goes straight back.
    fn admit(&self, permit: OwnedSemaphorePermit) -> Result<OwnedSemaphorePermit, Error> {
        if self.is_closed() {
            drop(permit);
            trace!("slot acquired after close, rejecting unit");
            return Err(Error::Closed);
        }
        Ok(permit)
    }

    /// Closes the executor and waits for every in-flight unit to finish.
    ///
    /// Units still waiting for a slot are rejected with [`Error::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the executor was already closed.
    pub async fn close(&self) -> Result<(), Error> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Closed);
        }
        self.closing.cancel();

        trace!(slots = self.slots, in_flight = self.in_flight(), "draining executor");
        let permits = u32::try_from(self.slots).unwrap_or(u32::MAX);
        let drained = self.semaphore.acquire_many(permits).await;
        drop(drained);
        self.semaphore.close();
        Ok(())
    }
}

/// Builder for [`Executor`].
#[derive(Debug, Clone)]
pub struct ExecutorBuilder {
    slots: usize,
    capture_stack: bool,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self {
            slots: 1,
            capture_stack: true,
        }
    }
}

impl ExecutorBuilder {
    /// Sets the number of concurrent slots. Zero is treated as one.
    #[must_use]
    pub fn slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    /// Sets whether a stack trace is captured when a unit panics.
    #[must_use]
    pub fn capture_stack(mut self, capture: bool) -> Self {
        self.capture_stack = capture;
        self
    }

    /// Builds the executor.
    #[must_use]
    pub fn build(self) -> Executor {
        let slots = self.slots.clamp(1, max_slots());
        Executor {
            slots,
            capture_stack: self.capture_stack,
            semaphore: Arc::new(Semaphore::new(slots)),
            closed: AtomicBool::new(false),
            closing: CancellationToken::new(),
        }
    }
}

async fn run_unit(ctx: Context, unit: Task, capture_stack: bool) -> Result<(), Error> {
    if let Some(cause) = ctx.err() {
        return Err(Error::Context(cause));
    }

    let future = match std::panic::catch_unwind(AssertUnwindSafe(move || unit(ctx))) {
        Ok(future) => future,
        Err(payload) => return Err(recovered(payload.as_ref(), capture_stack)),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome.map_err(Error::Unit),
        Err(payload) => Err(recovered(payload.as_ref(), capture_stack)),
    }
}

fn recovered(payload: &(dyn Any + Send), capture_stack: bool) -> Error {
    let message = panic_message(payload);
    let stack = if capture_stack {
        Backtrace::force_capture().to_string()
    } else {
        String::new()
    };
    warn!(%message, "recovered panic in work unit");
    Error::Panicked { message, stack }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
