//! Batch orchestration: run a set of units under one cancellation scope.
//!
//! [`run`] and [`run_ctx`] build a fresh [`Executor`] per call. [`run_with`]
//! and [`Batch::on`] reuse a caller-owned executor across batches and leave
//! its lifecycle to the caller.

use tracing::{debug, instrument};

use crate::collector::Collector;
use crate::config::Settings;
use crate::context::Context;
use crate::error::Error;
use crate::executor::{Executor, Task};

/// Runs `units` with at most `bound` in flight.
///
/// A `bound` of zero runs every unit at once.
///
/// # Errors
///
/// Returns the single failure, or [`Error::Aggregate`] when more than one
/// unit failed. The first failure cancels the units that have not started.
pub async fn run(bound: usize, units: impl IntoIterator<Item = Task>) -> Result<(), Error> {
    run_ctx(&Context::background(), bound, units).await
}

/// Like [`run`], with the batch context derived from `ctx`.
///
/// # Errors
///
/// See [`run`]. Canceling `ctx`, or letting its deadline pass, makes the
/// units that have not started fail with [`Error::Context`].
pub async fn run_ctx(
    ctx: &Context,
    bound: usize,
    units: impl IntoIterator<Item = Task>,
) -> Result<(), Error> {
    let units: Vec<Task> = units.into_iter().collect();
    let bound = if bound < 1 { units.len() } else { bound };

    let executor = Executor::new(bound);
    let mut errors = drive(ctx, &executor, units).await;
    if let Err(err) = executor.close().await {
        errors.push(err);
    }
    Error::join(errors).map_or(Ok(()), Err)
}

/// Runs `units` on a caller-owned executor. The executor is left open.
///
/// # Errors
///
/// See [`run`]. A closed executor rejects every unit with [`Error::Closed`].
pub async fn run_with(
    ctx: &Context,
    executor: &Executor,
    units: impl IntoIterator<Item = Task>,
) -> Result<(), Error> {
    let units: Vec<Task> = units.into_iter().collect();
    let errors = drive(ctx, executor, units).await;
    Error::join(errors).map_or(Ok(()), Err)
}

#[instrument(name = "batch", skip_all, fields(units = units.len(), bound = executor.slots()))]
async fn drive(ctx: &Context, executor: &Executor, units: Vec<Task>) -> Vec<Error> {
    let count = units.len();
    debug!("launching batch");

    let (batch_ctx, cancel) = ctx.with_cancel();
    let gate = cancel.clone();
    // Cancels on every exit, including the caller dropping this future.
    let _scope = cancel.drop_guard();
    let mut collector = Collector::new(executor, move || gate.cancel(), count);

    collector.launch(&batch_ctx, units).await;
    let errors = collector.collect(count).await;
    collector.cleanup().await;

    debug!(errors = errors.len(), "batch finished");
    errors
}

#[derive(Debug, Clone, Copy)]
enum Target<'e> {
    Bound(usize),
    Executor(&'e Executor),
}

/// Reusable batch configuration: a context plus either a bound or an executor.
///
/// The transform layer hangs off this type, so every `map_*` and
/// `flat_map_*` operation is available with a custom context and with a
/// shared executor.
///
/// ```no_run
/// use fanout::{Batch, Context};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), fanout::Error> {
/// let (ctx, _cancel) = Context::background().with_timeout(Duration::from_secs(5));
/// let doubled = Batch::new(4)
///     .context(ctx)
///     .map_vec(vec![1, 2, 3], |_ctx, n: i32| async move { Ok(n * 2) })
///     .await?;
/// assert_eq!(doubled, vec![2, 4, 6]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Batch<'e> {
    ctx: Context,
    target: Target<'e>,
}

impl Batch<'static> {
    /// A batch that builds a fresh executor with `bound` slots per call.
    ///
    /// A `bound` of zero gives every unit its own slot.
    #[must_use]
    pub fn new(bound: usize) -> Self {
        Self {
            ctx: Context::background(),
            target: Target::Bound(bound),
        }
    }

    /// A batch bounded by the configured concurrency.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.concurrency)
    }
}

impl<'e> Batch<'e> {
    /// A batch that runs on a shared executor, which it never closes.
    #[must_use]
    pub fn on(executor: &'e Executor) -> Self {
        Self {
            ctx: Context::background(),
            target: Target::Executor(executor),
        }
    }

    /// Sets the parent context of every batch run through this value.
    #[must_use]
    pub fn context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    /// The parent context.
    #[must_use]
    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// Runs `units` as one batch.
    ///
    /// # Errors
    ///
    /// See [`run`].
    pub async fn run(&self, units: impl IntoIterator<Item = Task>) -> Result<(), Error> {
        match self.target {
            Target::Bound(bound) => run_ctx(&self.ctx, bound, units).await,
            Target::Executor(executor) => run_with(&self.ctx, executor, units).await,
        }
    }
}
