//! Fanout - bounded-concurrency task execution for tokio.
//!
//! This crate runs batches of fallible async work units with an upper bound
//! on how many run at once, a shared cancellation context, and panic
//! recovery at the executor boundary.
//!
//! # Features
//!
//! - **Executor**: semaphore-bounded dispatch with graceful close
//! - **Batches**: first failure cancels the units that have not started
//! - **Errors**: every failure of a batch is returned, never just the first
//! - **Transforms**: parallel `map` and `flat_map` over `Vec`, `HashMap`,
//!   `IndexMap`, `HashSet` and `IndexSet` with input order preserved for the
//!   ordered kinds
//!
//! # Example
//!
//! ```rust
//! use fanout::{task, BoxError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fanout::Error> {
//! fanout::run(2, [
//!     task(|_ctx| async { Ok(()) }),
//!     task(|ctx| async move {
//!         ctx.check()?;
//!         Ok::<_, BoxError>(())
//!     }),
//! ])
//! .await?;
//!
//! let doubled = fanout::map_vec(3, vec![1, 2, 3, 4, 5], |_ctx, n: i32| async move {
//!     Ok(n * 2)
//! })
//! .await?;
//! assert_eq!(doubled, vec![2, 4, 6, 8, 10]);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]

pub mod batch;
pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod telemetry;
pub mod transform;

// Re-export commonly used types
pub use batch::{Batch, run, run_ctx, run_with};
pub use collector::Collector;
pub use config::Settings;
pub use context::{CancelGuard, CancelHandle, Context, ContextError};
pub use error::{BoxError, Error};
pub use executor::{Executor, ExecutorBuilder, Task, task};
pub use telemetry::init_logging;
pub use transform::{
    flat_map_hash_map, flat_map_hash_set, flat_map_index_map, flat_map_index_set, flat_map_vec,
    for_each_vec, map_hash_map, map_hash_set, map_index_map, map_index_set, map_vec,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
