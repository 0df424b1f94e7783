//! Error types for the execution engine.
//!
//! Every failure of a batch is reported through [`Error`]. Batches that fail
//! in more than one place return [`Error::Aggregate`], which keeps each
//! constituent error by value so callers can still match on them.

use thiserror::Error;

use crate::context::ContextError;

/// Boxed error returned by work units and transforms.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the executor, a batch, or the transform layer.
#[derive(Error, Debug)]
pub enum Error {
    /// The executor was closed before the unit could run, or was closed twice.
    #[error("executor is closed")]
    Closed,

    /// The shared context was canceled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The work unit returned an error.
    #[error(transparent)]
    Unit(BoxError),

    /// The work unit panicked; the panic was caught at the executor boundary.
    #[error("work unit panicked: {message}")]
    Panicked {
        /// The panic payload rendered as text.
        message: String,
        /// Stack captured where the panic was recovered. Empty when capture is disabled.
        stack: String,
    },

    /// Two or more errors collected from one batch.
    #[error("{}", render_aggregate(.0))]
    Aggregate(Vec<Error>),

    /// Output slots were not all filled when the batch reported success.
    #[error("batch output incomplete")]
    Incomplete,
}

fn render_aggregate(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Wraps a unit-level error.
    pub fn unit(err: impl Into<BoxError>) -> Self {
        Self::Unit(err.into())
    }

    /// Folds errors into one.
    ///
    /// Returns `None` for no errors, the error itself when there is exactly
    /// one, and a flat [`Error::Aggregate`] otherwise. Nested aggregates are
    /// spliced in rather than wrapped again.
    pub fn join(errors: impl IntoIterator<Item = Error>) -> Option<Error> {
        let mut flat = Vec::new();
        for err in errors {
            match err {
                Self::Aggregate(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Self::Aggregate(flat)),
        }
    }

    /// Iterates over the leaf errors.
    ///
    /// Aggregates are flattened, and so is a unit error that itself carries
    /// an [`Error`] (for example a nested batch).
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves.into_iter()
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Error>) {
        match self {
            Self::Aggregate(errors) => {
                for err in errors {
                    err.collect_leaves(out);
                }
            }
            Self::Unit(inner) => match inner.downcast_ref::<Error>() {
                Some(nested) => nested.collect_leaves(out),
                None => out.push(self),
            },
            _ => out.push(self),
        }
    }

    /// Number of leaf errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Always `false`: an error has at least one leaf.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Finds the first leaf that is, or wraps, an error of type `E`.
    #[must_use]
    pub fn find<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.iter().find_map(|leaf| match leaf {
            Self::Unit(inner) => inner.downcast_ref::<E>(),
            Self::Context(cause) => (cause as &(dyn std::error::Error + 'static)).downcast_ref::<E>(),
            _ => None,
        })
    }

    /// Returns `true` if any leaf is, or wraps, an error of type `E`.
    #[must_use]
    pub fn contains<E>(&self) -> bool
    where
        E: std::error::Error + 'static,
    {
        self.find::<E>().is_some()
    }

    /// Returns `true` if any leaf reports cancellation or an elapsed deadline.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.contains::<ContextError>()
    }

    /// Returns `true` if any leaf is a recovered panic.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        self.iter().any(|leaf| matches!(leaf, Self::Panicked { .. }))
    }
}
