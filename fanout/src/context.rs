//! Cancellable execution context.
//!
//! A [`Context`] is handed to every work unit. It can be canceled through the
//! [`CancelHandle`] returned when it was derived, or it can expire when its
//! deadline passes. Cancellation flows from parent to child, never upwards.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Reason a context is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context, or one of its ancestors, was canceled.
    #[error("context canceled")]
    Canceled,
    /// The deadline of the context, or of one of its ancestors, has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    /// Effective deadline: the earliest of this context and its ancestors.
    deadline: Option<Instant>,
    cause: OnceLock<ContextError>,
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn err(&self) -> Option<ContextError> {
        if let Some(cause) = self.cause.get() {
            return Some(*cause);
        }
        if let Some(cause) = self.parent.as_ref().and_then(|parent| parent.err()) {
            return Some(cause);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }
}

/// Shared, cloneable cancellation scope passed to work units.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Returns a root context that is never canceled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                deadline: None,
                cause: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Derives a child context together with the handle that cancels it.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        self.derive(self.inner.deadline)
    }

    /// Derives a child context that expires at `deadline`.
    ///
    /// A parent deadline that is earlier still applies.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        let effective = match self.inner.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        self.derive(Some(effective))
    }

    /// Derives a child context that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    fn derive(&self, deadline: Option<Instant>) -> (Self, CancelHandle) {
        let inner = Arc::new(Inner {
            token: self.inner.token.child_token(),
            deadline,
            cause: OnceLock::new(),
            parent: Some(Arc::clone(&self.inner)),
        });
        let handle = CancelHandle {
            inner: Arc::clone(&inner),
        };
        (Self { inner }, handle)
    }

    /// Returns why the context is done, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        self.inner.err()
    }

    /// Returns `true` while the context is neither canceled nor expired.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.err().is_none()
    }

    /// Returns `Err` with the cause once the context is done.
    ///
    /// Convenient as a checkpoint inside a work unit: `ctx.check()?`.
    ///
    /// # Errors
    ///
    /// Returns the [`ContextError`] describing why the context is done.
    pub fn check(&self) -> Result<(), ContextError> {
        self.err().map_or(Ok(()), Err)
    }

    /// The effective deadline of this context, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Waits until the context is canceled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        if let Some(cause) = self.err() {
            return cause;
        }
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.inner.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
        self.err().unwrap_or(ContextError::Canceled)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

/// Cancels the context it was created with, and all of that context's children.
///
/// Calling [`CancelHandle::cancel`] more than once has no further effect.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    /// Cancels the associated context.
    ///
    /// The first recorded cause wins, so canceling an already expired context
    /// keeps reporting [`ContextError::DeadlineExceeded`].
    pub fn cancel(&self) {
        let cause = self.inner.err().unwrap_or(ContextError::Canceled);
        if self.inner.cause.set(cause).is_ok() {
            trace!(%cause, "context canceled");
        }
        self.inner.token.cancel();
    }

    /// Returns `true` once this handle's context has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.cause.get().is_some()
    }

    /// Wraps the handle in a guard that cancels the context when dropped.
    #[must_use]
    pub fn drop_guard(self) -> CancelGuard {
        CancelGuard { handle: self }
    }
}

/// Cancels its context when dropped, including when the owning future is dropped mid-poll.
///
/// Created by [`CancelHandle::drop_guard`].
#[derive(Debug)]
pub struct CancelGuard {
    handle: CancelHandle,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
