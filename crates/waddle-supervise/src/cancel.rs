//! Cancellation with a recorded reason.
//!
//! [`CauseToken`] wraps a [`CancellationToken`] and remembers why it was
//! cancelled. The first cancellation wins; a token cancelled through its
//! parent reports the parent's cause.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::process::ExitReport;

/// Why a [`CauseToken`] was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Cause {
    /// Cancelled without an explicit reason.
    #[error("context canceled")]
    Canceled,

    /// Shutdown requested by the embedding program (signal, test, ...).
    #[error("shutdown requested: {0}")]
    Shutdown(String),

    /// The child reported successful initialization.
    #[error("child reported ready")]
    Ready,

    /// The child reported a failed initialization with this message.
    #[error("child initialization failed: {0}")]
    InitFailed(String),

    /// The readiness report could not be read off the wire.
    #[error("could not read readiness report: {0}")]
    Receive(String),

    /// The readiness endpoint was released before any report arrived.
    #[error("readiness endpoint closed")]
    Closed,

    /// The child process is gone.
    #[error("{0}")]
    ChildExited(ExitReport),
}

/// A cancel-once token carrying the [`Cause`] of its cancellation.
///
/// Cloning is cheap and every clone observes the same state.
#[derive(Debug, Clone)]
pub struct CauseToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    cause: OnceLock<Cause>,
    parent: Option<CauseToken>,
}

impl CauseToken {
    /// Create a new root token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                cause: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Create a child token, cancelled whenever `self` is.
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                cause: OnceLock::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel with [`Cause::Canceled`].
    pub fn cancel(&self) -> bool {
        self.cancel_with(Cause::Canceled)
    }

    /// Cancel with the given cause.
    ///
    /// Returns `false` if the token was already cancelled, in which case the
    /// recorded cause is left untouched.
    pub fn cancel_with(&self, cause: Cause) -> bool {
        if self.inner.token.is_cancelled() {
            return false;
        }
        let won = self.inner.cause.set(cause).is_ok();
        // A losing caller still leaves the token cancelled on return.
        self.inner.token.cancel();
        won
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the token (or any ancestor) is cancelled.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + '_ {
        self.inner.token.cancelled()
    }

    /// The recorded cause, or `None` while the token is live.
    pub fn cause(&self) -> Option<Cause> {
        if let Some(cause) = self.inner.cause.get() {
            return Some(cause.clone());
        }
        if !self.is_cancelled() {
            return None;
        }
        Some(
            self.inner
                .parent
                .as_ref()
                .and_then(CauseToken::cause)
                .unwrap_or(Cause::Canceled),
        )
    }
}

impl Default for CauseToken {
    fn default() -> Self {
        Self::new()
    }
}
