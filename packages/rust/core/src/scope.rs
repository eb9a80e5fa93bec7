//! Cancellable, optionally deadline-bounded scope threaded through a run.
//!
//! A [`Scope`] is cancelled when [`Scope::cancel`] is called on it or any
//! ancestor, or when its own or an ancestor's deadline passes. Waiting on
//! [`Scope::cancelled`] resolves to the matching error (`Cancelled` or
//! `Timeout`), which callers race against their real work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use longform_shared::{LongformError, Result};
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a scope stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    Timeout,
}

impl CancelReason {
    pub fn into_error(self) -> LongformError {
        match self {
            Self::Cancelled => LongformError::Cancelled,
            Self::Timeout => LongformError::Timeout,
        }
    }
}

struct Inner {
    state: watch::Sender<Option<CancelReason>>,
    deadline: Option<Instant>,
    parent: Option<Scope>,
}

#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// A root scope with no deadline.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// A child that is cancelled with this scope, or on its own.
    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), None)
    }

    /// A child that additionally times out after `timeout`. A timeout too
    /// large to represent means no deadline of its own.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self::build(Some(self.clone()), Instant::now().checked_add(timeout))
    }

    fn build(parent: Option<Scope>, deadline: Option<Instant>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                state,
                deadline,
                parent,
            }),
        }
    }

    /// Cancel this scope and every scope derived from it. Idempotent; an
    /// earlier reason is kept.
    pub fn cancel(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(CancelReason::Cancelled);
                true
            } else {
                false
            }
        });
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// The reason this scope is stopped, if it is.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = *self.inner.state.borrow() {
            return Some(reason);
        }
        if self.inner.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(CancelReason::Timeout);
        }
        self.inner.parent.as_ref().and_then(Scope::reason)
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// `Err` with the cancellation error if this scope is already stopped.
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(reason.into_error()),
            None => Ok(()),
        }
    }

    /// Resolves once the scope stops, yielding the matching error.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = LongformError> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.inner.state.subscribe();

            let own = async move {
                let reason = rx.wait_for(Option::is_some).await.ok().and_then(|r| *r);
                match reason {
                    Some(reason) => reason,
                    // Sender lives as long as `self`.
                    None => std::future::pending().await,
                }
            };
            let deadline = async {
                match self.inner.deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            let parent = async {
                match &self.inner.parent {
                    Some(parent) => parent.cancelled().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                reason = own => reason.into_error(),
                _ = deadline => LongformError::Timeout,
                err = parent => err,
            }
        })
    }

    /// Run `fut` unless the scope stops first. Cancellation wins ties.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            err = self.cancelled() => Err(err),
            out = fut => out,
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}
