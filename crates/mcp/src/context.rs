//! Cancellation and deadline context carried by every client operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Reason a [`CallContext`] finished before the guarded work did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation handle plus an optional absolute deadline.
///
/// Cloning shares the same token; [`CallContext::child_with_timeout`] derives a
/// context that is cancelled with its parent but may expire earlier.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never expires on its own.
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Wrap an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Derive a child context whose deadline is the earlier of the parent's and `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Return the context error if the context is already finished.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.token.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && deadline <= Instant::now()
        {
            return Err(ContextError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ContextError::Cancelled,
                _ = sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Race `work` against this context.
    pub async fn run<F>(&self, work: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = work => Ok(output),
        }
    }
}
