//! Per-request deadline and cancellation signal
//!
//! An [`OpContext`] travels with every store and cache call. Backends call
//! [`OpContext::check`] before each physical operation; the coordinator wraps
//! I/O futures in [`OpContext::run`] so a cancelled or expired request stops
//! waiting immediately instead of retrying.

use std::future::{pending, Future};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::{HubError, HubResult};

/// Deadline and cancellation state of one logical operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Trigger for the cancellation signal of the contexts it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl OpContext {
    /// Context with no deadline that is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a fresh cancellation signal, returning the handle that fires it.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx })
    }

    /// Copy of this context with `timeout` applied when no deadline is set.
    pub fn or_timeout(&self, timeout: Duration) -> Self {
        let mut ctx = self.clone();
        if ctx.deadline.is_none() {
            ctx.deadline = Some(Instant::now() + timeout);
        }
        ctx
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Fail fast when the operation was cancelled or ran out of time.
    pub fn check(&self) -> HubResult<()> {
        if self.is_cancelled() {
            return Err(HubError::Cancelled);
        }
        if self.is_expired() {
            return Err(HubError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the signal fires, or the deadline
    /// passes, whichever happens first.
    pub async fn run<T, F>(&self, fut: F) -> HubResult<T>
    where
        F: Future<Output = HubResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(HubError::Cancelled),
            _ = self.expired() => Err(HubError::DeadlineExceeded),
            result = fut => result,
        }
    }

    async fn cancelled(&self) {
        let Some(rx) = &self.cancel else {
            return pending().await;
        };
        let mut rx = rx.clone();
        loop {
            let fired = *rx.borrow_and_update();
            if fired {
                return;
            }
            // Sender dropped without firing: never cancelled.
            if rx.changed().await.is_err() {
                return pending().await;
            }
        }
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => pending().await,
        }
    }
}
