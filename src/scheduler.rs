//! # Delayed Tasks
//!
//! Cancellable one-shot callbacks on the tokio timer. Timeouts, grace
//! windows and expiries are all expressed as a `DelayedTask`, so tests can
//! drive them with tokio's paused clock instead of wall-clock sleeps.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// A callback scheduled to run once at a deadline.
///
/// Dropping the task cancels it if it has not fired yet.
#[derive(Debug)]
pub struct DelayedTask {
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl DelayedTask {
    /// Run `callback` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn after<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::at(Instant::now() + delay, callback)
    }

    /// Run `callback` at `deadline`.
    pub fn at<F>(deadline: Instant, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            callback();
        });
        Self { deadline, handle }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// True once the callback ran or the task was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the callback if it has not fired.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
