//! Periodic task scheduling contract.
//!
//! A [`Scheduler`] runs a task at a fixed interval on its own execution
//! context and hands back a [`TimerHandle`]. Dropping the handle cancels
//! the schedule, so the timer's lifetime is tied to its owner's scope.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// A repeatable unit of work. Each invocation produces a fresh future.
pub type ScheduledTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Invokes a task at every interval boundary, independent of the caller.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, interval: Duration, task: ScheduledTask) -> TimerHandle;
}

/// Owns a running schedule. Cancels it on [`TimerHandle::cancel`] or drop.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    /// Wrap the scheduler-specific cancellation action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop the schedule now. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("active", &self.is_active())
            .finish()
    }
}
