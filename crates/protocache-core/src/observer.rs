//! Refresh outcome callbacks.

use std::time::Duration;

use crate::error::SourceError;

/// Receives the outcome of every source during a refresh cycle.
///
/// All methods default to no-ops so implementors only override what they
/// record. Must be `Send + Sync`: the refresh may run on the scheduler task.
pub trait RefreshObserver: Send + Sync {
    fn on_source_loaded(&self, _url: &str, _types: usize, _elapsed: Duration) {}

    fn on_source_up_to_date(&self, _url: &str) {}

    fn on_source_failed(&self, _url: &str, _error: &SourceError) {}
}

/// Observer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RefreshObserver for NoopObserver {}
