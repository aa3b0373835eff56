//! Tokio-backed [`Scheduler`].

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

use protocache_core::schedule::{ScheduledTask, Scheduler, TimerHandle};

/// Runs scheduled tasks on a tokio runtime.
///
/// Each schedule is one spawned task driven by `tokio::time::interval`. The
/// first run happens one full interval after scheduling; a run that overlaps
/// the next tick delays it instead of bursting to catch up.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler for the runtime the caller is running on.
    ///
    /// # Panics
    /// Outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, interval: Duration, task: ScheduledTask) -> TimerHandle {
        // tokio::time::interval panics on a zero period
        let period = interval.max(Duration::from_millis(1));
        let join = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        tracing::debug!(interval_ms = period.as_millis() as u64, "refresh timer started");
        TimerHandle::new(move || {
            join.abort();
            tracing::debug!("refresh timer cancelled");
        })
    }
}
