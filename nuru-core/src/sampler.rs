//! Periodic sampling and the focus guard.
//!
//! Two independent ticks share one task: the sample tick refreshes metrics
//! and republishes progress, the guard tick re-runs the scheduler so a lost
//! pass or late metadata is recovered without client involvement.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::config::NuruConfig;
use crate::session::SessionManager;

pub struct Sampler {
    manager: Arc<SessionManager>,
    sample_interval: Duration,
    guard_interval: Duration,
}

impl Sampler {
    pub fn new(manager: Arc<SessionManager>, config: &NuruConfig) -> Self {
        Self {
            manager,
            sample_interval: config.sampler.interval,
            guard_interval: config.scheduler.focus_guard_interval,
        }
    }

    /// Runs until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        let now = Instant::now();
        let mut sample = interval_at(now + self.sample_interval, self.sample_interval);
        let mut guard = interval_at(now + self.guard_interval, self.guard_interval);
        sample.set_missed_tick_behavior(MissedTickBehavior::Skip);
        guard.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            sample_ms = self.sample_interval.as_millis() as u64,
            guard_ms = self.guard_interval.as_millis() as u64,
            "Sampler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sample.tick() => {
                    let sampled = self.manager.sample();
                    tracing::trace!(sampled, "Sample tick");
                }
                _ = guard.tick() => {
                    let report = self.manager.reschedule();
                    if report.failed_writes > 0 {
                        tracing::warn!(failed = report.failed_writes, "Focus guard pass had failed writes");
                    }
                }
            }
        }

        tracing::debug!("Sampler stopped");
    }
}
