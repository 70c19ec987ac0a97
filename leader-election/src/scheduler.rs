//! Periodic work that only the leader performs

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::LeadershipStatus;

/// A unit of work run on every leader tick
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run once.
    async fn run(&self) -> anyhow::Result<()>;
}

/// Counters reported when a scheduler stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks on which the task ran, successfully or not
    pub runs: u64,
    /// Ticks skipped because this process was not the leader
    pub skipped: u64,
    /// Runs that returned an error
    pub failures: u64,
}

/// Fixed-rate scheduler gated on leadership
pub struct LeaderGatedScheduler {
    period: Duration,
    leadership: watch::Receiver<LeadershipStatus>,
}

impl LeaderGatedScheduler {
    /// Tick every `period`, consulting `leadership` on each tick.
    pub fn new(period: Duration, leadership: watch::Receiver<LeadershipStatus>) -> Self {
        Self { period, leadership }
    }

    /// Run `task` until `cancel` fires.
    ///
    /// The first tick happens immediately. Task errors are logged and counted
    /// but do not stop the scheduler.
    pub async fn run<T>(self, task: &T, cancel: CancellationToken) -> SchedulerStats
    where
        T: ScheduledTask + ?Sized,
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = SchedulerStats::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let is_leader = self.leadership.borrow().is_leader();
            if !is_leader {
                stats.skipped += 1;
                debug!(task = task.name(), "not the leader, skipping tick");
                continue;
            }

            stats.runs += 1;
            match task.run().await {
                Ok(()) => debug!(task = task.name(), "scheduled task completed"),
                Err(e) => {
                    stats.failures += 1;
                    warn!(task = task.name(), error = %e, "scheduled task failed");
                }
            }
        }

        info!(
            task = task.name(),
            runs = stats.runs,
            skipped = stats.skipped,
            failures = stats.failures,
            "scheduler stopped"
        );
        stats
    }
}
