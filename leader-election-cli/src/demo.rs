//! In-process failover walkthrough
//!
//! Starts several candidates against one in-memory coordinator, then fails
//! the current leader once per round and records who takes over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use leader_election::{
    ElectionConfig, ElectionHandle, InMemoryCoordinator, LeaderElection, LeaderGatedScheduler,
    Role, ScheduledTask, SchedulerStats,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Upper bound on how long a round may take to settle
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How the demo fails the leader each round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Failure {
    /// The leader leaves gracefully
    Leave,
    /// The leader's session expires; the candidate rejoins at the back
    Expire,
}

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub candidates: u32,
    pub failure: Failure,
    pub task_period: Option<Duration>,
}

#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub failure: Failure,
    pub rounds: Vec<Round>,
    pub tasks: Vec<TaskReport>,
}

#[derive(Debug, Serialize)]
pub struct Round {
    pub round: usize,
    pub leader: String,
    pub epoch: u64,
    pub live_candidates: usize,
}

#[derive(Debug, Serialize)]
pub struct TaskReport {
    pub candidate: String,
    pub runs: u64,
    pub skipped: u64,
    pub failures: u64,
}

struct LeaderTick {
    candidate: String,
    ticks: AtomicU64,
}

#[async_trait]
impl ScheduledTask for LeaderTick {
    fn name(&self) -> &str {
        &self.candidate
    }

    async fn run(&self) -> anyhow::Result<()> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        info!(candidate = %self.candidate, tick, "leader-only work");
        Ok(())
    }
}

pub async fn run(config: ElectionConfig, options: DemoOptions) -> anyhow::Result<DemoReport> {
    let coordinator = InMemoryCoordinator::new();
    let root = config.root_path.clone();

    let mut handles = Vec::new();
    for _ in 0..options.candidates {
        let handle = LeaderElection::new(coordinator.clone(), config.clone())
            .join()
            .await
            .context("failed to join the election")?;
        handles.push(handle);
    }

    let cancel = CancellationToken::new();
    let schedulers = match options.task_period {
        Some(period) => start_schedulers(&handles, period, &cancel),
        None => Vec::new(),
    };

    let mut rounds = Vec::new();
    for round in 1..=options.candidates as usize {
        let leader = settle(&coordinator, &root, &handles).await?;
        let status = handles[leader].status();
        let name = status.candidate.clone().unwrap_or_default();
        info!(round, leader = %name, epoch = status.epoch, "round settled");

        rounds.push(Round {
            round,
            leader: name,
            epoch: status.epoch,
            live_candidates: handles.len(),
        });

        if let Some(period) = options.task_period {
            tokio::time::sleep(period * 2).await;
        }

        match options.failure {
            Failure::Leave => {
                let handle = handles.remove(leader);
                handle.leave().await?;
                if handles.is_empty() {
                    break;
                }
            }
            Failure::Expire => {
                if let Some(session) = status.session {
                    coordinator.expire_session(session);
                }
            }
        }
    }

    for handle in handles {
        handle.leave().await?;
    }

    cancel.cancel();
    let mut tasks = Vec::new();
    for (candidate, scheduler) in schedulers {
        let stats = scheduler.await.context("scheduler task failed")?;
        tasks.push(TaskReport {
            candidate,
            runs: stats.runs,
            skipped: stats.skipped,
            failures: stats.failures,
        });
    }

    Ok(DemoReport {
        failure: options.failure,
        rounds,
        tasks,
    })
}

fn start_schedulers(
    handles: &[ElectionHandle],
    period: Duration,
    cancel: &CancellationToken,
) -> Vec<(String, JoinHandle<SchedulerStats>)> {
    handles
        .iter()
        .map(|handle| {
            let candidate = handle.candidate_id().unwrap_or_default();
            let task = LeaderTick {
                candidate: candidate.clone(),
                ticks: AtomicU64::new(0),
            };
            let scheduler = LeaderGatedScheduler::new(period, handle.subscribe());
            let cancel = cancel.child_token();
            let join = tokio::spawn(async move { scheduler.run(&task, cancel).await });
            (candidate, join)
        })
        .collect()
}

/// Wait until the candidates agree on one leader and return its index.
async fn settle(
    coordinator: &InMemoryCoordinator,
    root: &str,
    handles: &[ElectionHandle],
) -> anyhow::Result<usize> {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        let registered = coordinator.children(root).len();
        let statuses: Vec<_> = handles.iter().map(ElectionHandle::status).collect();
        let stable = registered == handles.len()
            && statuses.iter().all(|s| s.role != Role::Rejoining);
        let leaders: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_leader())
            .map(|(idx, _)| idx)
            .collect();

        if stable && leaders.len() == 1 {
            return Ok(leaders[0]);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "election did not settle within {:?} ({} leaders, {} of {} registered)",
                SETTLE_TIMEOUT,
                leaders.len(),
                registered,
                handles.len()
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
