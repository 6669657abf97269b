use super::delay::{Sleeper, TokioSleeper};
use super::gate::{ConcurrencyGate, GatePermit};
use crate::config::DelayWindow;
use crate::error::ConfigError;
use crate::status::{AccountState, StatusRegistry, StatusTally};
use crate::traits::AccountWorker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, Instrument};

/// How accounts are released into the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchPolicy {
    /// Wait for admission, launch, then pause for the stagger delay before
    /// considering the next account.
    #[default]
    Staggered,
    /// Spawn every account at once; each one queues on the gate itself.
    Immediate,
}

impl FromStr for LaunchPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staggered" => Ok(LaunchPolicy::Staggered),
            "immediate" => Ok(LaunchPolicy::Immediate),
            other => Err(ConfigError::InvalidValue {
                field: "launch_policy".to_string(),
                reason: format!("unknown policy '{}'", other),
            }),
        }
    }
}

impl fmt::Display for LaunchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchPolicy::Staggered => f.write_str("staggered"),
            LaunchPolicy::Immediate => f.write_str("immediate"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub launched: usize,
    pub tally: StatusTally,
    pub peak_active: usize,
    pub elapsed: Duration,
}

/// Launches one worker task per account behind a shared [`ConcurrencyGate`]
/// and waits until every account has settled.
pub struct Scheduler {
    gate: Arc<ConcurrencyGate>,
    registry: Arc<StatusRegistry>,
    sleeper: Arc<dyn Sleeper>,
    stagger: DelayWindow,
    policy: LaunchPolicy,
}

impl Scheduler {
    pub fn new(gate: Arc<ConcurrencyGate>, registry: Arc<StatusRegistry>) -> Self {
        Self {
            gate,
            registry,
            sleeper: Arc::new(TokioSleeper),
            stagger: DelayWindow::zero(),
            policy: LaunchPolicy::default(),
        }
    }

    pub fn with_stagger(mut self, stagger: DelayWindow) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_policy(mut self, policy: LaunchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn registry(&self) -> &Arc<StatusRegistry> {
        &self.registry
    }

    /// Runs every worker in configuration order and returns once all of them
    /// reached a terminal state.
    pub async fn run(&self, workers: Vec<Arc<dyn AccountWorker>>) -> RunSummary {
        let start_time = Instant::now();
        let launched = workers.len();

        for worker in &workers {
            self.registry
                .set_state(worker.index(), AccountState::Idle, 0, 0)
                .await;
        }

        info!(
            "Starting {} account workers (max concurrent: {}, policy: {})",
            launched,
            self.gate.limit(),
            self.policy
        );

        let mut set = JoinSet::new();

        for (position, worker) in workers.into_iter().enumerate() {
            let index = worker.index();
            let span = tracing::info_span!("account", account = format!("{:03}", index));

            match self.policy {
                LaunchPolicy::Staggered => {
                    let permit = match self.gate.acquire().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!("Account {} could not enter the gate: {:#}", index, e);
                            self.registry
                                .set_state(index, AccountState::Failed, 0, 0)
                                .await;
                            continue;
                        }
                    };
                    set.spawn(
                        supervise(
                            worker,
                            Some(permit),
                            Arc::clone(&self.gate),
                            Arc::clone(&self.registry),
                        )
                        .instrument(span),
                    );

                    if position + 1 < launched {
                        let delay = self.stagger.sample();
                        info!(
                            "Waiting {:.1}s before starting the next account...",
                            delay.as_secs_f64()
                        );
                        self.sleeper.sleep(delay).await;
                    }
                }
                LaunchPolicy::Immediate => {
                    set.spawn(
                        supervise(
                            worker,
                            None,
                            Arc::clone(&self.gate),
                            Arc::clone(&self.registry),
                        )
                        .instrument(span),
                    );
                }
            }
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                error!("An account task failed to join: {:?}", e);
            }
        }

        let summary = RunSummary {
            launched,
            tally: self.registry.tally().await,
            peak_active: self.gate.peak(),
            elapsed: start_time.elapsed(),
        };

        info!(
            "Total Time: {:.1}s | Completed: {} | Daily Limit: {} | Failed: {} | Peak Concurrency: {}/{}",
            summary.elapsed.as_secs_f64(),
            summary.tally.completed,
            summary.tally.daily_limit_reached,
            summary.tally.failed,
            summary.peak_active,
            self.gate.limit()
        );

        summary
    }
}

/// Owns one account task from admission to release.
///
/// The worker runs in its own task so a panic inside it only costs that
/// account; the gate slot is released either way.
async fn supervise(
    worker: Arc<dyn AccountWorker>,
    permit: Option<GatePermit>,
    gate: Arc<ConcurrencyGate>,
    registry: Arc<StatusRegistry>,
) -> AccountState {
    let index = worker.index();

    let permit = match permit {
        Some(permit) => permit,
        None => match gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Account {} could not enter the gate: {:#}", index, e);
                registry.set_state(index, AccountState::Failed, 0, 0).await;
                return AccountState::Failed;
            }
        },
    };

    let runner = Arc::clone(&worker);
    let state = match tokio::spawn(async move { runner.run().await }.in_current_span()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Account {} task aborted: {}", index, e);
            AccountState::Failed
        }
    };

    // the registry must end terminal even if the worker never said so
    let settled = registry
        .get(index)
        .await
        .is_some_and(|status| status.state.is_terminal());
    if !settled {
        let (current_run, total_runs) = registry
            .get(index)
            .await
            .map(|s| (s.current_run, s.total_runs))
            .unwrap_or((0, 0));
        let final_state = if state.is_terminal() {
            state
        } else {
            AccountState::Failed
        };
        registry
            .set_state(index, final_state, current_run, total_runs)
            .await;
    }

    permit.release();
    state
}
