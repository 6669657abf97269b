//! # Account Status Registry
//!
//! Shared, concurrency-safe view of where every account is in its workflow.
//! Each account's worker is the only writer of its own entry; progress
//! reporters read snapshots.
//!
//! Terminal states (`Completed`, `Failed`, `DailyLimitReached`) are sticky:
//! once an entry reaches one, later updates for that index are ignored.

use crate::utils::gate::{ConcurrencyGate, GateStats};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccountState {
    Idle,
    Authenticating,
    Running,
    DailyLimitReached,
    Completed,
    Failed,
}

impl AccountState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AccountState::Completed | AccountState::Failed | AccountState::DailyLimitReached
        )
    }

    /// Holding a gate slot and doing work.
    pub fn is_active(self) -> bool {
        matches!(self, AccountState::Authenticating | AccountState::Running)
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AccountState::Idle => "Idle",
            AccountState::Authenticating => "Authenticating",
            AccountState::Running => "Running",
            AccountState::DailyLimitReached => "Daily Limit Reached",
            AccountState::Completed => "Completed",
            AccountState::Failed => "Failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatus {
    pub state: AccountState,
    pub current_run: u64,
    pub total_runs: u64,
    pub last_updated: DateTime<Local>,
}

impl AccountStatus {
    pub fn new(state: AccountState, current_run: u64, total_runs: u64) -> Self {
        Self {
            state,
            current_run,
            total_runs,
            last_updated: Local::now(),
        }
    }

    pub fn idle() -> Self {
        Self::new(AccountState::Idle, 0, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountEntry {
    pub index: usize,
    pub status: AccountStatus,
}

impl fmt::Display for AccountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Account {}: {} ({}/{}) [{}]",
            self.index,
            self.status.state,
            self.status.current_run,
            self.status.total_runs,
            self.status.last_updated.format("%H:%M:%S")
        )
    }
}

/// Count of accounts per coarse state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTally {
    pub idle: usize,
    pub active: usize,
    pub completed: usize,
    pub daily_limit_reached: usize,
    pub failed: usize,
}

impl StatusTally {
    pub fn total(&self) -> usize {
        self.idle + self.active + self.completed + self.daily_limit_reached + self.failed
    }

    pub fn terminal(&self) -> usize {
        self.completed + self.daily_limit_reached + self.failed
    }
}

/// Aggregated progress: gate occupancy plus every currently active account.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub gate: GateStats,
    pub accounts: Vec<AccountEntry>,
}

#[derive(Debug, Default)]
pub struct StatusRegistry {
    entries: RwLock<HashMap<usize, AccountStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the latest status for `index`.
    ///
    /// Returns `false` (and leaves the entry alone) when the account has
    /// already reached a terminal state.
    pub async fn update(&self, index: usize, status: AccountStatus) -> bool {
        let mut entries = self.entries.write().await;
        if let Some(current) = entries.get(&index) {
            if current.state.is_terminal() {
                debug!(
                    "Ignoring {} for account {}: already {}",
                    status.state, index, current.state
                );
                return false;
            }
        }
        entries.insert(index, status);
        true
    }

    pub async fn set_state(
        &self,
        index: usize,
        state: AccountState,
        current_run: u64,
        total_runs: u64,
    ) -> bool {
        self.update(index, AccountStatus::new(state, current_run, total_runs))
            .await
    }

    pub async fn get(&self, index: usize) -> Option<AccountStatus> {
        self.entries.read().await.get(&index).cloned()
    }

    /// Entries currently authenticating or running, ordered by index.
    pub async fn snapshot(&self) -> Vec<AccountEntry> {
        self.collect(|status| status.state.is_active()).await
    }

    /// Every known entry, ordered by index.
    pub async fn all(&self) -> Vec<AccountEntry> {
        self.collect(|_| true).await
    }

    pub async fn tally(&self) -> StatusTally {
        let entries = self.entries.read().await;
        let mut tally = StatusTally::default();
        for status in entries.values() {
            match status.state {
                AccountState::Idle => tally.idle += 1,
                AccountState::Authenticating | AccountState::Running => tally.active += 1,
                AccountState::Completed => tally.completed += 1,
                AccountState::DailyLimitReached => tally.daily_limit_reached += 1,
                AccountState::Failed => tally.failed += 1,
            }
        }
        tally
    }

    /// True when every known account has reached a terminal state.
    pub async fn is_settled(&self) -> bool {
        self.entries
            .read()
            .await
            .values()
            .all(|status| status.state.is_terminal())
    }

    pub async fn progress(&self, gate: &ConcurrencyGate) -> ProgressReport {
        ProgressReport {
            gate: gate.stats(),
            accounts: self.snapshot().await,
        }
    }

    async fn collect<F>(&self, keep: F) -> Vec<AccountEntry>
    where
        F: Fn(&AccountStatus) -> bool,
    {
        let entries = self.entries.read().await;
        let mut out: Vec<AccountEntry> = entries
            .iter()
            .filter(|(_, status)| keep(status))
            .map(|(&index, status)| AccountEntry {
                index,
                status: status.clone(),
            })
            .collect();
        out.sort_by_key(|entry| entry.index);
        out
    }
}
