use crate::status::AccountState;
use async_trait::async_trait;

/// One account's complete workflow, driven by the [`Scheduler`](crate::Scheduler).
///
/// Implementations own their status updates and must never panic or return
/// early without reaching a terminal [`AccountState`]; the scheduler marks a
/// panicking worker `Failed` on its behalf.
#[async_trait]
pub trait AccountWorker: Send + Sync {
    /// 1-based account index, stable for the whole run.
    fn index(&self) -> usize;

    /// Runs to completion and reports the terminal state reached.
    async fn run(&self) -> AccountState;
}
