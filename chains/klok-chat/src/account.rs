//! Per-account workflow: authenticate, size the quota, run the chat loop.
//!
//! ```text
//! Idle -> Authenticating -> Running -> Completed
//!              |              |
//!              v              v
//!            Failed    DailyLimitReached
//! ```
//!
//! Any state may also end in `Failed` when an unexpected error escapes.

use crate::api::{extract_reply_text, format_reset_time, KlokApi, SessionToken};
use crate::signer::{ChallengeSigner, SignInChallenge};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Local;
use core_logic::{
    with_retry, AccountState, AccountWorker, ConcurrencyGate, DelayWindow, Identity,
    MessagePool, MetricsCollector, RetryConfig, Sleeper, StatusRegistry, TokioSleeper,
    ACCOUNT_TARGET,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one chat iteration amounted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatOutcome {
    pub counted: bool,
    pub daily_limit_reached: bool,
    pub failed: bool,
}

impl ChatOutcome {
    pub fn counted() -> Self {
        Self {
            counted: true,
            ..Self::default()
        }
    }

    pub fn daily_limit() -> Self {
        Self {
            daily_limit_reached: true,
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub domain: String,
    pub origin: String,
    pub chain_id: u64,
    pub chat_delay: DelayWindow,
    pub auth_retry: RetryConfig,
    pub default_daily_limit: u64,
}

/// Collaborators shared by every account of a run.
#[derive(Clone)]
pub struct AccountContext {
    pub signer: Arc<dyn ChallengeSigner>,
    pub messages: MessagePool,
    pub registry: Arc<StatusRegistry>,
    pub gate: Option<Arc<ConcurrencyGate>>,
    pub metrics: Arc<MetricsCollector>,
    pub sleeper: Arc<dyn Sleeper>,
    pub settings: ChatSettings,
}

impl AccountContext {
    pub fn new(
        signer: Arc<dyn ChallengeSigner>,
        messages: MessagePool,
        registry: Arc<StatusRegistry>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            signer,
            messages,
            registry,
            gate: None,
            metrics: Arc::new(MetricsCollector::new()),
            sleeper: Arc::new(TokioSleeper),
            settings,
        }
    }

    /// Enables the per-iteration progress report.
    pub fn with_gate(mut self, gate: Arc<ConcurrencyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

pub struct AccountStateMachine {
    identity: Identity,
    api: KlokApi,
    ctx: AccountContext,
}

impl AccountStateMachine {
    pub fn new(identity: Identity, api: KlokApi, ctx: AccountContext) -> Self {
        Self { identity, api, ctx }
    }

    /// Drives the account to a terminal state. Never returns an error.
    pub async fn process(&self) -> AccountState {
        match self.drive().await {
            Ok(state) => state,
            Err(e) => {
                error!(
                    target: ACCOUNT_TARGET,
                    "❌ Error processing account {}: {:#}", self.identity.index, e
                );
                let (current, total) = match self.ctx.registry.get(self.identity.index).await {
                    Some(status) => (status.current_run, status.total_runs),
                    None => (0, 0),
                };
                self.set(AccountState::Failed, current, total).await;
                AccountState::Failed
            }
        }
    }

    async fn drive(&self) -> Result<AccountState> {
        let index = self.identity.index;
        self.set(AccountState::Authenticating, 0, 0).await;

        let address = self
            .ctx
            .signer
            .derive_address(&self.identity.credential)
            .with_context(|| format!("Account {} has an unusable private key", index))?;

        info!(
            target: ACCOUNT_TARGET,
            "Processing Account {} | Wallet Address: {}", index, address
        );
        match &self.identity.proxy {
            Some(proxy) => info!(target: ACCOUNT_TARGET, "🌐 Using proxy: {}", proxy.display_url()),
            None => info!(target: ACCOUNT_TARGET, "🌐 No proxy, direct connection"),
        }

        let token = match self.authenticate(&address).await {
            Ok(token) => token,
            Err(e) => {
                error!(
                    target: ACCOUNT_TARGET,
                    "❌ Failed to authenticate account {}: {:#}", index, e
                );
                self.set(AccountState::Failed, 0, 0).await;
                return Ok(AccountState::Failed);
            }
        };
        info!(target: ACCOUNT_TARGET, "✅ Account {} authenticated successfully", index);

        let quota = self.quota(&token).await;
        info!(target: ACCOUNT_TARGET, "📊 Account {} daily limit: {}", index, quota);
        self.set(AccountState::Running, 0, quota).await;

        let mut sent = 0u64;
        for run in 1..=quota {
            self.set(AccountState::Running, run, quota).await;
            self.report_progress().await;

            let outcome = self.chat_once(&token, run, quota).await;
            if outcome.daily_limit_reached {
                self.set(AccountState::DailyLimitReached, run, quota).await;
                self.report_stats(&token).await;
                return Ok(AccountState::DailyLimitReached);
            }
            if outcome.counted {
                sent += 1;
            } else {
                warn!(
                    target: ACCOUNT_TARGET,
                    "❌ Failed to process request {} for account {}", run, index
                );
            }

            if run < quota {
                let delay = self.ctx.settings.chat_delay.sample();
                info!(
                    target: ACCOUNT_TARGET,
                    "⏳ Waiting {:.1}s before the next chat...",
                    delay.as_secs_f64()
                );
                self.ctx.sleeper.sleep(delay).await;
            }
        }

        self.set(AccountState::Completed, quota, quota).await;
        info!(
            target: ACCOUNT_TARGET,
            "Account {} Completed: {}/{} messages sent", index, sent, quota
        );
        Ok(AccountState::Completed)
    }

    /// Signs one challenge, then retries verification with it.
    async fn authenticate(&self, address: &str) -> Result<SessionToken> {
        let settings = &self.ctx.settings;
        let challenge =
            SignInChallenge::new(&settings.domain, &settings.origin, settings.chain_id, address);
        let message = challenge.message();
        let signature = self
            .ctx
            .signer
            .sign(&self.identity.credential, &message)
            .await?;

        let api = &self.api;
        let message = message.as_str();
        let signature = signature.as_str();
        with_retry(
            settings.auth_retry,
            self.ctx.sleeper.as_ref(),
            "Authentication",
            |attempt| async move {
                debug!("Verify attempt {}", attempt);
                api.verify(signature, message)
                    .await
                    .ok_or_else(|| anyhow!("no session token in verify response"))
            },
        )
        .await
    }

    async fn quota(&self, token: &SessionToken) -> u64 {
        let fallback = self.ctx.settings.default_daily_limit;
        match self.api.stats(token).await {
            Some(stats) => stats.quota_or(fallback),
            None => fallback,
        }
    }

    /// One pass of the loop: rate-limit check, then a single message.
    pub async fn chat_once(&self, token: &SessionToken, run: u64, quota: u64) -> ChatOutcome {
        info!(
            target: ACCOUNT_TARGET,
            "[Run {}/{}] Checking rate limit...", run, quota
        );
        let Some(limit) = self.api.rate_limit(token).await else {
            warn!(target: ACCOUNT_TARGET, "⚠️ Could not read rate limit");
            self.ctx.metrics.record_chat(false);
            return ChatOutcome::failed();
        };

        if limit.is_exhausted() {
            warn!(target: ACCOUNT_TARGET, "🚫 Daily limit reached for this account");
            self.ctx.metrics.record_daily_limit();
            return ChatOutcome::daily_limit();
        }
        if let Some(remaining) = limit.remaining {
            debug!("{} messages remaining today", remaining);
        }

        let message = self.ctx.messages.choose();
        info!(target: ACCOUNT_TARGET, "[Run {}/{}] Sending: {}", run, quota, message);

        match self.api.chat(token, message).await {
            Some(response) => {
                info!(target: ACCOUNT_TARGET, "✅ Message sent successfully (Run {})", run);
                info!(
                    target: ACCOUNT_TARGET,
                    "Chat Response: {}",
                    extract_reply_text(&response)
                );
                self.ctx.metrics.record_chat(true);
                ChatOutcome::counted()
            }
            None => {
                warn!(target: ACCOUNT_TARGET, "⚠️ Failed to send message");
                self.ctx.metrics.record_chat(false);
                ChatOutcome::failed()
            }
        }
    }

    async fn report_progress(&self) {
        let Some(gate) = &self.ctx.gate else {
            return;
        };
        let report = self.ctx.registry.progress(gate).await;
        let tally = self.ctx.registry.tally().await;
        info!(
            target: ACCOUNT_TARGET,
            "=== Processing Status === Active: {}/{} | Waiting: {} | Finished: {}/{}",
            report.gate.active,
            report.gate.limit,
            report.gate.waiting,
            tally.terminal(),
            tally.total()
        );
        for entry in &report.accounts {
            info!(target: ACCOUNT_TARGET, "  {}", entry);
        }
    }

    async fn report_stats(&self, token: &SessionToken) {
        let Some(stats) = self.api.stats(token).await else {
            warn!(target: ACCOUNT_TARGET, "Could not fetch chat stats");
            return;
        };
        info!(target: ACCOUNT_TARGET, "📈 Account {} stats:", self.identity.index);
        if let Some(total) = stats.total_messages {
            info!(target: ACCOUNT_TARGET, "  Total messages: {}", total);
        }
        if let Some(points) = stats.points_earned {
            info!(target: ACCOUNT_TARGET, "  Points earned: {}", points);
        }
        if let Some(limit) = stats.daily_limit {
            info!(target: ACCOUNT_TARGET, "  Daily limit: {}", limit);
        }
        if let Some(reset) = stats.reset_time {
            info!(
                target: ACCOUNT_TARGET,
                "  Resets at: {}",
                format_reset_time(Local::now(), reset)
            );
        }
    }

    async fn set(&self, state: AccountState, current_run: u64, total_runs: u64) {
        let accepted = self
            .ctx
            .registry
            .set_state(self.identity.index, state, current_run, total_runs)
            .await;
        if accepted {
            debug!(
                "Account {} -> {} ({}/{})",
                self.identity.index, state, current_run, total_runs
            );
        }
    }
}

#[async_trait]
impl AccountWorker for AccountStateMachine {
    fn index(&self) -> usize {
        self.identity.index
    }

    async fn run(&self) -> AccountState {
        self.process().await
    }
}
