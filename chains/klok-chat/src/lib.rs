//! # Klok Chat
//!
//! Multi-wallet chat bot: every configured wallet signs in, learns its daily
//! quota and sends one message per iteration until the quota or the daily
//! limit is reached. Admission is bounded by the shared
//! [`core_logic::ConcurrencyGate`].

pub mod account;
pub mod api;
pub mod config;
pub mod gateway;
pub mod signer;

pub use account::{AccountContext, AccountStateMachine, ChatOutcome, ChatSettings};
pub use api::{ApiSettings, ChatStats, KlokApi, RateLimitSnapshot, SessionToken};
pub use crate::config::KlokConfig;
pub use gateway::{ApiRequest, ApiResponse, Gateway, HttpGateway};
pub use signer::{ChallengeSigner, EthersSigner, SignInChallenge};

use core_logic::{
    AccountWorker, CoreError, Identity, MessagePool, ProxyConfig, ProxyManager, WalletManager,
};
use std::sync::Arc;

/// Everything read from disk before the batch starts.
#[derive(Debug)]
pub struct RunInputs {
    pub wallets: WalletManager,
    pub messages: MessagePool,
    pub proxies: Vec<ProxyConfig>,
}

impl RunInputs {
    /// Keys and messages are required; proxies are optional.
    pub fn load(config: &KlokConfig) -> Result<Self, CoreError> {
        Ok(Self {
            wallets: WalletManager::from_file(&config.private_keys_file)?,
            messages: MessagePool::from_file(&config.messages_file)?,
            proxies: ProxyManager::load_proxies(&config.proxies_file)?,
        })
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.wallets.identities(&self.proxies)
    }
}

impl From<&KlokConfig> for ChatSettings {
    fn from(config: &KlokConfig) -> Self {
        Self {
            domain: config.domain.clone(),
            origin: config.origin.clone(),
            chain_id: config.chain_id,
            chat_delay: config.chat_delay(),
            auth_retry: config.auth_retry(),
            default_daily_limit: config.default_daily_limit,
        }
    }
}

/// One state machine per identity, each with an HTTP gateway bound to that
/// identity's proxy.
pub fn build_workers(
    identities: Vec<Identity>,
    config: &KlokConfig,
    ctx: &AccountContext,
) -> Vec<Arc<dyn AccountWorker>> {
    let settings = ApiSettings::from(config);
    identities
        .into_iter()
        .map(|identity| {
            let gateway = HttpGateway::new(config.request_timeout(), identity.proxy.as_ref())
                .with_metrics(Arc::clone(&ctx.metrics));
            let api = KlokApi::new(Arc::new(gateway), settings.clone());
            Arc::new(AccountStateMachine::new(identity, api, ctx.clone())) as Arc<dyn AccountWorker>
        })
        .collect()
}
