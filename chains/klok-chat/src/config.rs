use anyhow::Result;
use ::config::{Config, Environment, File};
use core_logic::{ConfigError, DelayWindow, LaunchPolicy, RetryConfig};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KlokConfig {
    pub base_url: String,
    /// Sent as `Origin`/`Referer` and used as the sign-in URI.
    pub origin: String,
    /// Domain named in the sign-in challenge.
    pub domain: String,
    pub chain_id: u64,
    pub referral_code: String,
    pub model: String,
    pub language: String,
    pub user_agent: String,

    pub private_keys_file: String,
    pub messages_file: String,
    pub proxies_file: String,

    /// Max accounts running at once. Prompted for when unset.
    pub threads: Option<usize>,
    pub launch_policy: LaunchPolicy,

    pub request_timeout_secs: u64,
    pub auth_attempts: u32,
    pub auth_retry_delay_ms: u64,
    pub default_daily_limit: u64,

    pub min_chat_delay_ms: u64,
    pub max_chat_delay_ms: u64,
    pub min_account_delay_ms: u64,
    pub max_account_delay_ms: u64,
}

impl Default for KlokConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api1-pp.klokapp.ai".to_string(),
            origin: "https://klokapp.ai".to_string(),
            domain: "klokapp.ai".to_string(),
            chain_id: 1,
            referral_code: String::new(),
            model: "llama-3.3-70b-instruct".to_string(),
            language: "english".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            private_keys_file: "privatekeys.txt".to_string(),
            messages_file: "question.txt".to_string(),
            proxies_file: "proxies.txt".to_string(),
            threads: None,
            launch_policy: LaunchPolicy::Staggered,
            request_timeout_secs: 10,
            auth_attempts: 3,
            auth_retry_delay_ms: 2000,
            default_daily_limit: 50,
            min_chat_delay_ms: 10_000,
            max_chat_delay_ms: 20_000,
            min_account_delay_ms: 10_000,
            max_account_delay_ms: 20_000,
        }
    }
}

impl KlokConfig {
    /// Loads `path` (optional, defaults apply when missing) with `KLOK_*`
    /// environment overrides on top.
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("KLOK").try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize().map_err(|e| anyhow::anyhow!(e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == Some(0) {
            return Err(invalid("threads", "must be at least 1"));
        }
        if self.auth_attempts == 0 {
            return Err(invalid("auth_attempts", "must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be at least 1"));
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "base_url".to_string(),
            });
        }
        DelayWindow::new(self.min_chat_delay_ms, self.max_chat_delay_ms)?;
        DelayWindow::new(self.min_account_delay_ms, self.max_account_delay_ms)?;
        Ok(())
    }

    pub fn chat_delay(&self) -> DelayWindow {
        DelayWindow {
            min_ms: self.min_chat_delay_ms,
            max_ms: self.max_chat_delay_ms,
        }
    }

    pub fn account_delay(&self) -> DelayWindow {
        DelayWindow {
            min_ms: self.min_account_delay_ms,
            max_ms: self.max_account_delay_ms,
        }
    }

    pub fn auth_retry(&self) -> RetryConfig {
        RetryConfig::new(self.auth_attempts, self.auth_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
