use crate::error::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL safe for logs (credentials never included).
    pub fn display_url(&self) -> String {
        match self.username {
            Some(ref user) => format!("{} (user: {})", self.url, user),
            None => self.url.clone(),
        }
    }
}

/// Inclusive `[min_ms, max_ms]` window a randomized delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayWindow {
    pub fn new(min_ms: u64, max_ms: u64) -> Result<Self, ConfigError> {
        if min_ms > max_ms {
            return Err(ConfigError::InvalidValue {
                field: "delay window".to_string(),
                reason: format!("min {}ms is greater than max {}ms", min_ms, max_ms),
            });
        }
        Ok(Self { min_ms, max_ms })
    }

    pub fn fixed(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
        }
    }

    pub fn zero() -> Self {
        Self::fixed(0)
    }

    /// Uniformly samples a delay within the window.
    pub fn sample(&self) -> Duration {
        let ms = if self.min_ms >= self.max_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }

    pub fn contains(&self, delay: Duration) -> bool {
        let ms = delay.as_millis() as u64;
        ms >= self.min_ms && ms <= self.max_ms
    }
}
