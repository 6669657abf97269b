use super::delay::Sleeper;
use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed-pause retry policy: `max_attempts` total tries, `delay` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_millis(delay_ms),
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Runs `operation` until it succeeds or the attempts are spent.
///
/// The closure receives the 1-based attempt number. The pause only happens
/// between attempts, never after the last one.
pub async fn with_retry<T, F, Fut>(
    config: RetryConfig,
    sleeper: &dyn Sleeper,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                warn!(
                    "{} attempt {}/{} failed: {:#}",
                    operation_name, attempt, attempts, e
                );
                last_error = Some(e);
                if attempt < attempts {
                    sleeper.sleep(config.delay).await;
                }
            }
        }
    }

    let last = last_error.map(|e| format!("{:#}", e)).unwrap_or_default();
    Err(anyhow!(
        "{} failed after {} attempts. Last error: {}",
        operation_name,
        attempts,
        last
    ))
}
