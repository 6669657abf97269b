//! # Core Logic - Shared Orchestration for Multi-Account Bots
//!
//! This crate provides the account-independent pieces every bot in the
//! workspace builds on: bounded admission, live status, scheduling,
//! configuration loaders and logging.
//!
//! ## Modules
//!
//! - [`config`] - Proxy and delay-window configuration types
//! - [`error`] - Typed error handling with thiserror
//! - [`metrics`] - Run-wide chat and HTTP counters
//! - [`status`] - Account states and the shared status registry
//! - [`traits`] - Core trait definitions
//! - `utils` - Gate, scheduler, loaders, retry, logging

// Module declarations - internal modules marked pub(crate)
pub mod config;
pub mod error;
pub mod metrics;
pub mod status;
pub mod traits;
pub(crate) mod utils;

// Selective exports - only public API types
pub use config::{DelayWindow, ProxyConfig};
pub use error::{ConfigError, CoreError, NetworkError, WalletError};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use status::{
    AccountEntry, AccountState, AccountStatus, ProgressReport, StatusRegistry, StatusTally,
};
pub use traits::AccountWorker;

// Utils are pub(crate) - only export specific public utilities
pub use utils::{
    colorize_states, setup_logger, ConcurrencyGate, Credential, GatePermit, GateStats, Identity,
    LaunchPolicy, MessagePool, ProxyManager, RecordingSleeper, RunSummary, Scheduler, Sleeper,
    TokioSleeper, WalletManager, ACCOUNT_TARGET,
};

// Export retry utilities for testing
pub use utils::retry::{with_retry, RetryConfig};
