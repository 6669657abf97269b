//! # Utilities Module
//!
//! Internal utility modules for the core-logic crate.
//! These modules are marked as `pub(crate)` to enforce API boundaries.

// Internal modules - not part of public API
pub(crate) mod delay;
pub(crate) mod gate;
pub(crate) mod logger;
pub(crate) mod message_pool;
pub(crate) mod proxy_manager;
pub(crate) mod retry;
pub(crate) mod scheduler;
pub(crate) mod wallet_manager;

// Selective exports - only public utilities
pub use delay::{RecordingSleeper, Sleeper, TokioSleeper};
pub use gate::{ConcurrencyGate, GatePermit, GateStats};
pub use logger::{colorize_states, setup_logger, ACCOUNT_TARGET};
pub use message_pool::MessagePool;
pub use proxy_manager::ProxyManager;
pub use scheduler::{LaunchPolicy, RunSummary, Scheduler};
pub use wallet_manager::{Credential, Identity, WalletManager};
