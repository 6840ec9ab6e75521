//! Sub Check - Proxy Subscription Checker
//!
//! Validates the proxies of one or more subscriptions: deduplicates them,
//! checks each through a bounded pool of workers, keeps the ones that reach
//! the gating services and names them after their exit country.

pub mod config;
pub mod error;
pub mod proxy;
pub mod tui;

pub use config::Config;
pub use error::CheckError;
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
