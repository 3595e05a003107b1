//! Common Infrastructure Module
//!
//! Shared utilities for the escrow daemon.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - Root error type
//! - Metrics sink passed into every component

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

// Re-exports for convenience
pub use config::{AppConfig, ConfigError, Network, ObserverConfig, StreamTimings};
pub use error::{EscrowError, Result};
pub use logging::{
    init_from_config, init_logging, log_deal_transition, log_deposit_event, log_lock_event,
    EventCategory, LogEvent, LogLevel, LoggingError,
};
pub use metrics::{Metrics, MetricsSnapshot};

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current unix time in milliseconds
pub fn unix_now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
