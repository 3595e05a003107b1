//! Structured Logging
//!
//! Provides production-ready structured logging with:
//! - JSON output for log aggregation on mainnet
//! - Pretty output for development
//! - Domain event helpers for deposits, deal transitions and action locks
//!
//! # Usage
//!
//! ```rust,ignore
//! use ad_escrow::common::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?;
//! tracing::info!(target: "escrow::chain", seqno = 42, "New masterchain block");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Chain observer events
    Chain,
    /// Event stream delivery
    Stream,
    /// Deal status changes
    Deal,
    /// Action lock lifecycle
    Lock,
    /// Startup, shutdown
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (RFC 3339)
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    /// Additional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_filter().to_uppercase(),
            category,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    /// Add structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add error details
    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Domain Event Logging
// ============================================================================

/// Log a detected or published deposit
pub fn log_deposit_event(event_type: &str, address: &str, amount_nano: u64, tx_hash: &str) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Chain, event_type).with_data(
        serde_json::json!({
            "address": address,
            "amount_nano": amount_nano,
            "tx_hash": tx_hash,
        }),
    );

    tracing::info!(target: "escrow::deposit", "{}", event.to_json());
}

/// Log a deal status transition attempt
pub fn log_deal_transition(deal_id: i64, from: &str, to: &str, applied: bool) {
    let level = if applied { LogLevel::Info } else { LogLevel::Debug };
    let event = LogEvent::new(level, EventCategory::Deal, format!("{} -> {}", from, to))
        .with_data(serde_json::json!({
            "deal_id": deal_id,
            "from": from,
            "to": to,
            "applied": applied,
        }));

    if applied {
        tracing::info!(target: "escrow::deal", "{}", event.to_json());
    } else {
        tracing::debug!(target: "escrow::deal", "{}", event.to_json());
    }
}

/// Log an action lock lifecycle event
pub fn log_lock_event(event_type: &str, deal_id: i64, action: &str, error: Option<&str>) {
    let level = if error.is_some() { LogLevel::Warn } else { LogLevel::Info };
    let mut event = LogEvent::new(level, EventCategory::Lock, event_type).with_data(
        serde_json::json!({
            "deal_id": deal_id,
            "action": action,
        }),
    );

    if let Some(err) = error {
        event = event.with_error("LOCK_ERROR", err);
        tracing::warn!(target: "escrow::lock", "{}", event.to_json());
    } else {
        tracing::info!(target: "escrow::lock", "{}", event.to_json());
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (mainnet)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ad_escrow={lvl},escrow={lvl},warn",
            lvl = level.as_filter()
        ))
    });

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from AppConfig
pub fn init_from_config(config: &super::config::AppConfig) -> Result<(), LoggingError> {
    let level = LogLevel::from(config.log_level.as_str());
    let json_format = config.network == super::config::Network::Mainnet;

    init_logging(level, json_format)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}
