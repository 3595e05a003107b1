//! Common Error Types
//!
//! Root error type for process-level failures. Each module keeps its own
//! error enum; this one unifies them for startup and the binary.

use thiserror::Error;

use crate::chain::ChainError;
use crate::deal::{ActionError, DealError, LockError};
use crate::kv::KvError;
use crate::storage::StorageError;
use crate::stream::StreamError;

/// Root error type for the escrow daemon
#[derive(Debug, Error)]
pub enum EscrowError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Chain node errors
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Key-value store errors
    #[error("key-value store error: {0}")]
    Kv(#[from] KvError),

    /// Event stream errors
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Database errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Deal state machine errors
    #[error("deal error: {0}")]
    Deal(#[from] DealError),

    /// Action lock errors
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Guarded action errors
    #[error("action error: {0}")]
    Action(#[from] ActionError),

    /// Metric registration errors
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Task join / runtime errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EscrowError {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            EscrowError::Chain(e) => e.is_transient(),
            EscrowError::Kv(_) | EscrowError::Stream(_) | EscrowError::Io(_) => true,
            EscrowError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Stable error code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            EscrowError::Config(_) => "CONFIG_ERROR",
            EscrowError::Logging(_) => "LOGGING_ERROR",
            EscrowError::Chain(_) => "CHAIN_ERROR",
            EscrowError::Kv(_) => "KV_ERROR",
            EscrowError::Stream(_) => "STREAM_ERROR",
            EscrowError::Storage(_) => "STORAGE_ERROR",
            EscrowError::Deal(_) => "DEAL_ERROR",
            EscrowError::Lock(_) => "LOCK_ERROR",
            EscrowError::Action(_) => "ACTION_ERROR",
            EscrowError::Metrics(_) => "METRICS_ERROR",
            EscrowError::Internal(_) => "INTERNAL_ERROR",
            EscrowError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using EscrowError
pub type Result<T> = std::result::Result<T, EscrowError>;
