//! Chain Client Capabilities
//!
//! The observer consumes a chain node through three narrow capabilities,
//! one per pipeline stage. `ChainClient` is anything that provides all three.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use super::types::{AccountId, BlockHeader, BlockId, Transaction, TransactionId};

/// Chain node errors
#[derive(Debug, Error)]
pub enum ChainError {
    /// Block not applied yet / not in the node's local db
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl ChainError {
    /// Classify an error message returned by the node
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("not applied") || lower.contains("not in db") || lower.contains("not found") {
            ChainError::NotReady(message)
        } else {
            ChainError::Rpc(message)
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, ChainError::NotReady(_))
    }

    /// Errors worth retrying on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::NotReady(_) | ChainError::Timeout | ChainError::Http(_) | ChainError::Rpc(_)
        )
    }
}

/// Current masterchain top, used by the poller
#[async_trait]
pub trait MasterchainSource: Send + Sync {
    async fn get_masterchain_top(&self, timeout: Duration) -> Result<BlockId, ChainError>;
}

/// Shard topology, used by the resolver
#[async_trait]
pub trait ShardSource: Send + Sync {
    /// Shard top blocks referenced by a masterchain block
    async fn get_shard_tops(&self, master: &BlockId) -> Result<Vec<BlockId>, ChainError>;

    /// Raw block data with declared parents
    async fn get_block_data(&self, block: &BlockId) -> Result<BlockHeader, ChainError>;
}

/// Block transactions, used by the scan workers
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn get_transaction_ids(&self, block: &BlockId) -> Result<Vec<TransactionId>, ChainError>;

    /// Full transaction of `account` at logical time `lt`
    async fn get_transaction(
        &self,
        block: &BlockId,
        account: &AccountId,
        lt: u64,
        hash: &str,
    ) -> Result<Transaction, ChainError>;
}

/// A full chain client
pub trait ChainClient: MasterchainSource + ShardSource + TransactionSource {}

impl<T> ChainClient for T where T: MasterchainSource + ShardSource + TransactionSource {}

/// Bounded retry for block fetches.
///
/// "Not ready" sleeps and retries quietly; other errors are logged loudly
/// and retried. After `attempts` the last error is returned.
pub async fn fetch_with_retry<T, F, Fut>(
    what: &str,
    attempts: u32,
    delay: Duration,
    mut fetch: F,
) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                if e.is_not_ready() {
                    tracing::debug!(what, attempt, error = %e, "Block not ready, retrying");
                } else {
                    tracing::warn!(what, attempt, error = %e, "Chain fetch failed, retrying");
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
