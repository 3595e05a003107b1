//! Chain Observer Module
//!
//! Detects deposits into per-deal escrow wallets by walking the sharded chain.
//!
//! # Components
//!
//! - `types`: accounts, blocks, transactions, deposit extraction
//! - `client`: narrow chain capabilities + bounded retry
//! - `toncenter`: HTTP implementation of the chain client
//! - `registry`: watched address set
//! - `watch_sync`: registry bootstrap and keyspace-driven maintenance
//! - `poller` / `resolver` / `scanner` / `publisher`: pipeline stages
//! - `observer`: pipeline wiring and shutdown cascade

pub mod client;
pub mod observer;
pub mod poller;
pub mod publisher;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod toncenter;
pub mod types;
pub mod watch_sync;

// Re-exports for convenience
pub use client::{
    fetch_with_retry, ChainClient, ChainError, MasterchainSource, ShardSource, TransactionSource,
};
pub use observer::ChainObserver;
pub use poller::MasterchainPoller;
pub use publisher::DepositEventPublisher;
pub use registry::WatchedAddressRegistry;
pub use resolver::ShardTreeResolver;
pub use scanner::DepositScanPool;
pub use toncenter::HttpChainClient;
pub use types::{
    extract_deposit, AccountId, BlockHeader, BlockId, DepositCandidate, InboundMessage, ShardKey,
    Transaction, TransactionId,
};
pub use watch_sync::{DealExpirer, EscrowWatchList, WatchListSync};
