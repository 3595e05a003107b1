//! Ad Escrow Backend
//!
//! Settlement daemon for channel advertising deals paid through per-deal
//! escrow wallets.
//!
//! ## Components
//!
//! 1. **Chain Observer** - Walks masterchain and shard blocks, publishes deposits
//!    into watched escrow addresses to the escrow deposit stream
//! 2. **Event Streams** - Durable consumer-group log with ack, reclaim and trim
//! 3. **Deal Lifecycle** - Draft, signing, escrow creation, deposit confirmation,
//!    lock-guarded payouts and channel posts
//!
//! Escrow watch keys live in a key-value store with TTLs; a lapsed key
//! expires the deal still waiting on that address.

pub mod chain;
pub mod common;
pub mod deal;
pub mod kv;
pub mod storage;
pub mod stream;

// Re-exports: process plumbing
pub use common::{AppConfig, EscrowError, Metrics, MetricsSnapshot, Result};

// Re-exports: chain observer
pub use chain::{
    AccountId, BlockId, ChainClient, ChainError, ChainObserver, HttpChainClient,
    WatchListSync, WatchedAddressRegistry,
};

// Re-exports: streams
pub use stream::{
    EscrowDepositEvent, EventStream, NotificationEvent, SqliteStreamLog, StreamConsumer,
    StreamKind,
};

// Re-exports: deals
pub use deal::{
    Deal, DealError, DealService, DealStatus, EscrowDepositWorker, SqliteDealStore,
};

pub use kv::{KeyValueStore, MemoryKeyStore, SqliteKeyStore};
pub use storage::Database;
