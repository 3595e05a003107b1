//! Key-Value Store Module
//!
//! The watch list lives in a key-value store: one key per escrow wallet,
//! whose existence and TTL matter and whose value does not. The store
//! publishes keyspace notifications when a TTL is set and when a key lapses.
//! The daemon uses [`SqliteKeyStore`]; [`MemoryKeyStore`] backs unit tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::MemoryKeyStore;
pub use sqlite::SqliteKeyStore;

use crate::storage::StorageError;

/// Key-value store errors
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Channel carrying "TTL set or refreshed" notifications
pub fn expire_channel(db_index: u32) -> String {
    format!("__keyevent@{}__:expire", db_index)
}

/// Channel carrying "key lapsed" notifications
pub fn expired_channel(db_index: u32) -> String {
    format!("__keyevent@{}__:expired", db_index)
}

/// One keyspace notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceEvent {
    pub channel: String,
    pub key: String,
}

/// What a keyspace notification means for the watch list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyspaceEventKind {
    /// TTL was set or refreshed; the key is (still) live
    Expire,
    /// The key lapsed
    Expired,
}

impl KeyspaceEvent {
    /// Classify against the channels of one DB index; other channels yield `None`
    pub fn kind(&self, db_index: u32) -> Option<KeyspaceEventKind> {
        if self.channel == expired_channel(db_index) {
            Some(KeyspaceEventKind::Expired)
        } else if self.channel == expire_channel(db_index) {
            Some(KeyspaceEventKind::Expire)
        } else {
            None
        }
    }
}

/// Capabilities the watch list needs from a key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Snapshot of every live key in the namespace
    async fn scan_keys(&self) -> Result<Vec<String>, KvError>;

    /// Create or refresh a key with a TTL
    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), KvError>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Subscribe to keyspace notifications
    fn subscribe(&self) -> broadcast::Receiver<KeyspaceEvent>;
}
