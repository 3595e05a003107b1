//! Stream Log Trait
//!
//! The durable, ordered log behind every [`super::EventStream`], with
//! consumer groups and a per-group pending-entry table.

use async_trait::async_trait;
use std::time::Duration;

use super::types::{EntryId, FieldMap, StreamEntry, StreamError};

#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Append an entry; the log assigns its id
    async fn append(&self, stream: &str, fields: &FieldMap) -> Result<EntryId, StreamError>;

    /// Create a group reading from the start of the stream.
    ///
    /// Returns false if the group already existed.
    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, StreamError>;

    /// Deliver up to `limit` never-delivered entries to `consumer` and mark them pending.
    ///
    /// Returns immediately, possibly empty.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        limit: usize,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    /// Remove ids from the group's pending set. Returns how many were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, StreamError>;

    /// Hand pending entries idle for at least `min_idle` to `consumer`
    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        limit: usize,
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    /// Drop entries older than `cutoff_millis`, acked or not. Returns how many.
    async fn trim_before(&self, stream: &str, cutoff_millis: u64) -> Result<u64, StreamError>;

    /// Number of delivered-but-unacked entries
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StreamError>;
}
