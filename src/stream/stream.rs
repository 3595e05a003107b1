//! Typed Event Stream
//!
//! One `EventStream<E>` per logical stream. Wraps a [`StreamLog`] with the
//! stream key and the event's field codec.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::events::StreamKind;
use super::log::StreamLog;
use super::types::{EntryId, StreamError, StreamEvent};
use crate::common::unix_now_millis;

pub struct EventStream<E> {
    log: Arc<dyn StreamLog>,
    key: String,
    _event: PhantomData<fn() -> E>,
}

impl<E> Clone for EventStream<E> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            key: self.key.clone(),
            _event: PhantomData,
        }
    }
}

impl<E: StreamEvent> EventStream<E> {
    pub fn new(log: Arc<dyn StreamLog>, kind: StreamKind) -> Self {
        Self::with_key(log, kind.stream_key())
    }

    pub fn with_key(log: Arc<dyn StreamLog>, key: impl Into<String>) -> Self {
        Self {
            log,
            key: key.into(),
            _event: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append an event. Never waits on consumers.
    pub async fn push(&self, event: &E) -> Result<EntryId, StreamError> {
        self.log.append(&self.key, &event.to_fields()).await
    }

    /// Create the group if missing. Returns true if it was created now.
    pub async fn ensure_group(&self, group: &str) -> Result<bool, StreamError> {
        self.log.create_group(&self.key, group).await
    }

    /// Read up to `limit` new events, waiting up to `block` once if none are ready
    pub async fn read(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
        block: Duration,
    ) -> Result<Vec<(EntryId, E)>, StreamError> {
        let mut entries = self.log.read_group(&self.key, group, consumer, limit).await?;
        if entries.is_empty() && !block.is_zero() {
            tokio::time::sleep(block).await;
            entries = self.log.read_group(&self.key, group, consumer, limit).await?;
        }
        Ok(entries
            .into_iter()
            .map(|entry| (entry.id, E::from_fields(&entry.fields)))
            .collect())
    }

    pub async fn ack(&self, group: &str, ids: &[EntryId]) -> Result<u64, StreamError> {
        self.log.ack(&self.key, group, ids).await
    }

    /// Take over entries another consumer left unacked for at least `min_idle`
    pub async fn reclaim_pending(
        &self,
        group: &str,
        consumer: &str,
        limit: usize,
        min_idle: Duration,
    ) -> Result<Vec<(EntryId, E)>, StreamError> {
        let entries = self
            .log
            .claim_pending(&self.key, group, consumer, limit, min_idle)
            .await?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.id, E::from_fields(&entry.fields)))
            .collect())
    }

    /// Discard entries older than `max_age`
    pub async fn trim_by_age(&self, max_age: Duration) -> Result<u64, StreamError> {
        let cutoff = unix_now_millis().saturating_sub(max_age.as_millis() as u64);
        self.log.trim_before(&self.key, cutoff).await
    }

    pub async fn pending_count(&self, group: &str) -> Result<u64, StreamError> {
        self.log.pending_count(&self.key, group).await
    }
}
