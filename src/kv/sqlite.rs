//! SQLite TTL Key Store
//!
//! Watch keys persisted in the `watch_keys` table with wall-clock deadlines,
//! so the watch list and its expiry windows survive a restart. Keys that
//! lapsed while the process was down are swept and announced as `expired`
//! on the first sweep after startup.

use async_trait::async_trait;
use rusqlite::{params, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::{expire_channel, expired_channel, KeyValueStore, KeyspaceEvent, KvError};
use crate::common::unix_now_millis;
use crate::storage::{Database, StorageError};

const NOTIFICATION_BUFFER: usize = 1024;

/// Durable TTL key store with keyspace notifications
pub struct SqliteKeyStore {
    db: Database,
    db_index: u32,
    events: broadcast::Sender<KeyspaceEvent>,
}

impl SqliteKeyStore {
    pub fn new(db: Database, db_index: u32) -> Self {
        let (events, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            db,
            db_index,
            events,
        }
    }

    pub fn db_index(&self) -> u32 {
        self.db_index
    }

    fn publish(&self, channel: String, key: &str) {
        let _ = self.events.send(KeyspaceEvent {
            channel,
            key: key.to_string(),
        });
    }

    /// Delete every lapsed key and notify `expired` for each
    pub async fn sweep_expired(&self) -> Result<Vec<String>, KvError> {
        let lapsed = {
            let mut conn = self.db.conn()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StorageError::from)?;

            let now_ms = unix_now_millis() as i64;
            let keys = {
                let mut stmt = tx
                    .prepare(
                        "SELECT key FROM watch_keys
                         WHERE db_index = ?1 AND expires_at_ms <= ?2
                         ORDER BY expires_at_ms",
                    )
                    .map_err(StorageError::from)?;
                let rows = stmt
                    .query_map(params![self.db_index, now_ms], |row| row.get::<_, String>(0))
                    .map_err(StorageError::from)?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(StorageError::from)?
            };

            tx.execute(
                "DELETE FROM watch_keys WHERE db_index = ?1 AND expires_at_ms <= ?2",
                params![self.db_index, now_ms],
            )
            .map_err(StorageError::from)?;
            tx.commit().map_err(StorageError::from)?;
            keys
        };

        for key in &lapsed {
            tracing::debug!(key = %key, "Key expired");
            self.publish(expired_channel(self.db_index), key);
        }

        Ok(lapsed)
    }

    /// Sweep on a fixed interval until cancelled
    pub async fn run_expiry_sweeper(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_expired().await {
                        tracing::warn!(error = %e, "Expiry sweep failed");
                    }
                }
            }
        }
        tracing::debug!("Expiry sweeper stopped");
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyStore {
    async fn scan_keys(&self) -> Result<Vec<String>, KvError> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT key FROM watch_keys WHERE db_index = ?1 AND expires_at_ms > ?2 ORDER BY key",
            )
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(
                params![self.db_index, unix_now_millis() as i64],
                |row| row.get::<_, String>(0),
            )
            .map_err(StorageError::from)?;
        let keys = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;
        Ok(keys)
    }

    async fn set_with_ttl(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        if key.is_empty() {
            return Err(KvError::InvalidKey("empty key".to_string()));
        }
        let expires_at_ms = unix_now_millis() + ttl.as_millis() as u64;
        self.db
            .conn()?
            .execute(
                "INSERT INTO watch_keys (db_index, key, expires_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(db_index, key) DO UPDATE SET expires_at_ms = excluded.expires_at_ms",
                params![self.db_index, key, expires_at_ms as i64],
            )
            .map_err(StorageError::from)?;
        self.publish(expire_channel(self.db_index), key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let removed = self
            .db
            .conn()?
            .execute(
                "DELETE FROM watch_keys WHERE db_index = ?1 AND key = ?2",
                params![self.db_index, key],
            )
            .map_err(StorageError::from)?;
        Ok(removed > 0)
    }

    fn subscribe(&self) -> broadcast::Receiver<KeyspaceEvent> {
        self.events.subscribe()
    }
}
