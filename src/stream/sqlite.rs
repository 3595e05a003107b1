//! SQLite Stream Log
//!
//! Entries, group cursors and pending tables live in the shared database.
//! Every multi-statement operation runs in an immediate transaction so two
//! consumers of one group never receive the same new entry.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use std::time::Duration;

use super::log::StreamLog;
use super::types::{EntryId, FieldMap, StreamEntry, StreamError};
use crate::common::unix_now_millis;
use crate::storage::{Database, StorageError};

/// Stream log backed by SQLite
#[derive(Clone)]
pub struct SqliteStreamLog {
    db: Database,
}

impl SqliteStreamLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn encode_fields(fields: &FieldMap) -> Result<String, StreamError> {
        serde_json::to_string(fields)
            .map_err(|e| StreamError::Storage(StorageError::InvalidData(e.to_string())))
    }

    fn decode_fields(id: EntryId, raw: &str) -> FieldMap {
        serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::warn!(entry_id = %id, error = %e, "Unreadable entry fields, delivering empty");
            FieldMap::new()
        })
    }

    /// Highest id ever handed out on `stream`, including ids already trimmed
    fn last_id(tx: &Transaction<'_>, stream: &str) -> Result<EntryId, StorageError> {
        let from_entries: Option<(i64, i64)> = tx
            .query_row(
                "SELECT ms, seq FROM stream_entries WHERE stream = ?1
                 ORDER BY ms DESC, seq DESC LIMIT 1",
                params![stream],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let from_groups: Option<(i64, i64)> = tx
            .query_row(
                "SELECT last_ms, last_seq FROM stream_groups WHERE stream = ?1
                 ORDER BY last_ms DESC, last_seq DESC LIMIT 1",
                params![stream],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok([from_entries, from_groups]
            .into_iter()
            .flatten()
            .map(|(ms, seq)| EntryId::new(ms as u64, seq as u64))
            .max()
            .unwrap_or(EntryId::ZERO))
    }

    fn group_cursor(tx: &Transaction<'_>, stream: &str, group: &str) -> Result<EntryId, StreamError> {
        let cursor: Option<(i64, i64)> = tx
            .query_row(
                "SELECT last_ms, last_seq FROM stream_groups WHERE stream = ?1 AND group_name = ?2",
                params![stream, group],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(StorageError::from)?;

        cursor
            .map(|(ms, seq)| EntryId::new(ms as u64, seq as u64))
            .ok_or_else(|| StreamError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }
}

#[async_trait]
impl StreamLog for SqliteStreamLog {
    async fn append(&self, stream: &str, fields: &FieldMap) -> Result<EntryId, StreamError> {
        let encoded = Self::encode_fields(fields)?;
        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let id = EntryId::next_after(Self::last_id(&tx, stream)?, unix_now_millis());
        tx.execute(
            "INSERT INTO stream_entries (stream, ms, seq, fields) VALUES (?1, ?2, ?3, ?4)",
            params![stream, id.millis as i64, id.seq as i64, encoded],
        )
        .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;

        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, StreamError> {
        let conn = self.db.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO stream_groups (stream, group_name, last_ms, last_seq)
                 VALUES (?1, ?2, 0, 0)",
                params![stream, group],
            )
            .map_err(StorageError::from)?;
        Ok(inserted == 1)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        limit: usize,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let cursor = Self::group_cursor(&tx, stream, group)?;
        let rows: Vec<(i64, i64, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT ms, seq, fields FROM stream_entries
                     WHERE stream = ?1 AND (ms > ?2 OR (ms = ?2 AND seq > ?3))
                     ORDER BY ms, seq LIMIT ?4",
                )
                .map_err(StorageError::from)?;
            let mapped = stmt
                .query_map(
                    params![stream, cursor.millis as i64, cursor.seq as i64, limit as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(StorageError::from)?;
            mapped
                .collect::<Result<_, _>>()
                .map_err(StorageError::from)?
        };

        let now = unix_now_millis() as i64;
        let mut entries = Vec::with_capacity(rows.len());
        for (ms, seq, raw) in rows {
            tx.execute(
                "INSERT OR REPLACE INTO stream_pending
                 (stream, group_name, ms, seq, consumer, delivered_at_ms, delivery_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                params![stream, group, ms, seq, consumer, now],
            )
            .map_err(StorageError::from)?;

            let id = EntryId::new(ms as u64, seq as u64);
            entries.push(StreamEntry {
                id,
                fields: Self::decode_fields(id, &raw),
            });
        }

        if let Some(last) = entries.last() {
            tx.execute(
                "UPDATE stream_groups SET last_ms = ?3, last_seq = ?4
                 WHERE stream = ?1 AND group_name = ?2",
                params![stream, group, last.id.millis as i64, last.id.seq as i64],
            )
            .map_err(StorageError::from)?;
        }
        tx.commit().map_err(StorageError::from)?;

        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, StreamError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.conn()?;
        let tx = conn.transaction().map_err(StorageError::from)?;
        let mut acked = 0u64;
        for id in ids {
            acked += tx
                .execute(
                    "DELETE FROM stream_pending
                     WHERE stream = ?1 AND group_name = ?2 AND ms = ?3 AND seq = ?4",
                    params![stream, group, id.millis as i64, id.seq as i64],
                )
                .map_err(StorageError::from)? as u64;
        }
        tx.commit().map_err(StorageError::from)?;

        Ok(acked)
    }

    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        limit: usize,
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let now = unix_now_millis();
        let idle_before = now.saturating_sub(min_idle.as_millis() as u64) as i64;

        let rows: Vec<(i64, i64, Option<String>)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT p.ms, p.seq, e.fields FROM stream_pending p
                     LEFT JOIN stream_entries e
                       ON e.stream = p.stream AND e.ms = p.ms AND e.seq = p.seq
                     WHERE p.stream = ?1 AND p.group_name = ?2 AND p.delivered_at_ms <= ?3
                     ORDER BY p.ms, p.seq LIMIT ?4",
                )
                .map_err(StorageError::from)?;
            let mapped = stmt
                .query_map(params![stream, group, idle_before, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .map_err(StorageError::from)?;
            mapped
                .collect::<Result<_, _>>()
                .map_err(StorageError::from)?
        };

        let mut entries = Vec::with_capacity(rows.len());
        for (ms, seq, raw) in rows {
            let Some(raw) = raw else {
                // Trimmed while pending: nothing left to deliver
                tx.execute(
                    "DELETE FROM stream_pending
                     WHERE stream = ?1 AND group_name = ?2 AND ms = ?3 AND seq = ?4",
                    params![stream, group, ms, seq],
                )
                .map_err(StorageError::from)?;
                continue;
            };

            tx.execute(
                "UPDATE stream_pending
                 SET consumer = ?5, delivered_at_ms = ?6, delivery_count = delivery_count + 1
                 WHERE stream = ?1 AND group_name = ?2 AND ms = ?3 AND seq = ?4",
                params![stream, group, ms, seq, consumer, now as i64],
            )
            .map_err(StorageError::from)?;

            let id = EntryId::new(ms as u64, seq as u64);
            entries.push(StreamEntry {
                id,
                fields: Self::decode_fields(id, &raw),
            });
        }
        tx.commit().map_err(StorageError::from)?;

        Ok(entries)
    }

    async fn trim_before(&self, stream: &str, cutoff_millis: u64) -> Result<u64, StreamError> {
        let conn = self.db.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM stream_entries WHERE stream = ?1 AND ms < ?2",
                params![stream, cutoff_millis as i64],
            )
            .map_err(StorageError::from)?;
        Ok(removed as u64)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StreamError> {
        let conn = self.db.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM stream_pending WHERE stream = ?1 AND group_name = ?2",
                params![stream, group],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> SqliteStreamLog {
        SqliteStreamLog::new(Database::in_memory().unwrap())
    }

    fn fields(n: u64) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("n".to_string(), n.to_string());
        map
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let log = log();
        let mut last = EntryId::ZERO;
        for n in 0..20 {
            let id = log.append("s", &fields(n)).await.unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[tokio::test]
    async fn test_group_creation_is_idempotent() {
        let log = log();
        assert!(log.create_group("s", "g").await.unwrap());
        assert!(!log.create_group("s", "g").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let log = log();
        let err = log.read_group("s", "missing", "c1", 10).await.unwrap_err();
        assert!(matches!(err, StreamError::NoGroup { .. }));
    }

    #[tokio::test]
    async fn test_each_entry_delivered_once_per_group() {
        let log = log();
        log.create_group("s", "g").await.unwrap();
        log.create_group("s", "other").await.unwrap();
        for n in 0..3 {
            log.append("s", &fields(n)).await.unwrap();
        }

        let first = log.read_group("s", "g", "c1", 2).await.unwrap();
        let second = log.read_group("s", "g", "c2", 10).await.unwrap();
        let third = log.read_group("s", "g", "c1", 10).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(third.is_empty());
        assert_eq!(second[0].fields.get("n").map(String::as_str), Some("2"));

        // Independent cursor per group
        assert_eq!(log.read_group("s", "other", "c9", 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unacked_entries_are_reclaimable() {
        let log = log();
        log.create_group("s", "g").await.unwrap();
        log.append("s", &fields(1)).await.unwrap();
        log.append("s", &fields(2)).await.unwrap();

        let delivered = log.read_group("s", "g", "crashed", 10).await.unwrap();
        log.ack("s", "g", &[delivered[0].id]).await.unwrap();
        assert_eq!(log.pending_count("s", "g").await.unwrap(), 1);

        // Not idle long enough yet
        let early = log
            .claim_pending("s", "g", "peer", 10, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(early.is_empty());

        let reclaimed = log
            .claim_pending("s", "g", "peer", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, delivered[1].id);

        assert_eq!(log.ack("s", "g", &[reclaimed[0].id]).await.unwrap(), 1);
        assert_eq!(log.pending_count("s", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trim_ignores_ack_state() {
        let log = log();
        log.create_group("s", "g").await.unwrap();
        log.append("s", &fields(1)).await.unwrap();
        log.read_group("s", "g", "c1", 10).await.unwrap();

        let removed = log.trim_before("s", unix_now_millis() + 1).await.unwrap();
        assert_eq!(removed, 1);

        // The pending row for the trimmed entry is dropped on reclaim
        let reclaimed = log
            .claim_pending("s", "g", "c2", 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(reclaimed.is_empty());
        assert_eq!(log.pending_count("s", "g").await.unwrap(), 0);

        // New ids keep increasing past the trimmed ones
        let next = log.append("s", &fields(2)).await.unwrap();
        assert_eq!(log.read_group("s", "g", "c1", 10).await.unwrap()[0].id, next);
    }
}
