//! SQLite Database Handle
//!
//! Provides durable storage that survives service restarts.
//! Uses connection pooling via r2d2 for concurrent access.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

use super::error::StorageError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled SQLite database shared by all stores
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (or create) the database file and run migrations
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Connection(e.to_string()))?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            Ok(())
        });
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self { pool };
        db.run_migrations()?;

        Ok(db)
    }

    /// Create an in-memory database (for testing)
    ///
    /// Single connection, so every store sharing this handle sees the same data.
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;

        let db = Self { pool };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                wallet_address TEXT
            );

            CREATE TABLE IF NOT EXISTS deals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                lessor_id INTEGER NOT NULL,
                lessee_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                deal_type TEXT NOT NULL,
                duration_hours INTEGER NOT NULL,
                price_nano INTEGER NOT NULL,
                details TEXT NOT NULL,
                escrow_amount_nano INTEGER NOT NULL,
                lessor_signature TEXT,
                lessee_signature TEXT,
                escrow_address TEXT UNIQUE,
                lessor_payout_address TEXT,
                lessee_payout_address TEXT,
                post_message_id INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_deals_status ON deals(status);
            CREATE INDEX IF NOT EXISTS idx_deals_escrow_address ON deals(escrow_address);

            CREATE TABLE IF NOT EXISTS deal_action_locks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deal_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_locks_deal_action
                ON deal_action_locks(deal_id, action, status);

            CREATE TABLE IF NOT EXISTS stream_entries (
                stream TEXT NOT NULL,
                ms INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                fields TEXT NOT NULL,
                PRIMARY KEY (stream, ms, seq)
            );

            CREATE TABLE IF NOT EXISTS stream_groups (
                stream TEXT NOT NULL,
                group_name TEXT NOT NULL,
                last_ms INTEGER NOT NULL,
                last_seq INTEGER NOT NULL,
                PRIMARY KEY (stream, group_name)
            );

            CREATE TABLE IF NOT EXISTS stream_pending (
                stream TEXT NOT NULL,
                group_name TEXT NOT NULL,
                ms INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                consumer TEXT NOT NULL,
                delivered_at_ms INTEGER NOT NULL,
                delivery_count INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (stream, group_name, ms, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_pending_idle
                ON stream_pending(stream, group_name, delivered_at_ms);

            CREATE TABLE IF NOT EXISTS watch_keys (
                db_index INTEGER NOT NULL,
                key TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                PRIMARY KEY (db_index, key)
            );

            CREATE INDEX IF NOT EXISTS idx_watch_keys_deadline
                ON watch_keys(db_index, expires_at_ms);
            "#,
        )?;

        Ok(())
    }
}
