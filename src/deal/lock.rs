//! Deal Action Locks
//!
//! Row-level TTL locks guarding side-effecting actions (escrow release,
//! escrow refund, channel post). A lock left `locked` past its TTL means a
//! previous process took the action and may have finished the side effect
//! before dying; the caller reconciles before retrying.

use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::common::{log_lock_event, unix_now, unix_now_millis};
use crate::storage::{Database, StorageError};

/// Lock errors
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Deal {deal_id} action {action} is already locked")]
    AlreadyLocked { deal_id: i64, action: ActionKind },

    #[error("Lock not found: {0}")]
    NotFound(i64),

    #[error("Lock {0} cannot be released as locked")]
    InvalidRelease(i64),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// ============================================================================
// Types
// ============================================================================

/// Guarded action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    EscrowRelease,
    EscrowRefund,
    ChannelPost,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::EscrowRelease => "escrow_release",
            ActionKind::EscrowRefund => "escrow_refund",
            ActionKind::ChannelPost => "channel_post",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "escrow_release" => Ok(ActionKind::EscrowRelease),
            "escrow_refund" => Ok(ActionKind::EscrowRefund),
            "channel_post" => Ok(ActionKind::ChannelPost),
            _ => Err(StorageError::InvalidData(format!("unknown action: {}", s))),
        }
    }
}

/// Lock status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Locked,
    Completed,
    Failed,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Locked => "locked",
            LockStatus::Completed => "completed",
            LockStatus::Failed => "failed",
        }
    }
}

impl FromStr for LockStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locked" => Ok(LockStatus::Locked),
            "completed" => Ok(LockStatus::Completed),
            "failed" => Ok(LockStatus::Failed),
            _ => Err(StorageError::InvalidData(format!("unknown lock status: {}", s))),
        }
    }
}

/// Lock row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealActionLock {
    pub id: i64,
    pub deal_id: i64,
    pub action: ActionKind,
    pub status: LockStatus,
    pub expires_at_ms: u64,
}

impl DealActionLock {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

// ============================================================================
// Store
// ============================================================================

/// SQLite-backed action lock store
#[derive(Clone)]
pub struct ActionLockStore {
    db: Database,
    ttl: Duration,
}

impl ActionLockStore {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn row_to_lock(row: &Row) -> rusqlite::Result<(DealActionLock, String, String)> {
        let action: String = row.get(2)?;
        let status: String = row.get(3)?;
        Ok((
            DealActionLock {
                id: row.get(0)?,
                deal_id: row.get(1)?,
                action: ActionKind::EscrowRelease,
                status: LockStatus::Locked,
                expires_at_ms: row.get::<_, i64>(4)? as u64,
            },
            action,
            status,
        ))
    }

    fn finish(
        (mut lock, action, status): (DealActionLock, String, String),
    ) -> Result<DealActionLock, LockError> {
        lock.action = action.parse()?;
        lock.status = status.parse()?;
        Ok(lock)
    }

    /// Take the lock with the store's TTL
    pub async fn take_lock(&self, deal_id: i64, action: ActionKind) -> Result<i64, LockError> {
        self.take_lock_with_ttl(deal_id, action, self.ttl).await
    }

    /// Fails with `AlreadyLocked` while an unexpired `locked` row exists
    /// for the same deal and action.
    pub async fn take_lock_with_ttl(
        &self,
        deal_id: i64,
        action: ActionKind,
        ttl: Duration,
    ) -> Result<i64, LockError> {
        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let now_ms = unix_now_millis();
        let held: Option<i64> = tx
            .query_row(
                "SELECT id FROM deal_action_locks
                 WHERE deal_id = ?1 AND action = ?2 AND status = 'locked' AND expires_at_ms > ?3
                 LIMIT 1",
                params![deal_id, action.as_str(), now_ms as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;

        if held.is_some() {
            return Err(LockError::AlreadyLocked { deal_id, action });
        }

        let now = unix_now() as i64;
        tx.execute(
            "INSERT INTO deal_action_locks (deal_id, action, status, expires_at_ms, created_at, updated_at)
             VALUES (?1, ?2, 'locked', ?3, ?4, ?4)",
            params![
                deal_id,
                action.as_str(),
                (now_ms + ttl.as_millis() as u64) as i64,
                now
            ],
        )
        .map_err(StorageError::from)?;
        let lock_id = tx.last_insert_rowid();
        tx.commit().map_err(StorageError::from)?;

        log_lock_event("lock_taken", deal_id, action.as_str(), None);
        Ok(lock_id)
    }

    /// Set the final status (`Completed` or `Failed`)
    pub async fn release_lock(&self, lock_id: i64, status: LockStatus) -> Result<(), LockError> {
        if status == LockStatus::Locked {
            return Err(LockError::InvalidRelease(lock_id));
        }

        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE deal_action_locks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![lock_id, status.as_str(), unix_now() as i64],
            )
            .map_err(StorageError::from)?;

        if rows == 0 {
            return Err(LockError::NotFound(lock_id));
        }
        tracing::debug!(lock_id, status = status.as_str(), "Lock released");
        Ok(())
    }

    /// A lock still `locked` whose TTL has elapsed, oldest first
    pub async fn find_expired_lock(
        &self,
        deal_id: i64,
        action: ActionKind,
    ) -> Result<Option<DealActionLock>, LockError> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT id, deal_id, action, status, expires_at_ms FROM deal_action_locks
             WHERE deal_id = ?1 AND action = ?2 AND status = 'locked' AND expires_at_ms <= ?3
             ORDER BY id LIMIT 1",
            params![deal_id, action.as_str(), unix_now_millis() as i64],
            Self::row_to_lock,
        )
        .optional()
        .map_err(StorageError::from)?
        .map(Self::finish)
        .transpose()
    }

    pub async fn get_lock(&self, lock_id: i64) -> Result<Option<DealActionLock>, LockError> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT id, deal_id, action, status, expires_at_ms FROM deal_action_locks WHERE id = ?1",
            params![lock_id],
            Self::row_to_lock,
        )
        .optional()
        .map_err(StorageError::from)?
        .map(Self::finish)
        .transpose()
    }
}
