//! SQLite Deal Store
//!
//! Durable deal records on the shared database. Signing runs in an
//! immediate transaction so a concurrent draft edit cannot interleave
//! between writing a signature and checking both.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::signature::DealSigner;
use super::store::{DealRepository, EscrowDepositDeals};
use super::types::{Deal, DealError, DealStatus, DealTerms, NewDeal, Party};
use crate::chain::DealExpirer;
use crate::common::{log_deal_transition, unix_now};
use crate::storage::{Database, StorageError};

const DEAL_COLUMNS: &str = "id, lessor_id, lessee_id, channel_id, status, deal_type, duration_hours, \
     price_nano, details, escrow_amount_nano, lessor_signature, lessee_signature, escrow_address, \
     lessor_payout_address, lessee_payout_address, post_message_id, created_at, updated_at";

/// SQLite-backed deal store
#[derive(Clone)]
pub struct SqliteDealStore {
    db: Database,
}

impl SqliteDealStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Convert a row to a Deal
    fn row_to_deal(row: &Row) -> rusqlite::Result<(Deal, String)> {
        let status: String = row.get(4)?;
        let deal = Deal {
            id: row.get(0)?,
            lessor_id: row.get(1)?,
            lessee_id: row.get(2)?,
            channel_id: row.get(3)?,
            status: DealStatus::Draft,
            terms: DealTerms {
                deal_type: row.get(5)?,
                duration_hours: row.get::<_, i64>(6)? as u32,
                price_nano: row.get::<_, i64>(7)? as u64,
                details: row.get(8)?,
            },
            escrow_amount_nano: row.get::<_, i64>(9)? as u64,
            lessor_signature: row.get(10)?,
            lessee_signature: row.get(11)?,
            escrow_address: row.get(12)?,
            lessor_payout_address: row.get(13)?,
            lessee_payout_address: row.get(14)?,
            post_message_id: row.get(15)?,
            created_at: row.get::<_, i64>(16)? as u64,
            updated_at: row.get::<_, i64>(17)? as u64,
        };
        Ok((deal, status))
    }

    fn finish((mut deal, status): (Deal, String)) -> Result<Deal, DealError> {
        deal.status = status
            .parse()
            .map_err(|_| StorageError::InvalidData(format!("deal {} has status {}", deal.id, status)))?;
        Ok(deal)
    }

    fn load(conn: &Connection, deal_id: i64) -> Result<Option<Deal>, DealError> {
        let sql = format!("SELECT {} FROM deals WHERE id = ?1", DEAL_COLUMNS);
        conn.query_row(&sql, params![deal_id], Self::row_to_deal)
            .optional()
            .map_err(StorageError::from)?
            .map(Self::finish)
            .transpose()
    }

    fn query_deals(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Deal>, DealError> {
        let mut stmt = conn.prepare(sql).map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params, Self::row_to_deal)
            .map_err(StorageError::from)?;

        let mut deals = Vec::new();
        for row in rows {
            deals.push(Self::finish(row.map_err(StorageError::from)?)?);
        }
        Ok(deals)
    }
}

#[async_trait]
impl DealRepository for SqliteDealStore {
    async fn insert_deal(&self, deal: &NewDeal, escrow_amount_nano: u64) -> Result<Deal, DealError> {
        let conn = self.db.conn()?;
        let now = unix_now() as i64;

        conn.execute(
            "INSERT INTO deals (lessor_id, lessee_id, channel_id, status, deal_type, duration_hours,
                price_nano, details, escrow_amount_nano, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'draft', ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                deal.lessor_id,
                deal.lessee_id,
                deal.channel_id,
                deal.terms.deal_type,
                deal.terms.duration_hours as i64,
                deal.terms.price_nano as i64,
                deal.terms.details,
                escrow_amount_nano as i64,
                now,
            ],
        )
        .map_err(StorageError::from)?;

        let id = conn.last_insert_rowid();
        Self::load(&conn, id)?.ok_or(DealError::NotFound(id))
    }

    async fn get_deal(&self, deal_id: i64) -> Result<Option<Deal>, DealError> {
        let conn = self.db.conn()?;
        Self::load(&conn, deal_id)
    }

    async fn update_draft_terms(
        &self,
        deal_id: i64,
        terms: &DealTerms,
        escrow_amount_nano: u64,
    ) -> Result<bool, DealError> {
        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE deals SET deal_type = ?2, duration_hours = ?3, price_nano = ?4, details = ?5,
                    escrow_amount_nano = ?6, lessor_signature = NULL, lessee_signature = NULL,
                    updated_at = ?7
                 WHERE id = ?1 AND status = 'draft'",
                params![
                    deal_id,
                    terms.deal_type,
                    terms.duration_hours as i64,
                    terms.price_nano as i64,
                    terms.details,
                    escrow_amount_nano as i64,
                    unix_now() as i64,
                ],
            )
            .map_err(StorageError::from)?;
        Ok(rows == 1)
    }

    async fn set_payout_address(
        &self,
        deal_id: i64,
        party: Party,
        address: &str,
    ) -> Result<bool, DealError> {
        let column = match party {
            Party::Lessor => "lessor_payout_address",
            Party::Lessee => "lessee_payout_address",
        };
        let sql = format!(
            "UPDATE deals SET {} = ?2, lessor_signature = NULL, lessee_signature = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'draft'",
            column
        );

        let conn = self.db.conn()?;
        let rows = conn
            .execute(&sql, params![deal_id, address, unix_now() as i64])
            .map_err(StorageError::from)?;
        Ok(rows == 1)
    }

    async fn sign_and_try_approve(
        &self,
        deal_id: i64,
        party: Party,
        signature: &str,
        signer: &DealSigner,
    ) -> Result<Deal, DealError> {
        let column = match party {
            Party::Lessor => "lessor_signature",
            Party::Lessee => "lessee_signature",
        };
        let sql = format!(
            "UPDATE deals SET {} = ?2, updated_at = ?3 WHERE id = ?1 AND status = 'draft'",
            column
        );

        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let now = unix_now() as i64;
        let rows = tx
            .execute(&sql, params![deal_id, signature, now])
            .map_err(StorageError::from)?;
        if rows == 0 {
            return match Self::load(&tx, deal_id)? {
                Some(_) => Err(DealError::NotDraft(deal_id)),
                None => Err(DealError::NotFound(deal_id)),
            };
        }

        let mut deal = Self::load(&tx, deal_id)?.ok_or(DealError::NotFound(deal_id))?;
        let approved = signer.is_fully_signed(&deal);
        if approved {
            tx.execute(
                "UPDATE deals SET status = 'approved', updated_at = ?2 WHERE id = ?1 AND status = 'draft'",
                params![deal_id, now],
            )
            .map_err(StorageError::from)?;
            deal.status = DealStatus::Approved;
        }
        tx.commit().map_err(StorageError::from)?;

        if approved {
            log_deal_transition(deal_id, DealStatus::Draft.as_str(), DealStatus::Approved.as_str(), true);
        }
        Ok(deal)
    }

    async fn update_status(
        &self,
        deal_id: i64,
        from: DealStatus,
        to: DealStatus,
    ) -> Result<bool, DealError> {
        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE deals SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
                params![deal_id, from.as_str(), to.as_str(), unix_now() as i64],
            )
            .map_err(StorageError::from)?;
        Ok(rows == 1)
    }

    async fn assign_escrow(&self, deal_id: i64, escrow_address: &str) -> Result<bool, DealError> {
        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE deals SET escrow_address = ?2, status = 'waiting_escrow_deposit', updated_at = ?3
                 WHERE id = ?1 AND status = 'approved' AND escrow_address IS NULL",
                params![deal_id, escrow_address, unix_now() as i64],
            )
            .map_err(StorageError::from)?;
        Ok(rows == 1)
    }

    async fn list_by_status(&self, status: DealStatus, limit: usize) -> Result<Vec<Deal>, DealError> {
        let conn = self.db.conn()?;
        let sql = format!(
            "SELECT {} FROM deals WHERE status = ?1 ORDER BY id LIMIT ?2",
            DEAL_COLUMNS
        );
        Self::query_deals(&conn, &sql, params![status.as_str(), limit as i64])
    }

    async fn list_approved_without_escrow(&self, limit: usize) -> Result<Vec<Deal>, DealError> {
        let conn = self.db.conn()?;
        let sql = format!(
            "SELECT {} FROM deals WHERE status = 'approved' AND escrow_address IS NULL
             ORDER BY id LIMIT ?1",
            DEAL_COLUMNS
        );
        Self::query_deals(&conn, &sql, params![limit as i64])
    }

    async fn record_post_message(&self, deal_id: i64, message_id: i64) -> Result<bool, DealError> {
        let conn = self.db.conn()?;
        let rows = conn
            .execute(
                "UPDATE deals SET post_message_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![deal_id, message_id, unix_now() as i64],
            )
            .map_err(StorageError::from)?;
        Ok(rows == 1)
    }

    async fn link_wallet(&self, user_id: i64, address: &str) -> Result<(), DealError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO users (id, wallet_address) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET wallet_address = excluded.wallet_address",
            params![user_id, address],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn linked_wallet(&self, user_id: i64) -> Result<Option<String>, DealError> {
        let conn = self.db.conn()?;
        let wallet: Option<Option<String>> = conn
            .query_row(
                "SELECT wallet_address FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(wallet.flatten())
    }
}

#[async_trait]
impl EscrowDepositDeals for SqliteDealStore {
    async fn find_awaiting_deposit(&self, escrow_address: &str) -> Result<Option<Deal>, DealError> {
        let conn = self.db.conn()?;
        let sql = format!(
            "SELECT {} FROM deals WHERE escrow_address = ?1 AND status = 'waiting_escrow_deposit'",
            DEAL_COLUMNS
        );
        Ok(Self::query_deals(&conn, &sql, params![escrow_address])?
            .into_iter()
            .next())
    }

    async fn confirm_escrow_deposit(&self, deal_id: i64) -> Result<bool, DealError> {
        self.update_status(
            deal_id,
            DealStatus::WaitingEscrowDeposit,
            DealStatus::EscrowDepositConfirmed,
        )
        .await
    }
}

#[async_trait]
impl DealExpirer for SqliteDealStore {
    async fn set_deal_status_expired_by_escrow_address(
        &self,
        address: &str,
    ) -> Result<bool, StorageError> {
        let conn = self.db.conn()?;
        let rows = conn.execute(
            "UPDATE deals SET status = 'expired', updated_at = ?2
             WHERE escrow_address = ?1 AND status = 'waiting_escrow_deposit'",
            params![address, unix_now() as i64],
        )?;

        tracing::info!(
            target: "escrow::deal",
            escrow_address = address,
            applied = rows > 0,
            "waiting_escrow_deposit -> expired"
        );
        Ok(rows > 0)
    }
}
