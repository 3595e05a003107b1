//! Deal Store Traits
//!
//! Each consumer depends on the narrowest capability it uses:
//! - [`DealRepository`]: the deal service and action workers
//! - [`EscrowDepositDeals`]: the escrow deposit worker
//! - [`crate::chain::DealExpirer`]: the watch-list sync
//!
//! Status changes are conditional on the expected current status and report
//! whether a row actually changed; losing a race is `Ok(false)`, not an error.

use async_trait::async_trait;

use super::signature::DealSigner;
use super::types::{Deal, DealError, DealStatus, DealTerms, NewDeal, Party};

#[async_trait]
pub trait DealRepository: Send + Sync {
    async fn insert_deal(&self, deal: &NewDeal, escrow_amount_nano: u64) -> Result<Deal, DealError>;

    async fn get_deal(&self, deal_id: i64) -> Result<Option<Deal>, DealError>;

    /// Replace draft terms and clear both signatures. False if not a draft.
    async fn update_draft_terms(
        &self,
        deal_id: i64,
        terms: &DealTerms,
        escrow_amount_nano: u64,
    ) -> Result<bool, DealError>;

    /// Set one party's payout address on a draft and clear both signatures
    async fn set_payout_address(
        &self,
        deal_id: i64,
        party: Party,
        address: &str,
    ) -> Result<bool, DealError>;

    /// Store `party`'s signature and approve if both signatures match the
    /// current terms, atomically. Fails with `NotDraft` if the deal left draft.
    async fn sign_and_try_approve(
        &self,
        deal_id: i64,
        party: Party,
        signature: &str,
        signer: &DealSigner,
    ) -> Result<Deal, DealError>;

    /// `UPDATE ... WHERE status = from`
    async fn update_status(
        &self,
        deal_id: i64,
        from: DealStatus,
        to: DealStatus,
    ) -> Result<bool, DealError>;

    /// Persist the escrow address and move approved -> waiting_escrow_deposit
    async fn assign_escrow(&self, deal_id: i64, escrow_address: &str) -> Result<bool, DealError>;

    async fn list_by_status(&self, status: DealStatus, limit: usize) -> Result<Vec<Deal>, DealError>;

    async fn list_approved_without_escrow(&self, limit: usize) -> Result<Vec<Deal>, DealError>;

    async fn record_post_message(&self, deal_id: i64, message_id: i64) -> Result<bool, DealError>;

    async fn link_wallet(&self, user_id: i64, address: &str) -> Result<(), DealError>;

    async fn linked_wallet(&self, user_id: i64) -> Result<Option<String>, DealError>;
}

/// What the escrow deposit worker needs
#[async_trait]
pub trait EscrowDepositDeals: Send + Sync {
    /// The deal in `waiting_escrow_deposit` on this escrow address, if any
    async fn find_awaiting_deposit(&self, escrow_address: &str) -> Result<Option<Deal>, DealError>;

    /// waiting_escrow_deposit -> escrow_deposit_confirmed
    async fn confirm_escrow_deposit(&self, deal_id: i64) -> Result<bool, DealError>;
}
