//! Guarded Actions
//!
//! Side-effecting steps of the deal lifecycle that must not run twice:
//! paying out the escrow (release or refund) and posting the ad to the
//! channel. Each action knows how to check whether its side effect already
//! happened, which is how a stale lock left by a crashed process is
//! reconciled.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::lock::{ActionKind, LockError};
use super::store::DealRepository;
use super::types::{Deal, DealError, DealStatus, Party};

/// Guarded action errors
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Channel publish failed: {0}")]
    Publish(String),

    #[error("Deal {0} has no escrow address")]
    MissingEscrowAddress(i64),

    #[error("Deal {0} is missing a payout address")]
    MissingPayoutAddress(i64),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Deal error: {0}")]
    Deal(#[from] DealError),
}

// ============================================================================
// External collaborators
// ============================================================================

/// Moves funds out of escrow wallets
#[async_trait]
pub trait EscrowTransfers: Send + Sync {
    /// Send `amount_nano` from the escrow to `destination`, tagged with
    /// `memo`. Returns the transfer hash.
    async fn transfer(
        &self,
        escrow_address: &str,
        destination: &str,
        amount_nano: u64,
        memo: &str,
    ) -> Result<String, ActionError>;

    /// Hash of an earlier transfer out of the escrow tagged with `memo`
    async fn find_transfer(
        &self,
        escrow_address: &str,
        memo: &str,
    ) -> Result<Option<String>, ActionError>;
}

/// Publishes ad posts to channels
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    /// Post the deal's ad. Returns the channel message id.
    async fn publish(&self, deal: &Deal) -> Result<i64, ActionError>;

    /// Message id of an existing post for this deal
    async fn find_post(&self, channel_id: i64, deal_id: i64) -> Result<Option<i64>, ActionError>;
}

// ============================================================================
// Action contract
// ============================================================================

/// One lock-guarded step
#[async_trait]
pub trait GuardedAction: Send + Sync {
    fn kind(&self) -> ActionKind;

    /// Deals in this status are due for the action
    fn trigger_status(&self) -> DealStatus;

    /// Status after the side effect succeeded
    fn success_status(&self) -> DealStatus;

    /// Ground truth: did the side effect already happen?
    async fn already_applied(&self, deal: &Deal) -> Result<bool, ActionError>;

    async fn execute(&self, deal: &Deal) -> Result<(), ActionError>;
}

/// Idempotency tag carried by every escrow transfer
pub fn transfer_memo(deal_id: i64, kind: ActionKind) -> String {
    format!("deal:{}:{}", deal_id, kind)
}

fn escrow_address(deal: &Deal) -> Result<&str, ActionError> {
    deal.escrow_address
        .as_deref()
        .ok_or(ActionError::MissingEscrowAddress(deal.id))
}

async fn pay_out(
    transfers: &dyn EscrowTransfers,
    deal: &Deal,
    kind: ActionKind,
    recipient: Party,
) -> Result<(), ActionError> {
    let escrow = escrow_address(deal)?;
    let destination = deal
        .payout_address(recipient)
        .ok_or(ActionError::MissingPayoutAddress(deal.id))?;

    let tx_hash = transfers
        .transfer(escrow, destination, deal.terms.price_nano, &transfer_memo(deal.id, kind))
        .await?;

    tracing::info!(
        deal_id = deal.id,
        action = %kind,
        destination,
        amount_nano = deal.terms.price_nano,
        tx_hash = %tx_hash,
        "Escrow paid out"
    );
    Ok(())
}

async fn paid_out(
    transfers: &dyn EscrowTransfers,
    deal: &Deal,
    kind: ActionKind,
) -> Result<bool, ActionError> {
    let escrow = escrow_address(deal)?;
    Ok(transfers
        .find_transfer(escrow, &transfer_memo(deal.id, kind))
        .await?
        .is_some())
}

// ============================================================================
// Actions
// ============================================================================

/// Pays the price to the lessor
pub struct EscrowReleaseAction {
    transfers: Arc<dyn EscrowTransfers>,
}

impl EscrowReleaseAction {
    pub fn new(transfers: Arc<dyn EscrowTransfers>) -> Self {
        Self { transfers }
    }
}

#[async_trait]
impl GuardedAction for EscrowReleaseAction {
    fn kind(&self) -> ActionKind {
        ActionKind::EscrowRelease
    }

    fn trigger_status(&self) -> DealStatus {
        DealStatus::WaitingEscrowRelease
    }

    fn success_status(&self) -> DealStatus {
        DealStatus::EscrowReleaseConfirmed
    }

    async fn already_applied(&self, deal: &Deal) -> Result<bool, ActionError> {
        paid_out(self.transfers.as_ref(), deal, self.kind()).await
    }

    async fn execute(&self, deal: &Deal) -> Result<(), ActionError> {
        pay_out(self.transfers.as_ref(), deal, self.kind(), Party::Lessor).await
    }
}

/// Returns the price to the lessee
pub struct EscrowRefundAction {
    transfers: Arc<dyn EscrowTransfers>,
}

impl EscrowRefundAction {
    pub fn new(transfers: Arc<dyn EscrowTransfers>) -> Self {
        Self { transfers }
    }
}

#[async_trait]
impl GuardedAction for EscrowRefundAction {
    fn kind(&self) -> ActionKind {
        ActionKind::EscrowRefund
    }

    fn trigger_status(&self) -> DealStatus {
        DealStatus::WaitingEscrowRefund
    }

    fn success_status(&self) -> DealStatus {
        DealStatus::EscrowRefundConfirmed
    }

    async fn already_applied(&self, deal: &Deal) -> Result<bool, ActionError> {
        paid_out(self.transfers.as_ref(), deal, self.kind()).await
    }

    async fn execute(&self, deal: &Deal) -> Result<(), ActionError> {
        pay_out(self.transfers.as_ref(), deal, self.kind(), Party::Lessee).await
    }
}

/// Posts the ad once the escrow is funded and starts the deal
pub struct ChannelPostAction {
    publisher: Arc<dyn ChannelPublisher>,
    deals: Arc<dyn DealRepository>,
}

impl ChannelPostAction {
    pub fn new(publisher: Arc<dyn ChannelPublisher>, deals: Arc<dyn DealRepository>) -> Self {
        Self { publisher, deals }
    }
}

#[async_trait]
impl GuardedAction for ChannelPostAction {
    fn kind(&self) -> ActionKind {
        ActionKind::ChannelPost
    }

    fn trigger_status(&self) -> DealStatus {
        DealStatus::EscrowDepositConfirmed
    }

    fn success_status(&self) -> DealStatus {
        DealStatus::InProgress
    }

    async fn already_applied(&self, deal: &Deal) -> Result<bool, ActionError> {
        if deal.post_message_id.is_some() {
            return Ok(true);
        }
        match self.publisher.find_post(deal.channel_id, deal.id).await? {
            Some(message_id) => {
                self.deals.record_post_message(deal.id, message_id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn execute(&self, deal: &Deal) -> Result<(), ActionError> {
        let message_id = self.publisher.publish(deal).await?;
        self.deals.record_post_message(deal.id, message_id).await?;

        tracing::info!(
            deal_id = deal.id,
            channel_id = deal.channel_id,
            message_id,
            "Ad posted"
        );
        Ok(())
    }
}
