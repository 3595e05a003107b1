//! Deal Types
//!
//! Deal lifecycle:
//! draft → approved → waiting_escrow_deposit → escrow_deposit_confirmed → in_progress
//!   → waiting_escrow_release | waiting_escrow_refund
//!   → escrow_release_confirmed | escrow_refund_confirmed → completed
//!
//! Side branches: draft → rejected, waiting_escrow_deposit → expired.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::kv::KvError;
use crate::storage::StorageError;

/// Deal errors
#[derive(Debug, Error)]
pub enum DealError {
    #[error("Deal not found: {0}")]
    NotFound(i64),

    #[error("Deal {0} is not a draft")]
    NotDraft(i64),

    #[error("User {user_id} is not a party to deal {deal_id}")]
    NotParty { deal_id: i64, user_id: i64 },

    #[error("Deal {0} is missing a payout address")]
    PayoutAddressMissing(i64),

    #[error("User {0} has no linked wallet")]
    WalletNotLinked(i64),

    #[error("Linked wallet of user {user_id} does not match their payout address on deal {deal_id}")]
    WalletMismatch { deal_id: i64, user_id: i64 },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: DealStatus, to: DealStatus },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid terms: {0}")]
    InvalidTerms(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Escrow wallet error: {0}")]
    Wallet(String),

    #[error("Watch list error: {0}")]
    WatchList(#[from] KvError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DealError {
    /// Failures that should be retried rather than reported as business outcomes
    pub fn is_transient(&self) -> bool {
        match self {
            DealError::Storage(e) => e.is_transient(),
            DealError::WatchList(_) => true,
            _ => false,
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Deal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Draft,
    Approved,
    WaitingEscrowDeposit,
    EscrowDepositConfirmed,
    InProgress,
    WaitingEscrowRelease,
    WaitingEscrowRefund,
    EscrowReleaseConfirmed,
    EscrowRefundConfirmed,
    Completed,
    Expired,
    Rejected,
}

impl DealStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DealStatus::Completed | DealStatus::Expired | DealStatus::Rejected
        )
    }

    /// Allowed transitions
    pub fn can_transition_to(&self, next: DealStatus) -> bool {
        use DealStatus::*;
        matches!(
            (self, next),
            (Draft, Approved)
                | (Draft, Rejected)
                | (Approved, WaitingEscrowDeposit)
                | (WaitingEscrowDeposit, EscrowDepositConfirmed)
                | (WaitingEscrowDeposit, Expired)
                | (EscrowDepositConfirmed, InProgress)
                | (InProgress, WaitingEscrowRelease)
                | (InProgress, WaitingEscrowRefund)
                | (WaitingEscrowRelease, EscrowReleaseConfirmed)
                | (WaitingEscrowRefund, EscrowRefundConfirmed)
                | (EscrowReleaseConfirmed, Completed)
                | (EscrowRefundConfirmed, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Draft => "draft",
            DealStatus::Approved => "approved",
            DealStatus::WaitingEscrowDeposit => "waiting_escrow_deposit",
            DealStatus::EscrowDepositConfirmed => "escrow_deposit_confirmed",
            DealStatus::InProgress => "in_progress",
            DealStatus::WaitingEscrowRelease => "waiting_escrow_release",
            DealStatus::WaitingEscrowRefund => "waiting_escrow_refund",
            DealStatus::EscrowReleaseConfirmed => "escrow_release_confirmed",
            DealStatus::EscrowRefundConfirmed => "escrow_refund_confirmed",
            DealStatus::Completed => "completed",
            DealStatus::Expired => "expired",
            DealStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DealStatus {
    type Err = DealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DealStatus::Draft),
            "approved" => Ok(DealStatus::Approved),
            "waiting_escrow_deposit" => Ok(DealStatus::WaitingEscrowDeposit),
            "escrow_deposit_confirmed" => Ok(DealStatus::EscrowDepositConfirmed),
            "in_progress" => Ok(DealStatus::InProgress),
            "waiting_escrow_release" => Ok(DealStatus::WaitingEscrowRelease),
            "waiting_escrow_refund" => Ok(DealStatus::WaitingEscrowRefund),
            "escrow_release_confirmed" => Ok(DealStatus::EscrowReleaseConfirmed),
            "escrow_refund_confirmed" => Ok(DealStatus::EscrowRefundConfirmed),
            "completed" => Ok(DealStatus::Completed),
            "expired" => Ok(DealStatus::Expired),
            "rejected" => Ok(DealStatus::Rejected),
            _ => Err(DealError::InvalidStatus(s.to_string())),
        }
    }
}

// ============================================================================
// Deal
// ============================================================================

/// Side of a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    /// Channel owner, paid on release
    Lessor,
    /// Advertiser, funds the escrow and is refunded on refund
    Lessee,
}

/// Terms covered by both signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealTerms {
    pub deal_type: String,
    pub duration_hours: u32,
    /// Nanotons
    pub price_nano: u64,
    pub details: String,
}

impl DealTerms {
    pub fn validate(&self) -> Result<(), DealError> {
        if self.deal_type.trim().is_empty() {
            return Err(DealError::InvalidTerms("deal type is empty".to_string()));
        }
        if self.duration_hours == 0 {
            return Err(DealError::InvalidTerms("duration must be positive".to_string()));
        }
        if self.price_nano == 0 {
            return Err(DealError::InvalidTerms("price must be positive".to_string()));
        }
        Ok(())
    }
}

/// Partial edit of draft terms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftUpdate {
    pub deal_type: Option<String>,
    pub duration_hours: Option<u32>,
    pub price_nano: Option<u64>,
    pub details: Option<String>,
}

impl DraftUpdate {
    pub fn is_empty(&self) -> bool {
        self.deal_type.is_none()
            && self.duration_hours.is_none()
            && self.price_nano.is_none()
            && self.details.is_none()
    }

    pub fn apply(&self, terms: &DealTerms) -> DealTerms {
        DealTerms {
            deal_type: self.deal_type.clone().unwrap_or_else(|| terms.deal_type.clone()),
            duration_hours: self.duration_hours.unwrap_or(terms.duration_hours),
            price_nano: self.price_nano.unwrap_or(terms.price_nano),
            details: self.details.clone().unwrap_or_else(|| terms.details.clone()),
        }
    }
}

/// New deal request
#[derive(Debug, Clone)]
pub struct NewDeal {
    pub lessor_id: i64,
    pub lessee_id: i64,
    pub channel_id: i64,
    pub terms: DealTerms,
}

/// Deal record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: i64,
    pub lessor_id: i64,
    pub lessee_id: i64,
    pub channel_id: i64,
    pub status: DealStatus,
    pub terms: DealTerms,
    /// Price + gas + commission, nanotons
    pub escrow_amount_nano: u64,
    pub lessor_signature: Option<String>,
    pub lessee_signature: Option<String>,
    pub escrow_address: Option<String>,
    pub lessor_payout_address: Option<String>,
    pub lessee_payout_address: Option<String>,
    pub post_message_id: Option<i64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Deal {
    pub fn party_of(&self, user_id: i64) -> Option<Party> {
        if user_id == self.lessor_id {
            Some(Party::Lessor)
        } else if user_id == self.lessee_id {
            Some(Party::Lessee)
        } else {
            None
        }
    }

    pub fn user_of(&self, party: Party) -> i64 {
        match party {
            Party::Lessor => self.lessor_id,
            Party::Lessee => self.lessee_id,
        }
    }

    pub fn payout_address(&self, party: Party) -> Option<&str> {
        match party {
            Party::Lessor => self.lessor_payout_address.as_deref(),
            Party::Lessee => self.lessee_payout_address.as_deref(),
        }
    }

    pub fn signature(&self, party: Party) -> Option<&str> {
        match party {
            Party::Lessor => self.lessor_signature.as_deref(),
            Party::Lessee => self.lessee_signature.as_deref(),
        }
    }
}

// ============================================================================
// Fees
// ============================================================================

/// Amounts added on top of the price to form the escrow amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowFees {
    /// Fixed gas reserve, nanotons
    pub gas_nano: u64,
    /// Platform commission, percent of price
    pub commission_percent: u64,
}

impl Default for EscrowFees {
    fn default() -> Self {
        Self {
            gas_nano: 50_000_000,
            commission_percent: 5,
        }
    }
}

impl EscrowFees {
    /// price + gas + price * commission% / 100, in integer nanotons
    pub fn escrow_amount(&self, price_nano: u64) -> Result<u64, DealError> {
        let commission = (price_nano as u128 * self.commission_percent as u128) / 100;
        let total = price_nano as u128 + self.gas_nano as u128 + commission;
        u64::try_from(total)
            .map_err(|_| DealError::InvalidTerms(format!("escrow amount overflows: {}", total)))
    }
}

/// Which way the escrow settles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Pay the lessor
    Release,
    /// Return funds to the lessee
    Refund,
}

impl SettlementOutcome {
    pub fn waiting_status(&self) -> DealStatus {
        match self {
            SettlementOutcome::Release => DealStatus::WaitingEscrowRelease,
            SettlementOutcome::Refund => DealStatus::WaitingEscrowRefund,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_terminal() {
        for status in [
            DealStatus::Draft,
            DealStatus::WaitingEscrowDeposit,
            DealStatus::EscrowRefundConfirmed,
            DealStatus::Rejected,
        ] {
            assert_eq!(status.to_string().parse::<DealStatus>().unwrap(), status);
        }
        assert!(DealStatus::Completed.is_terminal());
        assert!(DealStatus::Expired.is_terminal());
        assert!(!DealStatus::InProgress.is_terminal());
        assert!("cancelled".parse::<DealStatus>().is_err());
    }

    #[test]
    fn test_transitions() {
        assert!(DealStatus::Draft.can_transition_to(DealStatus::Approved));
        assert!(DealStatus::Draft.can_transition_to(DealStatus::Rejected));
        assert!(!DealStatus::Approved.can_transition_to(DealStatus::Rejected));
        assert!(DealStatus::WaitingEscrowDeposit.can_transition_to(DealStatus::Expired));
        assert!(!DealStatus::EscrowDepositConfirmed.can_transition_to(DealStatus::Expired));
        assert!(DealStatus::InProgress.can_transition_to(DealStatus::WaitingEscrowRefund));
        assert!(!DealStatus::WaitingEscrowRelease.can_transition_to(DealStatus::EscrowRefundConfirmed));
        assert!(DealStatus::EscrowRefundConfirmed.can_transition_to(DealStatus::Completed));
        assert!(!DealStatus::Completed.can_transition_to(DealStatus::Draft));
    }

    #[test]
    fn test_escrow_amount_for_one_ton() {
        let fees = EscrowFees::default();
        assert_eq!(fees.escrow_amount(1_000_000_000).unwrap(), 1_100_000_000);
    }

    #[test]
    fn test_escrow_amount_overflow_rejected() {
        let fees = EscrowFees {
            gas_nano: u64::MAX,
            commission_percent: 5,
        };
        assert!(fees.escrow_amount(1).is_err());
    }

    #[test]
    fn test_draft_update_apply() {
        let terms = DealTerms {
            deal_type: "post".to_string(),
            duration_hours: 24,
            price_nano: 1_000_000_000,
            details: "pinned".to_string(),
        };
        let update = DraftUpdate {
            price_nano: Some(2_000_000_000),
            ..DraftUpdate::default()
        };
        let next = update.apply(&terms);
        assert_eq!(next.price_nano, 2_000_000_000);
        assert_eq!(next.deal_type, "post");
        assert!(DraftUpdate::default().is_empty());
    }
}
