//! Event Kinds
//!
//! The five logical streams and the typed events carried on them.

use std::fmt;

use super::types::{field_i64, field_str, field_u64, FieldMap, StreamEvent};
use crate::chain::DepositCandidate;

/// Logical streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    EscrowDeposit,
    ChannelStatsRequest,
    BotUpdate,
    Notification,
    Payment,
}

impl StreamKind {
    pub const ALL: [StreamKind; 5] = [
        StreamKind::EscrowDeposit,
        StreamKind::ChannelStatsRequest,
        StreamKind::BotUpdate,
        StreamKind::Notification,
        StreamKind::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::EscrowDeposit => "escrow_deposit",
            StreamKind::ChannelStatsRequest => "channel_stats_request",
            StreamKind::BotUpdate => "bot_update",
            StreamKind::Notification => "notification",
            StreamKind::Payment => "payment",
        }
    }

    /// Key of the stream in the log
    pub fn stream_key(&self) -> String {
        format!("stream:{}", self.as_str())
    }

    /// Consumer group every worker of this kind joins
    pub fn group_name(&self) -> String {
        format!("{}_workers", self.as_str())
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Escrow deposit
// ============================================================================

/// A deposit into an escrow address, as published by the chain observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowDepositEvent {
    /// Raw address `<wc>:<hex>`
    pub address: String,
    /// Nanotons
    pub amount: u64,
    /// Unix seconds
    pub timestamp: u64,
    /// Hex transaction hash
    pub tx_hash: String,
}

impl From<DepositCandidate> for EscrowDepositEvent {
    fn from(candidate: DepositCandidate) -> Self {
        Self {
            address: candidate.address.to_raw(),
            amount: candidate.amount,
            timestamp: candidate.timestamp,
            tx_hash: candidate.tx_hash,
        }
    }
}

impl StreamEvent for EscrowDepositEvent {
    fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("address".to_string(), self.address.clone());
        fields.insert("amount".to_string(), self.amount.to_string());
        fields.insert("timestamp".to_string(), self.timestamp.to_string());
        fields.insert("tx_hash".to_string(), self.tx_hash.clone());
        fields
    }

    fn from_fields(fields: &FieldMap) -> Self {
        Self {
            address: field_str(fields, "address"),
            amount: field_u64(fields, "amount"),
            timestamp: field_u64(fields, "timestamp"),
            tx_hash: field_str(fields, "tx_hash"),
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A user-facing notification about a deal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub deal_id: i64,
    pub user_id: i64,
    /// e.g. "escrow_deposit_confirmed"
    pub kind: String,
}

impl StreamEvent for NotificationEvent {
    fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("deal_id".to_string(), self.deal_id.to_string());
        fields.insert("user_id".to_string(), self.user_id.to_string());
        fields.insert("kind".to_string(), self.kind.clone());
        fields
    }

    fn from_fields(fields: &FieldMap) -> Self {
        Self {
            deal_id: field_i64(fields, "deal_id"),
            user_id: field_i64(fields, "user_id"),
            kind: field_str(fields, "kind"),
        }
    }
}
