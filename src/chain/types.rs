//! Chain Types
//!
//! Block and transaction shapes as the observer sees them, plus the
//! deposit candidate extracted from a transaction's incoming message.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ChainError;

/// Masterchain workchain id
pub const MASTERCHAIN: i32 = -1;

// ============================================================================
// Accounts
// ============================================================================

/// Raw account identifier: workchain plus 32-byte account hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId {
    pub workchain: i32,
    pub hash: [u8; 32],
}

impl AccountId {
    pub fn new(workchain: i32, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    /// Raw form `<workchain>:<64 hex>`
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}

impl FromStr for AccountId {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (wc, hash_hex) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ChainError::InvalidAddress(s.to_string()))?;

        let workchain: i32 = wc
            .parse()
            .map_err(|_| ChainError::InvalidAddress(s.to_string()))?;

        let bytes = hex::decode(hash_hex).map_err(|_| ChainError::InvalidAddress(s.to_string()))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::InvalidAddress(s.to_string()))?;

        Ok(Self { workchain, hash })
    }
}

// ============================================================================
// Blocks
// ============================================================================

/// Shard identity: (workchain, shard prefix)
pub type ShardKey = (i32, i64);

/// Full block identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
    pub root_hash: String,
    pub file_hash: String,
}

impl BlockId {
    pub fn shard_key(&self) -> ShardKey {
        (self.workchain, self.shard)
    }

    pub fn is_masterchain(&self) -> bool {
        self.workchain == MASTERCHAIN
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{:016x},{})", self.workchain, self.shard as u64, self.seqno)
    }
}

/// Block data needed for parent discovery
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub id: BlockId,
    /// One parent normally, two after a shard merge
    pub prev_blocks: Vec<BlockId>,
}

// ============================================================================
// Transactions
// ============================================================================

/// Short transaction id as listed in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionId {
    pub account: AccountId,
    pub lt: u64,
    /// Hex transaction hash
    pub hash: String,
}

/// Inbound message of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Empty for external inbound messages
    pub source: String,
    pub destination: String,
    pub value: u64,
}

impl InboundMessage {
    /// Internal messages carry a sender account; external ones do not
    pub fn is_internal(&self) -> bool {
        !self.source.is_empty()
    }
}

/// Full transaction
#[derive(Debug, Clone)]
pub struct Transaction {
    pub account: AccountId,
    pub lt: u64,
    /// Hex transaction hash
    pub hash: String,
    /// Unix seconds
    pub utime: u64,
    pub in_msg: Option<InboundMessage>,
}

/// A detected incoming transfer to a watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositCandidate {
    pub address: AccountId,
    /// Nanotons
    pub amount: u64,
    /// Unix seconds
    pub timestamp: u64,
    /// Hex transaction hash
    pub tx_hash: String,
}

/// Extract a deposit from a transaction.
///
/// Only internal incoming transfers count; anything else is not a deposit.
pub fn extract_deposit(tx: &Transaction) -> Option<DepositCandidate> {
    let msg = tx.in_msg.as_ref()?;
    if !msg.is_internal() {
        return None;
    }

    Some(DepositCandidate {
        address: tx.account,
        amount: msg.value,
        timestamp: tx.utime,
        tx_hash: tx.hash.clone(),
    })
}
