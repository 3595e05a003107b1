//! Dry-Run Collaborators
//!
//! Stand-ins for the wallet signer and the channel bot. They log what would
//! happen and remember it, so reconciliation checks see their own effects.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use super::actions::{ActionError, ChannelPublisher, EscrowTransfers};
use super::types::Deal;

/// A transfer that was "sent"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub escrow_address: String,
    pub destination: String,
    pub amount_nano: u64,
    pub memo: String,
    pub tx_hash: String,
}

#[derive(Default)]
pub struct DryRunTransfers {
    sent: Mutex<Vec<TransferRecord>>,
}

impl DryRunTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<TransferRecord> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EscrowTransfers for DryRunTransfers {
    async fn transfer(
        &self,
        escrow_address: &str,
        destination: &str,
        amount_nano: u64,
        memo: &str,
    ) -> Result<String, ActionError> {
        let mut hasher = Sha256::new();
        hasher.update(escrow_address.as_bytes());
        hasher.update(memo.as_bytes());
        let tx_hash = hex::encode(hasher.finalize());

        tracing::info!(
            escrow_address,
            destination,
            amount_nano,
            memo,
            "Dry run: escrow transfer"
        );

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ActionError::Transfer("transfer log poisoned".to_string()))?;
        sent.push(TransferRecord {
            escrow_address: escrow_address.to_string(),
            destination: destination.to_string(),
            amount_nano,
            memo: memo.to_string(),
            tx_hash: tx_hash.clone(),
        });
        Ok(tx_hash)
    }

    async fn find_transfer(
        &self,
        escrow_address: &str,
        memo: &str,
    ) -> Result<Option<String>, ActionError> {
        let sent = self
            .sent
            .lock()
            .map_err(|_| ActionError::Transfer("transfer log poisoned".to_string()))?;
        Ok(sent
            .iter()
            .find(|t| t.escrow_address == escrow_address && t.memo == memo)
            .map(|t| t.tx_hash.clone()))
    }
}

pub struct DryRunPublisher {
    next_message_id: AtomicI64,
    posts: Mutex<Vec<(i64, i64, i64)>>,
}

impl Default for DryRunPublisher {
    fn default() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            posts: Mutex::new(Vec::new()),
        }
    }
}

impl DryRunPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// (channel id, deal id, message id) per post
    pub fn posts(&self) -> Vec<(i64, i64, i64)> {
        self.posts.lock().map(|posts| posts.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChannelPublisher for DryRunPublisher {
    async fn publish(&self, deal: &Deal) -> Result<i64, ActionError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            deal_id = deal.id,
            channel_id = deal.channel_id,
            message_id,
            "Dry run: channel post"
        );

        self.posts
            .lock()
            .map_err(|_| ActionError::Publish("post log poisoned".to_string()))?
            .push((deal.channel_id, deal.id, message_id));
        Ok(message_id)
    }

    async fn find_post(&self, channel_id: i64, deal_id: i64) -> Result<Option<i64>, ActionError> {
        let posts = self
            .posts
            .lock()
            .map_err(|_| ActionError::Publish("post log poisoned".to_string()))?;
        Ok(posts
            .iter()
            .find(|(channel, deal, _)| *channel == channel_id && *deal == deal_id)
            .map(|(_, _, message_id)| *message_id))
    }
}
