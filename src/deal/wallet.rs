//! Escrow Wallets
//!
//! One fresh escrow account per deal. Key custody lives outside this
//! process; the factory only decides the address funds are sent to.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::types::DealError;
use crate::chain::AccountId;

/// Escrow wallet factory
#[async_trait]
pub trait EscrowWalletFactory: Send + Sync {
    async fn create_wallet(&self, deal_id: i64) -> Result<AccountId, DealError>;
}

/// Derives escrow accounts as SHA-256(seed || deal id) on the basechain
pub struct SeededWalletFactory {
    seed: Vec<u8>,
    workchain: i32,
}

impl SeededWalletFactory {
    pub fn new(seed: impl AsRef<[u8]>) -> Self {
        Self {
            seed: seed.as_ref().to_vec(),
            workchain: 0,
        }
    }

    pub fn derive(&self, deal_id: i64) -> AccountId {
        let mut hasher = Sha256::new();
        hasher.update(&self.seed);
        hasher.update(deal_id.to_be_bytes());
        AccountId::new(self.workchain, hasher.finalize().into())
    }
}

#[async_trait]
impl EscrowWalletFactory for SeededWalletFactory {
    async fn create_wallet(&self, deal_id: i64) -> Result<AccountId, DealError> {
        Ok(self.derive(deal_id))
    }
}
