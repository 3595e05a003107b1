//! Watched Address Registry
//!
//! The set of escrow accounts currently under surveillance. Scan workers
//! read it concurrently; only the watch-list sync and escrow lifecycle write.

use std::collections::HashSet;
use tokio::sync::RwLock;

use super::types::AccountId;

/// Concurrent set of watched accounts
#[derive(Debug, Default)]
pub struct WatchedAddressRegistry {
    addresses: RwLock<HashSet<AccountId>>,
}

impl WatchedAddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_watched(&self, address: &AccountId) -> bool {
        self.addresses.read().await.contains(address)
    }

    /// Returns true if the address was not already watched
    pub async fn add(&self, address: AccountId) -> bool {
        self.addresses.write().await.insert(address)
    }

    /// Returns true if the address was watched
    pub async fn remove(&self, address: &AccountId) -> bool {
        self.addresses.write().await.remove(address)
    }

    pub async fn len(&self) -> usize {
        self.addresses.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.addresses.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_remove() {
        let registry = WatchedAddressRegistry::new();
        let addr = AccountId::new(0, [1u8; 32]);

        assert!(!registry.is_watched(&addr).await);
        assert!(registry.add(addr).await);
        assert!(!registry.add(addr).await);
        assert!(registry.is_watched(&addr).await);

        assert!(registry.remove(&addr).await);
        assert!(!registry.remove(&addr).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_readers_and_writer() {
        let registry = Arc::new(WatchedAddressRegistry::new());
        let mut handles = Vec::new();

        for i in 0..16u8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.add(AccountId::new(0, [i; 32])).await;
                registry.is_watched(&AccountId::new(0, [i; 32])).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(registry.len().await, 16);
    }
}
