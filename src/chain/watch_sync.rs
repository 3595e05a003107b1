//! Watch-List Sync
//!
//! Keeps the [`WatchedAddressRegistry`] in step with the key-value store:
//! seeded from a key scan at startup, then maintained from keyspace
//! notifications. A lapsed key means the escrow deposit window closed, so
//! the deal lifecycle is told to expire the deal.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::registry::WatchedAddressRegistry;
use super::types::AccountId;
use crate::common::Metrics;
use crate::kv::{KeyValueStore, KeyspaceEvent, KeyspaceEventKind, KvError};
use crate::storage::StorageError;

/// The one call the observer makes into deal logic directly
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DealExpirer: Send + Sync {
    /// Expire the deal still waiting on this escrow address.
    ///
    /// Returns false when no deal was in a state to expire.
    async fn set_deal_status_expired_by_escrow_address(
        &self,
        address: &str,
    ) -> Result<bool, StorageError>;
}

/// Start or stop watching an escrow address
#[async_trait]
pub trait EscrowWatchList: Send + Sync {
    async fn watch(&self, address: &AccountId) -> Result<(), KvError>;

    async fn unwatch(&self, address: &AccountId) -> Result<(), KvError>;
}

/// Registry maintenance driven by keyspace notifications
pub struct WatchListSync {
    registry: Arc<WatchedAddressRegistry>,
    store: Arc<dyn KeyValueStore>,
    expirer: Arc<dyn DealExpirer>,
    db_index: u32,
    watch_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl WatchListSync {
    pub fn new(
        registry: Arc<WatchedAddressRegistry>,
        store: Arc<dyn KeyValueStore>,
        expirer: Arc<dyn DealExpirer>,
        db_index: u32,
        watch_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            store,
            expirer,
            db_index,
            watch_ttl,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<WatchedAddressRegistry> {
        &self.registry
    }

    /// Seed the registry from every live key. Returns the number seeded.
    pub async fn bootstrap(&self) -> Result<usize, KvError> {
        let keys = self.store.scan_keys().await?;
        let mut seeded = 0;

        for key in keys {
            match key.parse::<AccountId>() {
                Ok(address) => {
                    self.registry.add(address).await;
                    seeded += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Ignoring malformed watch key");
                }
            }
        }

        tracing::info!(seeded, "Watch registry bootstrapped");
        Ok(seeded)
    }

    /// Consume keyspace notifications until cancelled.
    ///
    /// Subscribe before calling [`Self::bootstrap`] so nothing set in between is missed.
    pub async fn run(
        self: Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<KeyspaceEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => received,
            };

            match event {
                Ok(event) => self.handle_event(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Keyspace notifications lagged, rescanning keys");
                    if let Err(e) = self.bootstrap().await {
                        tracing::error!(error = %e, "Watch registry rescan failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::info!("Watch-list sync stopped");
    }

    /// Apply one keyspace notification
    pub async fn handle_event(&self, event: &KeyspaceEvent) {
        let Some(kind) = event.kind(self.db_index) else {
            return;
        };

        let address: AccountId = match event.key.parse() {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!(key = %event.key, error = %e, "Ignoring malformed watch key");
                return;
            }
        };

        match kind {
            KeyspaceEventKind::Expire => {
                if self.registry.add(address).await {
                    tracing::debug!(address = %address, "Watching escrow address");
                }
            }
            KeyspaceEventKind::Expired => {
                self.registry.remove(&address).await;
                match self
                    .expirer
                    .set_deal_status_expired_by_escrow_address(&address.to_raw())
                    .await
                {
                    Ok(true) => {
                        self.metrics.inc_deals_expired();
                        tracing::info!(address = %address, "Escrow window lapsed, deal expired");
                    }
                    Ok(false) => {
                        tracing::debug!(address = %address, "Escrow key lapsed, no deal to expire");
                    }
                    Err(e) => {
                        tracing::error!(address = %address, error = %e, "Failed to expire deal");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EscrowWatchList for WatchListSync {
    async fn watch(&self, address: &AccountId) -> Result<(), KvError> {
        self.store.set_with_ttl(&address.to_raw(), self.watch_ttl).await?;
        self.registry.add(*address).await;
        Ok(())
    }

    async fn unwatch(&self, address: &AccountId) -> Result<(), KvError> {
        self.store.delete(&address.to_raw()).await?;
        self.registry.remove(address).await;
        Ok(())
    }
}
