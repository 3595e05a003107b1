//! Escrow Creation Worker
//!
//! Periodically creates escrow for approved deals that have none yet.
//! Creation is a conditional update, so overlapping runs are harmless.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::service::DealService;
use super::store::DealRepository;
use super::types::DealError;

const BATCH_SIZE: usize = 100;

pub struct EscrowCreationWorker {
    deals: Arc<dyn DealRepository>,
    service: Arc<DealService>,
    interval: Duration,
}

impl EscrowCreationWorker {
    pub fn new(
        deals: Arc<dyn DealRepository>,
        service: Arc<DealService>,
        interval: Duration,
    ) -> Self {
        Self {
            deals,
            service,
            interval,
        }
    }

    /// One pass over approved deals. Returns the number of escrows created.
    pub async fn run_once(&self) -> Result<usize, DealError> {
        let pending = self.deals.list_approved_without_escrow(BATCH_SIZE).await?;
        let mut created = 0;

        for deal in pending {
            match self.service.create_escrow(deal.id).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(deal_id = deal.id, error = %e, "Escrow creation failed");
                }
            }
        }
        Ok(created)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(0) => {}
                Ok(created) => tracing::info!(created, "Escrow creation pass"),
                Err(e) => tracing::warn!(error = %e, "Listing approved deals failed"),
            }
        }
        tracing::info!("Escrow creation worker stopped");
    }
}
