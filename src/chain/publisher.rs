//! Deposit Event Publisher
//!
//! Drains the deposit candidate queue into the escrow-deposit stream.

use std::sync::Arc;
use tokio::sync::mpsc;

use super::types::DepositCandidate;
use crate::common::{log_deposit_event, Metrics};
use crate::stream::{EntryId, EscrowDepositEvent, EventStream, StreamError};

pub struct DepositEventPublisher {
    stream: EventStream<EscrowDepositEvent>,
    metrics: Arc<Metrics>,
}

impl DepositEventPublisher {
    pub fn new(stream: EventStream<EscrowDepositEvent>, metrics: Arc<Metrics>) -> Self {
        Self { stream, metrics }
    }

    pub async fn publish(&self, candidate: DepositCandidate) -> Result<EntryId, StreamError> {
        let event = EscrowDepositEvent::from(candidate);
        let id = self.stream.push(&event).await?;
        self.metrics.inc_events_published();
        log_deposit_event("deposit_published", &event.address, event.amount, &event.tx_hash);
        Ok(id)
    }

    /// Publish until the queue closes; remaining candidates are drained first
    pub async fn run(self, mut deposits: mpsc::Receiver<DepositCandidate>) {
        while let Some(candidate) = deposits.recv().await {
            let tx_hash = candidate.tx_hash.clone();
            if let Err(e) = self.publish(candidate).await {
                tracing::error!(tx_hash = %tx_hash, error = %e, "Failed to publish deposit");
            }
        }
        tracing::info!("Deposit publisher stopped");
    }
}
