//! Masterchain Poller
//!
//! Fetches the masterchain top on a short fixed interval and hands every
//! newer block to the shard resolver. The poller is the only producer on
//! its output channel: it closes the channel on cancellation, which shuts
//! down the rest of the pipeline.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::client::{ChainError, MasterchainSource};
use super::types::BlockId;
use crate::common::Metrics;

pub struct MasterchainPoller<S: ?Sized> {
    source: Arc<S>,
    interval: Duration,
    timeout: Duration,
    last_seqno: Option<u32>,
    metrics: Arc<Metrics>,
}

impl<S> MasterchainPoller<S>
where
    S: MasterchainSource + ?Sized,
{
    pub fn new(source: Arc<S>, interval: Duration, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            source,
            interval,
            timeout,
            last_seqno: None,
            metrics,
        }
    }

    /// One poll. Returns the block if it is newer than the last one seen.
    pub async fn poll_once(&mut self) -> Result<Option<BlockId>, ChainError> {
        let block = self.source.get_masterchain_top(self.timeout).await?;
        if self.last_seqno.map_or(true, |last| block.seqno > last) {
            self.last_seqno = Some(block.seqno);
            self.metrics.inc_master_blocks();
            return Ok(Some(block));
        }
        Ok(None)
    }

    /// Poll until cancelled; dropping `output` on exit closes the channel
    pub async fn run(mut self, output: mpsc::Sender<BlockId>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let block = match self.poll_once().await {
                Ok(Some(block)) => block,
                Ok(None) => continue,
                // Expected under load
                Err(ChainError::Timeout) => {
                    tracing::debug!("Masterchain fetch timed out");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Masterchain fetch failed");
                    continue;
                }
            };

            tracing::debug!(seqno = block.seqno, "New masterchain block");
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = output.send(block) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(last_seqno = ?self.last_seqno, "Masterchain poller stopped");
    }
}
