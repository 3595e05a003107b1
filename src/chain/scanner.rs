//! Deposit Scan Worker Pool
//!
//! A fixed pool of workers shares one receiver of shard blocks. Each worker
//! lists a block's transactions in logical-time order, fetches those that
//! touch a watched account and extracts deposits.
//!
//! Matches go to a bounded queue with `try_send`: when the queue is full the
//! deposit is dropped and counted rather than stalling the scan.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use super::client::{fetch_with_retry, ChainError, TransactionSource};
use super::registry::WatchedAddressRegistry;
use super::types::{extract_deposit, BlockId, DepositCandidate};
use crate::common::Metrics;

pub struct DepositScanPool<S: ?Sized> {
    source: Arc<S>,
    registry: Arc<WatchedAddressRegistry>,
    workers: usize,
    fetch_attempts: u32,
    retry_delay: Duration,
    metrics: Arc<Metrics>,
}

impl<S> DepositScanPool<S>
where
    S: TransactionSource + ?Sized + 'static,
{
    pub fn new(
        source: Arc<S>,
        registry: Arc<WatchedAddressRegistry>,
        workers: usize,
        fetch_attempts: u32,
        retry_delay: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            registry,
            workers: workers.max(1),
            fetch_attempts,
            retry_delay,
            metrics,
        }
    }

    /// Deposits to watched accounts in one block, in logical-time order.
    ///
    /// Fails only when the block's transaction list cannot be fetched.
    pub async fn scan_block(&self, block: &BlockId) -> Result<Vec<DepositCandidate>, ChainError> {
        let source = self.source.clone();
        let mut ids = fetch_with_retry("transaction ids", self.fetch_attempts, self.retry_delay, || {
            source.get_transaction_ids(block)
        })
        .await?;
        ids.sort_by_key(|id| id.lt);
        self.metrics.add_transactions_scanned(ids.len() as u64);

        let mut deposits = Vec::new();
        for id in ids {
            if !self.registry.is_watched(&id.account).await {
                continue;
            }

            // One unfetchable transaction must not cost the rest of the block
            let tx = match fetch_with_retry("transaction", self.fetch_attempts, self.retry_delay, || {
                source.get_transaction(block, &id.account, id.lt, &id.hash)
            })
            .await
            {
                Ok(tx) => tx,
                Err(e) => {
                    self.metrics.inc_transaction_fetch_failures();
                    tracing::error!(
                        block = %block,
                        account = %id.account,
                        lt = id.lt,
                        hash = %id.hash,
                        error = %e,
                        "Skipping transaction after fetch retries"
                    );
                    continue;
                }
            };

            match extract_deposit(&tx) {
                Some(deposit) => deposits.push(deposit),
                None => {
                    tracing::debug!(account = %id.account, lt = id.lt, "Transaction is not a deposit");
                }
            }
        }

        Ok(deposits)
    }

    /// Run the pool until `blocks` closes.
    ///
    /// Every worker holds a clone of `deposits`; the queue closes once all
    /// workers have exited.
    pub async fn run(
        self,
        blocks: mpsc::UnboundedReceiver<BlockId>,
        deposits: mpsc::Sender<DepositCandidate>,
    ) {
        let pool = Arc::new(self);
        let blocks = Arc::new(Mutex::new(blocks));
        let mut handles = Vec::with_capacity(pool.workers);

        for worker_id in 0..pool.workers {
            let pool = pool.clone();
            let blocks = blocks.clone();
            let deposits = deposits.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id, blocks, deposits).await;
            }));
        }
        drop(deposits);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scan worker panicked");
            }
        }
        tracing::info!("Deposit scan pool stopped");
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        blocks: Arc<Mutex<mpsc::UnboundedReceiver<BlockId>>>,
        deposits: mpsc::Sender<DepositCandidate>,
    ) {
        loop {
            let block = {
                let mut rx = blocks.lock().await;
                match rx.recv().await {
                    Some(block) => block,
                    None => break,
                }
            };

            let found = match self.scan_block(&block).await {
                Ok(found) => found,
                Err(e) => {
                    self.metrics.inc_shard_fetch_failures();
                    tracing::warn!(worker_id, block = %block, error = %e, "Block scan failed");
                    continue;
                }
            };

            for deposit in found {
                self.metrics.inc_deposits_matched();
                match deposits.try_send(deposit) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        self.metrics.inc_deposits_dropped();
                        tracing::warn!(
                            address = %dropped.address,
                            amount = dropped.amount,
                            tx_hash = %dropped.tx_hash,
                            "Deposit queue full, dropping candidate"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::warn!(worker_id, "Deposit queue closed, stopping worker");
                        return;
                    }
                }
            }
        }
        tracing::debug!(worker_id, "Scan worker stopped");
    }
}
