//! Chain Observer
//!
//! Wires the detection pipeline:
//!
//! ```text
//! poller --(cap 1)--> resolver --(unbounded)--> scan pool --(bounded)--> publisher --> stream
//! ```
//!
//! Only the poller watches the cancellation token. Each stage closes its
//! output when its input closes, so shutdown cascades down the pipeline.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::ChainClient;
use super::poller::MasterchainPoller;
use super::publisher::DepositEventPublisher;
use super::registry::WatchedAddressRegistry;
use super::resolver::ShardTreeResolver;
use super::scanner::DepositScanPool;
use crate::common::{Metrics, ObserverConfig};
use crate::stream::{EscrowDepositEvent, EventStream};

pub struct ChainObserver<C: ?Sized> {
    client: Arc<C>,
    registry: Arc<WatchedAddressRegistry>,
    stream: EventStream<EscrowDepositEvent>,
    config: ObserverConfig,
    metrics: Arc<Metrics>,
}

impl<C> ChainObserver<C>
where
    C: ChainClient + ?Sized + 'static,
{
    pub fn new(
        client: Arc<C>,
        registry: Arc<WatchedAddressRegistry>,
        stream: EventStream<EscrowDepositEvent>,
        config: ObserverConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            registry,
            stream,
            config,
            metrics,
        }
    }

    /// Run every stage until cancelled and the pipeline has drained
    pub async fn run(self, cancel: CancellationToken) {
        let (master_tx, master_rx) = mpsc::channel(1);
        let (shard_tx, shard_rx) = mpsc::unbounded_channel();
        let (deposit_tx, deposit_rx) = mpsc::channel(self.config.deposit_queue_capacity);

        let poller = MasterchainPoller::new(
            self.client.clone(),
            self.config.master_poll_interval,
            self.config.chain_timeout,
            self.metrics.clone(),
        );
        let resolver = ShardTreeResolver::new(
            self.client.clone(),
            self.config.fetch_attempts,
            self.config.fetch_retry_delay,
            self.metrics.clone(),
        );
        let pool = DepositScanPool::new(
            self.client.clone(),
            self.registry.clone(),
            self.config.scan_workers,
            self.config.fetch_attempts,
            self.config.fetch_retry_delay,
            self.metrics.clone(),
        );
        let publisher = DepositEventPublisher::new(self.stream.clone(), self.metrics.clone());

        tracing::info!(
            scan_workers = self.config.scan_workers,
            deposit_queue = self.config.deposit_queue_capacity,
            "Chain observer started"
        );

        let handles = [
            ("poller", tokio::spawn(poller.run(master_tx, cancel))),
            ("resolver", tokio::spawn(resolver.run(master_rx, shard_tx))),
            ("scan pool", tokio::spawn(pool.run(shard_rx, deposit_tx))),
            ("publisher", tokio::spawn(publisher.run(deposit_rx))),
        ];

        for (stage, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(stage, error = %e, "Observer stage panicked");
            }
        }
        tracing::info!("Chain observer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::{ChainError, MasterchainSource, ShardSource, TransactionSource};
    use crate::chain::types::{AccountId, BlockHeader, BlockId, InboundMessage, Transaction, TransactionId};
    use crate::storage::Database;
    use crate::stream::{SqliteStreamLog, StreamKind, StreamLog};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Masterchain advances every call; shard 0 advances with it and
    /// carries one deposit to the watched account in block 2.
    struct FakeChain {
        master_seqno: AtomicU32,
        watched: AccountId,
    }

    fn shard_block(seqno: u32) -> BlockId {
        BlockId {
            workchain: 0,
            shard: i64::MIN,
            seqno,
            root_hash: String::new(),
            file_hash: String::new(),
        }
    }

    #[async_trait]
    impl MasterchainSource for FakeChain {
        async fn get_masterchain_top(&self, _timeout: Duration) -> Result<BlockId, ChainError> {
            let seqno = (self.master_seqno.fetch_add(1, Ordering::SeqCst) + 1).min(5);
            Ok(BlockId {
                workchain: -1,
                shard: i64::MIN,
                seqno,
                root_hash: String::new(),
                file_hash: String::new(),
            })
        }
    }

    #[async_trait]
    impl ShardSource for FakeChain {
        async fn get_shard_tops(&self, master: &BlockId) -> Result<Vec<BlockId>, ChainError> {
            Ok(vec![shard_block(master.seqno)])
        }

        async fn get_block_data(&self, block: &BlockId) -> Result<BlockHeader, ChainError> {
            Ok(BlockHeader {
                id: block.clone(),
                prev_blocks: vec![shard_block(block.seqno - 1)],
            })
        }
    }

    #[async_trait]
    impl TransactionSource for FakeChain {
        async fn get_transaction_ids(&self, block: &BlockId) -> Result<Vec<TransactionId>, ChainError> {
            if block.seqno != 2 {
                return Ok(Vec::new());
            }
            Ok(vec![TransactionId {
                account: self.watched,
                lt: 10,
                hash: "aa".repeat(32),
            }])
        }

        async fn get_transaction(
            &self,
            _block: &BlockId,
            account: &AccountId,
            lt: u64,
            hash: &str,
        ) -> Result<Transaction, ChainError> {
            Ok(Transaction {
                account: *account,
                lt,
                hash: hash.to_string(),
                utime: 1_700_000_000,
                in_msg: Some(InboundMessage {
                    source: format!("0:{}", "01".repeat(32)),
                    destination: account.to_raw(),
                    value: 1_100_000_000,
                }),
            })
        }
    }

    #[tokio::test]
    async fn test_pipeline_publishes_and_shuts_down() {
        let watched = AccountId::new(0, [0x42; 32]);
        let chain = Arc::new(FakeChain {
            master_seqno: AtomicU32::new(0),
            watched,
        });
        let registry = Arc::new(WatchedAddressRegistry::new());
        registry.add(watched).await;

        let log: Arc<dyn StreamLog> = Arc::new(SqliteStreamLog::new(Database::in_memory().unwrap()));
        let stream = EventStream::<EscrowDepositEvent>::new(log, StreamKind::EscrowDeposit);
        stream.ensure_group("g").await.unwrap();

        let config = ObserverConfig {
            scan_workers: 2,
            master_poll_interval: Duration::from_millis(2),
            fetch_retry_delay: Duration::from_millis(1),
            ..ObserverConfig::default()
        };
        let metrics = Arc::new(Metrics::new(&prometheus::Registry::new()).unwrap());
        let observer = ChainObserver::new(chain, registry, stream.clone(), config, metrics.clone());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(observer.run(cancel.clone()));

        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(stream.read("g", "c", 10, Duration::ZERO).await.unwrap());
            if !events.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("observer did not shut down")
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.address, watched.to_raw());
        assert_eq!(events[0].1.amount, 1_100_000_000);
        assert_eq!(events[0].1.tx_hash, "aa".repeat(32));
        assert!(metrics.snapshot().master_blocks_seen >= 2);
    }
}
