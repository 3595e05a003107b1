//! Ad Escrow Daemon
//!
//! Run modes:
//!   ad-escrow run     - Start the chain observer, stream consumers and deal workers
//!   ad-escrow help    - Show usage
//!
//! Configuration comes from `ESCROW_*` environment variables, optionally
//! loaded from a `.env` file.

use async_trait::async_trait;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ad_escrow::chain::{
    ChainObserver, HttpChainClient, MasterchainSource, WatchListSync, WatchedAddressRegistry,
};
use ad_escrow::common::{init_from_config, AppConfig, EscrowError, Metrics};
use ad_escrow::deal::{
    ActionLockStore, ActionRunner, ActionWorker, ChannelPostAction, DealService, DealSigner,
    DryRunPublisher, DryRunTransfers, EscrowCreationWorker, EscrowDepositWorker,
    EscrowRefundAction, EscrowReleaseAction, GuardedAction, SeededWalletFactory, SqliteDealStore,
};
use ad_escrow::kv::{KeyValueStore, SqliteKeyStore};
use ad_escrow::storage::Database;
use ad_escrow::stream::{
    EntryId, EventStream, NotificationEvent, SqliteStreamLog, StreamConsumer, StreamHandler,
    StreamKind, StreamLog,
};

const KV_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("run") => {
            if let Err(e) = run_daemon().await {
                tracing::error!(code = e.error_code(), error = %e, "Daemon failed");
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        _ => print_usage(),
    }
}

fn print_usage() {
    println!("Ad Escrow Daemon");
    println!();
    println!("Usage:");
    println!("  ad-escrow run     Start observer, stream consumers and deal workers");
    println!("  ad-escrow help    Show this message");
    println!();
    println!("Environment Variables:");
    println!("  ESCROW_NETWORK            mainnet | testnet (default: testnet)");
    println!("  ESCROW_CHAIN_API_URL      Chain index API endpoint");
    println!("  ESCROW_CHAIN_API_KEY      Optional API key");
    println!("  ESCROW_DATABASE_PATH      SQLite file (default: data/escrow.db)");
    println!("  ESCROW_SIGNATURE_SECRET   Deal signature key (required on mainnet)");
    println!("  ESCROW_WALLET_SEED        Escrow address seed (required on mainnet)");
    println!("  ESCROW_WATCH_TTL_SECS     Escrow deposit window (default: 86400)");
    println!("  ESCROW_DRY_RUN_ACTIONS    Run payouts and posts as dry-run (testnet only)");
    println!("  ESCROW_LOG_LEVEL          debug, info, warn, error (default: info)");
}

/// Logs notifications until a delivery channel exists
struct NotificationLogger;

#[async_trait]
impl StreamHandler<NotificationEvent> for NotificationLogger {
    async fn handle(&self, id: EntryId, event: NotificationEvent) -> Result<(), EscrowError> {
        tracing::info!(
            entry_id = %id,
            deal_id = event.deal_id,
            user_id = event.user_id,
            kind = %event.kind,
            "Notification"
        );
        Ok(())
    }
}

async fn run_daemon() -> Result<(), EscrowError> {
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_from_config(&config)?;
    config.log_summary();

    let metrics_registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::new(&metrics_registry)?);
    let db = Database::open(&config.database_path)?;
    let cancel = CancellationToken::new();
    let consumer_name = format!("escrow-{:08x}", rand::random::<u32>());

    // Watch list: subscribe before the bootstrap scan so nothing is missed
    let kv = Arc::new(SqliteKeyStore::new(db.clone(), config.kv_db_index));
    let deals = Arc::new(SqliteDealStore::new(db.clone()));
    let registry = Arc::new(WatchedAddressRegistry::new());
    let watch_sync = Arc::new(WatchListSync::new(
        registry.clone(),
        kv.clone(),
        deals.clone(),
        config.kv_db_index,
        config.watch_ttl,
        metrics.clone(),
    ));
    let keyspace_events = kv.subscribe();
    watch_sync.bootstrap().await?;

    // Chain node must be reachable at startup
    let chain = Arc::new(HttpChainClient::new(
        &config.chain_api_url,
        config.chain_api_key.clone(),
        config.observer.chain_timeout,
    )?);
    let top = chain
        .get_masterchain_top(config.observer.chain_timeout)
        .await?;
    tracing::info!(seqno = top.seqno, api = %chain.base_url(), "Chain node reachable");

    // Consumer groups for every stream
    let log: Arc<dyn StreamLog> = Arc::new(SqliteStreamLog::new(db.clone()));
    for kind in StreamKind::ALL {
        log.create_group(&kind.stream_key(), &kind.group_name()).await?;
    }

    let notifications = EventStream::<NotificationEvent>::new(log.clone(), StreamKind::Notification);
    let service = Arc::new(DealService::new(
        deals.clone(),
        DealSigner::new(&config.signature_secret)?,
        config.fees,
        Arc::new(SeededWalletFactory::new(&config.wallet_seed)),
        watch_sync.clone(),
    ));

    // Only dry-run collaborators exist, and config refuses them on mainnet
    let action_worker = if config.dry_run_actions {
        tracing::warn!("Guarded actions run in dry-run mode; no funds move and nothing is posted");
        let transfers = Arc::new(DryRunTransfers::new());
        let actions: Vec<Arc<dyn GuardedAction>> = vec![
            Arc::new(ChannelPostAction::new(
                Arc::new(DryRunPublisher::new()),
                deals.clone(),
            )),
            Arc::new(EscrowReleaseAction::new(transfers.clone())),
            Arc::new(EscrowRefundAction::new(transfers)),
        ];
        Some(ActionWorker::new(
            deals.clone(),
            ActionRunner::new(
                deals.clone(),
                ActionLockStore::new(db.clone(), config.lock_ttl),
                metrics.clone(),
            ),
            actions,
            config.action_interval,
        ))
    } else {
        tracing::warn!("No transfer or publisher configured; action worker not started");
        None
    };

    let deposit_consumer = StreamConsumer::new(
        EventStream::new(log.clone(), StreamKind::EscrowDeposit),
        Arc::new(EscrowDepositWorker::new(
            deals.clone(),
            watch_sync.clone(),
            notifications.clone(),
            metrics.clone(),
        )),
        StreamKind::EscrowDeposit.group_name(),
        consumer_name.clone(),
        config.streams.clone(),
        metrics.clone(),
    );
    let notification_consumer = StreamConsumer::new(
        notifications,
        Arc::new(NotificationLogger),
        StreamKind::Notification.group_name(),
        consumer_name.clone(),
        config.streams.clone(),
        metrics.clone(),
    );

    let observer = ChainObserver::new(
        chain,
        registry,
        EventStream::new(log.clone(), StreamKind::EscrowDeposit),
        config.observer.clone(),
        metrics.clone(),
    );

    let mut handles: Vec<JoinHandle<()>> = vec![
        tokio::spawn(kv.clone().run_expiry_sweeper(KV_SWEEP_INTERVAL, cancel.clone())),
        tokio::spawn(watch_sync.run(keyspace_events, cancel.clone())),
        tokio::spawn(observer.run(cancel.clone())),
        tokio::spawn(deposit_consumer.run(cancel.clone())),
        tokio::spawn(notification_consumer.run(cancel.clone())),
        tokio::spawn(
            EscrowCreationWorker::new(deals, service, config.escrow_creation_interval)
                .run(cancel.clone()),
        ),
    ];
    if let Some(worker) = action_worker {
        handles.push(tokio::spawn(worker.run(cancel.clone())));
    }

    tracing::info!(consumer = %consumer_name, tasks = handles.len(), "Escrow daemon started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    cancel.cancel();

    for result in futures_util::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Task panicked");
        }
    }

    tracing::info!(metrics = ?metrics.snapshot(), "Escrow daemon stopped");
    Ok(())
}
