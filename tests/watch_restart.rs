//! Watch list continuity across a process restart on a file-backed database.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ad_escrow::chain::{AccountId, WatchListSync, WatchedAddressRegistry};
use ad_escrow::common::Metrics;
use ad_escrow::deal::{
    DealRepository, DealService, DealSigner, DealStatus, DealTerms, EscrowFees, NewDeal,
    SeededWalletFactory, SqliteDealStore,
};
use ad_escrow::kv::{KeyValueStore, SqliteKeyStore};
use ad_escrow::storage::Database;

const LESSOR: i64 = 1;
const LESSEE: i64 = 2;

/// Everything `run_daemon` rebuilds on startup
struct Process {
    store: Arc<SqliteDealStore>,
    kv: Arc<SqliteKeyStore>,
    registry: Arc<WatchedAddressRegistry>,
    watch_sync: Arc<WatchListSync>,
    service: DealService,
    metrics: Arc<Metrics>,
}

fn start(path: &Path, watch_ttl: Duration) -> Process {
    let db = Database::open(path).unwrap();
    let metrics = Arc::new(Metrics::new(&prometheus::Registry::new()).unwrap());
    let store = Arc::new(SqliteDealStore::new(db.clone()));
    let kv = Arc::new(SqliteKeyStore::new(db, 0));
    let registry = Arc::new(WatchedAddressRegistry::new());
    let watch_sync = Arc::new(WatchListSync::new(
        registry.clone(),
        kv.clone(),
        store.clone(),
        0,
        watch_ttl,
        metrics.clone(),
    ));
    let service = DealService::new(
        store.clone(),
        DealSigner::new("restart-secret").unwrap(),
        EscrowFees::default(),
        Arc::new(SeededWalletFactory::new("restart-seed")),
        watch_sync.clone(),
    );

    Process {
        store,
        kv,
        registry,
        watch_sync,
        service,
        metrics,
    }
}

fn wallet(byte: u8) -> String {
    AccountId::new(0, [byte; 32]).to_raw()
}

async fn escrow_awaiting_deposit(p: &Process) -> (i64, AccountId) {
    let deal = p
        .service
        .create_deal(NewDeal {
            lessor_id: LESSOR,
            lessee_id: LESSEE,
            channel_id: 9,
            terms: DealTerms {
                deal_type: "post".to_string(),
                duration_hours: 24,
                price_nano: 1_000_000_000,
                details: String::new(),
            },
        })
        .await
        .unwrap();
    p.service.link_wallet(LESSOR, &wallet(1)).await.unwrap();
    p.service.link_wallet(LESSEE, &wallet(2)).await.unwrap();
    p.service
        .set_payout_address(deal.id, LESSOR, &wallet(1))
        .await
        .unwrap();
    p.service
        .set_payout_address(deal.id, LESSEE, &wallet(2))
        .await
        .unwrap();
    p.service.sign_deal(deal.id, LESSOR).await.unwrap();
    p.service.sign_deal(deal.id, LESSEE).await.unwrap();
    assert!(p.service.create_escrow(deal.id).await.unwrap());

    let deal = p.store.get_deal(deal.id).await.unwrap().unwrap();
    assert_eq!(deal.status, DealStatus::WaitingEscrowDeposit);
    let escrow = deal.escrow_address.as_deref().unwrap().parse().unwrap();
    (deal.id, escrow)
}

#[tokio::test]
async fn bootstrap_restores_watch_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("escrow.db");

    let escrow = {
        let before = start(&path, Duration::from_secs(3600));
        let (_, escrow) = escrow_awaiting_deposit(&before).await;
        assert!(before.registry.is_watched(&escrow).await);
        escrow
    };

    let after = start(&path, Duration::from_secs(3600));
    assert!(!after.registry.is_watched(&escrow).await);
    assert_eq!(after.watch_sync.bootstrap().await.unwrap(), 1);
    assert!(after.registry.is_watched(&escrow).await);
}

#[tokio::test]
async fn window_lapsed_while_down_expires_deal_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("escrow.db");

    let (deal_id, escrow) = {
        let before = start(&path, Duration::from_millis(1));
        escrow_awaiting_deposit(&before).await
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let after = start(&path, Duration::from_secs(3600));
    let mut events = after.kv.subscribe();
    assert_eq!(after.watch_sync.bootstrap().await.unwrap(), 0);

    assert_eq!(after.kv.sweep_expired().await.unwrap(), vec![escrow.to_raw()]);
    while let Ok(event) = events.try_recv() {
        after.watch_sync.handle_event(&event).await;
    }

    let deal = after.store.get_deal(deal_id).await.unwrap().unwrap();
    assert_eq!(deal.status, DealStatus::Expired);
    assert_eq!(after.metrics.snapshot().deals_expired, 1);
}
