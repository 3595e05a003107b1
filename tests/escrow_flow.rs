//! End-to-end escrow flow against an in-memory database and key store:
//! signing, escrow creation, deposit confirmation through the stream
//! consumer, TTL expiry and rejection.

use std::sync::Arc;
use std::time::Duration;

use ad_escrow::chain::{AccountId, WatchListSync, WatchedAddressRegistry};
use ad_escrow::common::{Metrics, StreamTimings};
use ad_escrow::deal::{
    Deal, DealError, DealRepository, DealService, DealSigner, DealStatus, DealTerms, DraftUpdate,
    EscrowDepositWorker, EscrowFees, NewDeal, SeededWalletFactory, SqliteDealStore,
};
use ad_escrow::kv::{KeyValueStore, MemoryKeyStore};
use ad_escrow::storage::Database;
use ad_escrow::stream::{
    EscrowDepositEvent, EventStream, NotificationEvent, SqliteStreamLog, StreamConsumer,
    StreamKind, StreamLog,
};

const LESSOR: i64 = 10;
const LESSEE: i64 = 20;

struct Harness {
    store: Arc<SqliteDealStore>,
    kv: Arc<MemoryKeyStore>,
    registry: Arc<WatchedAddressRegistry>,
    watch_sync: Arc<WatchListSync>,
    service: DealService,
    deposits: EventStream<EscrowDepositEvent>,
    consumer: StreamConsumer<EscrowDepositEvent>,
    metrics: Arc<Metrics>,
}

fn harness(watch_ttl: Duration) -> Harness {
    let db = Database::in_memory().unwrap();
    let metrics = Arc::new(Metrics::new(&prometheus::Registry::new()).unwrap());
    let store = Arc::new(SqliteDealStore::new(db.clone()));
    let kv = Arc::new(MemoryKeyStore::new(0));
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
        DealSigner::new("integration-secret").unwrap(),
        EscrowFees::default(),
        Arc::new(SeededWalletFactory::new("integration-seed")),
        watch_sync.clone(),
    );

    let log: Arc<dyn StreamLog> = Arc::new(SqliteStreamLog::new(db));
    let deposits = EventStream::new(log.clone(), StreamKind::EscrowDeposit);
    let notifications = EventStream::<NotificationEvent>::new(log, StreamKind::Notification);

    let worker = EscrowDepositWorker::new(
        store.clone(),
        watch_sync.clone(),
        notifications,
        metrics.clone(),
    );
    let consumer = StreamConsumer::new(
        deposits.clone(),
        Arc::new(worker),
        StreamKind::EscrowDeposit.group_name(),
        "it-consumer",
        StreamTimings::default(),
        metrics.clone(),
    );

    Harness {
        store,
        kv,
        registry,
        watch_sync,
        service,
        deposits,
        consumer,
        metrics,
    }
}

fn wallet(byte: u8) -> String {
    AccountId::new(0, [byte; 32]).to_raw()
}

fn one_ton_deal() -> NewDeal {
    NewDeal {
        lessor_id: LESSOR,
        lessee_id: LESSEE,
        channel_id: 555,
        terms: DealTerms {
            deal_type: "post".to_string(),
            duration_hours: 48,
            price_nano: 1_000_000_000,
            details: "top of channel".to_string(),
        },
    }
}

async fn draft_with_payouts(h: &Harness) -> Deal {
    let deal = h.service.create_deal(one_ton_deal()).await.unwrap();
    h.service.link_wallet(LESSOR, &wallet(1)).await.unwrap();
    h.service.link_wallet(LESSEE, &wallet(2)).await.unwrap();
    h.service
        .set_payout_address(deal.id, LESSOR, &wallet(1))
        .await
        .unwrap();
    h.service
        .set_payout_address(deal.id, LESSEE, &wallet(2))
        .await
        .unwrap()
}

/// Signed by both and escrow created
async fn awaiting_deposit(h: &Harness) -> (Deal, AccountId) {
    let deal = draft_with_payouts(h).await;
    h.service.sign_deal(deal.id, LESSOR).await.unwrap();
    let approved = h.service.sign_deal(deal.id, LESSEE).await.unwrap();
    assert_eq!(approved.status, DealStatus::Approved);

    assert!(h.service.create_escrow(deal.id).await.unwrap());
    let deal = h.service.get_deal(deal.id).await.unwrap();
    let escrow: AccountId = deal.escrow_address.as_deref().unwrap().parse().unwrap();
    (deal, escrow)
}

async fn deposit(h: &Harness, escrow: &AccountId, amount: u64) {
    h.deposits
        .push(&EscrowDepositEvent {
            address: escrow.to_raw(),
            amount,
            timestamp: 1_700_000_000,
            tx_hash: format!("{:064x}", amount),
        })
        .await
        .unwrap();
}

async fn status_of(h: &Harness, deal_id: i64) -> DealStatus {
    h.store.get_deal(deal_id).await.unwrap().unwrap().status
}

async fn ensure_group(h: &Harness) {
    h.deposits
        .ensure_group(&StreamKind::EscrowDeposit.group_name())
        .await
        .unwrap();
}

#[tokio::test]
async fn draft_edit_clears_signatures() {
    let h = harness(Duration::from_secs(60));
    let deal = draft_with_payouts(&h).await;

    let signed = h.service.sign_deal(deal.id, LESSOR).await.unwrap();
    assert!(signed.lessor_signature.is_some());

    let edited = h
        .service
        .update_draft(
            deal.id,
            LESSEE,
            DraftUpdate {
                price_nano: Some(2_000_000_000),
                ..DraftUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.escrow_amount_nano, 2_150_000_000);

    let reread = h.service.get_deal(deal.id).await.unwrap();
    assert_eq!(reread.status, DealStatus::Draft);
    assert!(reread.lessor_signature.is_none());
    assert!(reread.lessee_signature.is_none());

    // A signature over the old terms cannot complete approval
    let after_lessee = h.service.sign_deal(deal.id, LESSEE).await.unwrap();
    assert_eq!(after_lessee.status, DealStatus::Draft);
}

#[tokio::test]
async fn deposit_threshold_is_exact() {
    let h = harness(Duration::from_secs(60));
    ensure_group(&h).await;
    let (deal, escrow) = awaiting_deposit(&h).await;
    assert_eq!(deal.escrow_amount_nano, 1_100_000_000);
    assert!(h.registry.is_watched(&escrow).await);

    deposit(&h, &escrow, 1_099_999_999).await;
    assert_eq!(h.consumer.poll_once().await.unwrap(), 1);
    assert_eq!(status_of(&h, deal.id).await, DealStatus::WaitingEscrowDeposit);
    assert_eq!(h.kv.scan_keys().await.unwrap(), vec![escrow.to_raw()]);

    deposit(&h, &escrow, 1_100_000_000).await;
    assert_eq!(h.consumer.poll_once().await.unwrap(), 1);
    assert_eq!(status_of(&h, deal.id).await, DealStatus::EscrowDepositConfirmed);
    assert!(h.kv.scan_keys().await.unwrap().is_empty());
    assert!(!h.registry.is_watched(&escrow).await);
    assert_eq!(h.metrics.snapshot().escrow_confirmations, 1);
}

#[tokio::test]
async fn replayed_deposit_is_acked_without_change() {
    let h = harness(Duration::from_secs(60));
    ensure_group(&h).await;
    let (deal, escrow) = awaiting_deposit(&h).await;

    deposit(&h, &escrow, 1_100_000_000).await;
    deposit(&h, &escrow, 1_100_000_000).await;
    assert_eq!(h.consumer.poll_once().await.unwrap(), 2);

    assert_eq!(status_of(&h, deal.id).await, DealStatus::EscrowDepositConfirmed);
    assert_eq!(h.metrics.snapshot().escrow_confirmations, 1);
    assert_eq!(
        h.deposits
            .pending_count(&StreamKind::EscrowDeposit.group_name())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn lapsed_watch_key_expires_waiting_deal() {
    let h = harness(Duration::from_millis(1));
    let mut events = h.kv.subscribe();
    let (deal, escrow) = awaiting_deposit(&h).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.kv.sweep_expired().await, vec![escrow.to_raw()]);

    // Drain the expire notification from watch(), then handle the expired one
    while let Ok(event) = events.try_recv() {
        h.watch_sync.handle_event(&event).await;
    }

    assert_eq!(status_of(&h, deal.id).await, DealStatus::Expired);
    assert!(!h.registry.is_watched(&escrow).await);
    assert_eq!(h.metrics.snapshot().deals_expired, 1);
}

#[tokio::test]
async fn expiry_after_confirmation_is_ignored() {
    let h = harness(Duration::from_millis(50));
    ensure_group(&h).await;
    let mut events = h.kv.subscribe();
    let (deal, escrow) = awaiting_deposit(&h).await;

    deposit(&h, &escrow, 1_500_000_000).await;
    h.consumer.poll_once().await.unwrap();
    assert_eq!(status_of(&h, deal.id).await, DealStatus::EscrowDepositConfirmed);

    // The expiry notification still arrives late
    h.watch_sync
        .handle_event(&ad_escrow::kv::KeyspaceEvent {
            channel: ad_escrow::kv::expired_channel(0),
            key: escrow.to_raw(),
        })
        .await;
    while let Ok(event) = events.try_recv() {
        h.watch_sync.handle_event(&event).await;
    }

    assert_eq!(status_of(&h, deal.id).await, DealStatus::EscrowDepositConfirmed);
    assert_eq!(h.metrics.snapshot().deals_expired, 0);
}

#[tokio::test]
async fn reject_only_from_draft() {
    let h = harness(Duration::from_secs(60));

    let draft = h.service.create_deal(one_ton_deal()).await.unwrap();
    h.service.reject_deal(draft.id, LESSEE).await.unwrap();
    assert_eq!(status_of(&h, draft.id).await, DealStatus::Rejected);
    assert!(matches!(
        h.service.reject_deal(draft.id, LESSOR).await,
        Err(DealError::NotDraft(_))
    ));

    let approved = draft_with_payouts(&h).await;
    h.service.sign_deal(approved.id, LESSOR).await.unwrap();
    h.service.sign_deal(approved.id, LESSEE).await.unwrap();

    assert!(matches!(
        h.service.reject_deal(approved.id, LESSOR).await,
        Err(DealError::NotDraft(_))
    ));
    assert_eq!(status_of(&h, approved.id).await, DealStatus::Approved);
}
