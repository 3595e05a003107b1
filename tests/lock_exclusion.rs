//! Deal action locks on a file-backed database shared by concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use ad_escrow::common::Metrics;
use ad_escrow::deal::{
    ActionKind, ActionLockStore, ActionOutcome, ActionRunner, DealRepository, DealStatus,
    DealTerms, DryRunTransfers, EscrowReleaseAction, LockError, LockStatus, NewDeal, Party,
    SqliteDealStore,
};
use ad_escrow::storage::Database;

fn file_db(dir: &tempfile::TempDir) -> Database {
    Database::open(dir.path().join("locks.db")).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_take_lock_has_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let locks = ActionLockStore::new(file_db(&dir), Duration::from_secs(300));

    let first = tokio::spawn({
        let locks = locks.clone();
        async move { locks.take_lock(7, ActionKind::EscrowRelease).await }
    });
    let second = tokio::spawn({
        let locks = locks.clone();
        async move { locks.take_lock(7, ActionKind::EscrowRelease).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let winners: Vec<i64> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners.len(), 1);

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, LockError::AlreadyLocked { deal_id: 7, .. }));
    assert!(loser.to_string().contains("already locked"));

    locks
        .release_lock(winners[0], LockStatus::Completed)
        .await
        .unwrap();
    locks.take_lock(7, ActionKind::EscrowRelease).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runners_pay_out_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = file_db(&dir);
    let store = Arc::new(SqliteDealStore::new(db.clone()));

    let deal = store
        .insert_deal(
            &NewDeal {
                lessor_id: 1,
                lessee_id: 2,
                channel_id: 3,
                terms: DealTerms {
                    deal_type: "post".to_string(),
                    duration_hours: 1,
                    price_nano: 500,
                    details: String::new(),
                },
            },
            600,
        )
        .await
        .unwrap();
    store
        .set_payout_address(deal.id, Party::Lessor, "0:aa")
        .await
        .unwrap();
    store
        .set_payout_address(deal.id, Party::Lessee, "0:bb")
        .await
        .unwrap();
    store
        .update_status(deal.id, DealStatus::Draft, DealStatus::Approved)
        .await
        .unwrap();
    store.assign_escrow(deal.id, "0:ee").await.unwrap();
    for (from, to) in [
        (DealStatus::WaitingEscrowDeposit, DealStatus::EscrowDepositConfirmed),
        (DealStatus::EscrowDepositConfirmed, DealStatus::InProgress),
        (DealStatus::InProgress, DealStatus::WaitingEscrowRelease),
    ] {
        assert!(store.update_status(deal.id, from, to).await.unwrap());
    }
    let deal = store.get_deal(deal.id).await.unwrap().unwrap();

    let transfers = Arc::new(DryRunTransfers::new());
    let action = Arc::new(EscrowReleaseAction::new(transfers.clone()));
    let metrics = Arc::new(Metrics::new(&prometheus::Registry::new()).unwrap());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let runner = ActionRunner::new(
            store.clone(),
            ActionLockStore::new(db.clone(), Duration::from_secs(300)),
            metrics.clone(),
        );
        let action = action.clone();
        let deal = deal.clone();
        handles.push(tokio::spawn(async move {
            runner.run_action(action.as_ref(), &deal).await
        }));
    }

    let mut executed = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == ActionOutcome::Executed {
            executed += 1;
        }
    }

    assert_eq!(executed, 1);
    assert_eq!(transfers.sent().len(), 1);
    assert_eq!(
        store.get_deal(deal.id).await.unwrap().unwrap().status,
        DealStatus::EscrowReleaseConfirmed
    );
}
