//! Escrow Deposit Worker
//!
//! Consumes the escrow deposit stream. A sufficient deposit confirms the
//! deal waiting on that address and stops watching it. Unrelated, short or
//! replayed deposits are acked without change; only transient failures are
//! left pending for redelivery.

use async_trait::async_trait;
use std::sync::Arc;

use super::store::EscrowDepositDeals;
use super::types::{Deal, DealStatus};
use crate::chain::{AccountId, EscrowWatchList};
use crate::common::{log_deal_transition, EscrowError, Metrics};
use crate::stream::{EntryId, EscrowDepositEvent, EventStream, NotificationEvent, StreamHandler};

/// Notification kind pushed to both parties on confirmation
pub const ESCROW_CONFIRMED_NOTIFICATION: &str = "escrow_deposit_confirmed";

pub struct EscrowDepositWorker {
    deals: Arc<dyn EscrowDepositDeals>,
    watch_list: Arc<dyn EscrowWatchList>,
    notifications: EventStream<NotificationEvent>,
    metrics: Arc<Metrics>,
}

impl EscrowDepositWorker {
    pub fn new(
        deals: Arc<dyn EscrowDepositDeals>,
        watch_list: Arc<dyn EscrowWatchList>,
        notifications: EventStream<NotificationEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            deals,
            watch_list,
            notifications,
            metrics,
        }
    }

    async fn after_confirmation(&self, deal: &Deal, event: &EscrowDepositEvent) {
        match event.address.parse::<AccountId>() {
            Ok(address) => {
                if let Err(e) = self.watch_list.unwatch(&address).await {
                    tracing::warn!(deal_id = deal.id, error = %e, "Failed to unwatch escrow address");
                }
            }
            Err(e) => {
                tracing::warn!(address = %event.address, error = %e, "Escrow address is not a raw account id");
            }
        }

        for user_id in [deal.lessor_id, deal.lessee_id] {
            let notification = NotificationEvent {
                deal_id: deal.id,
                user_id,
                kind: ESCROW_CONFIRMED_NOTIFICATION.to_string(),
            };
            if let Err(e) = self.notifications.push(&notification).await {
                tracing::warn!(deal_id = deal.id, user_id, error = %e, "Failed to queue notification");
            }
        }
    }
}

#[async_trait]
impl StreamHandler<EscrowDepositEvent> for EscrowDepositWorker {
    async fn handle(&self, id: EntryId, event: EscrowDepositEvent) -> Result<(), EscrowError> {
        let deal = match self.deals.find_awaiting_deposit(&event.address).await {
            Ok(Some(deal)) => deal,
            Ok(None) => {
                tracing::debug!(entry_id = %id, address = %event.address, "No deal awaiting this deposit");
                return Ok(());
            }
            Err(e) if e.is_transient() => return Err(e.into()),
            Err(e) => {
                tracing::error!(entry_id = %id, error = %e, "Deposit lookup failed, dropping entry");
                return Ok(());
            }
        };

        if event.amount < deal.escrow_amount_nano {
            tracing::info!(
                deal_id = deal.id,
                amount_nano = event.amount,
                required_nano = deal.escrow_amount_nano,
                tx_hash = %event.tx_hash,
                "Escrow deposit below required amount"
            );
            return Ok(());
        }

        let confirmed = match self.deals.confirm_escrow_deposit(deal.id).await {
            Ok(confirmed) => confirmed,
            Err(e) if e.is_transient() => return Err(e.into()),
            Err(e) => {
                tracing::error!(deal_id = deal.id, error = %e, "Escrow confirmation failed, dropping entry");
                return Ok(());
            }
        };
        log_deal_transition(
            deal.id,
            DealStatus::WaitingEscrowDeposit.as_str(),
            DealStatus::EscrowDepositConfirmed.as_str(),
            confirmed,
        );

        if confirmed {
            self.metrics.inc_escrow_confirmations();
            self.after_confirmation(&deal, &event).await;
            tracing::info!(
                deal_id = deal.id,
                amount_nano = event.amount,
                tx_hash = %event.tx_hash,
                "Escrow deposit confirmed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::store::DealRepository;
    use crate::deal::sqlite::SqliteDealStore;
    use crate::deal::types::{DealTerms, NewDeal};
    use crate::kv::KvError;
    use crate::storage::Database;
    use crate::stream::{SqliteStreamLog, StreamKind, StreamLog};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingWatchList {
        unwatched: Mutex<Vec<AccountId>>,
    }

    #[async_trait]
    impl EscrowWatchList for RecordingWatchList {
        async fn watch(&self, _address: &AccountId) -> Result<(), KvError> {
            Ok(())
        }

        async fn unwatch(&self, address: &AccountId) -> Result<(), KvError> {
            self.unwatched.lock().unwrap().push(*address);
            Ok(())
        }
    }

    struct Fixture {
        worker: EscrowDepositWorker,
        store: Arc<SqliteDealStore>,
        watch_list: Arc<RecordingWatchList>,
        notifications: EventStream<NotificationEvent>,
        address: AccountId,
        deal_id: i64,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let store = Arc::new(SqliteDealStore::new(db.clone()));
        let deal = store
            .insert_deal(
                &NewDeal {
                    lessor_id: 1,
                    lessee_id: 2,
                    channel_id: 100,
                    terms: DealTerms {
                        deal_type: "post".to_string(),
                        duration_hours: 24,
                        price_nano: 1_000_000_000,
                        details: String::new(),
                    },
                },
                1_100_000_000,
            )
            .await
            .unwrap();
        store
            .update_status(deal.id, DealStatus::Draft, DealStatus::Approved)
            .await
            .unwrap();
        let address = AccountId::new(0, [7; 32]);
        store.assign_escrow(deal.id, &address.to_raw()).await.unwrap();

        let log: Arc<dyn StreamLog> = Arc::new(SqliteStreamLog::new(db));
        let notifications = EventStream::new(log, StreamKind::Notification);
        notifications.ensure_group("test").await.unwrap();

        let watch_list = Arc::new(RecordingWatchList::default());
        let worker = EscrowDepositWorker::new(
            store.clone(),
            watch_list.clone(),
            notifications.clone(),
            Arc::new(Metrics::new(&prometheus::Registry::new()).unwrap()),
        );
        Fixture {
            worker,
            store,
            watch_list,
            notifications,
            address,
            deal_id: deal.id,
        }
    }

    fn deposit(address: &AccountId, amount: u64) -> EscrowDepositEvent {
        EscrowDepositEvent {
            address: address.to_raw(),
            amount,
            timestamp: 1_700_000_000,
            tx_hash: "ab".repeat(32),
        }
    }

    async fn status(f: &Fixture) -> DealStatus {
        f.store.get_deal(f.deal_id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_short_deposit_is_acked_without_change() {
        let f = fixture().await;
        f.worker
            .handle(EntryId::new(1, 0), deposit(&f.address, 1_099_999_999))
            .await
            .unwrap();

        assert_eq!(status(&f).await, DealStatus::WaitingEscrowDeposit);
        assert!(f.watch_list.unwatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sufficient_deposit_confirms_and_notifies() {
        let f = fixture().await;
        f.worker
            .handle(EntryId::new(1, 0), deposit(&f.address, 1_100_000_000))
            .await
            .unwrap();

        assert_eq!(status(&f).await, DealStatus::EscrowDepositConfirmed);
        assert_eq!(*f.watch_list.unwatched.lock().unwrap(), vec![f.address]);

        let sent = f
            .notifications
            .read("test", "c", 10, Duration::ZERO)
            .await
            .unwrap();
        let users: Vec<i64> = sent.iter().map(|(_, n)| n.user_id).collect();
        assert_eq!(users, vec![1, 2]);
        assert!(sent.iter().all(|(_, n)| n.kind == ESCROW_CONFIRMED_NOTIFICATION));
    }

    #[tokio::test]
    async fn test_replay_is_a_no_op() {
        let f = fixture().await;
        let event = deposit(&f.address, 2_000_000_000);
        f.worker.handle(EntryId::new(1, 0), event.clone()).await.unwrap();
        f.worker.handle(EntryId::new(1, 0), event).await.unwrap();

        assert_eq!(status(&f).await, DealStatus::EscrowDepositConfirmed);
        assert_eq!(f.watch_list.unwatched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_address_is_acked() {
        let f = fixture().await;
        let stranger = AccountId::new(0, [9; 32]);
        f.worker
            .handle(EntryId::new(1, 0), deposit(&stranger, 5_000_000_000))
            .await
            .unwrap();
        assert_eq!(status(&f).await, DealStatus::WaitingEscrowDeposit);
    }
}
