//! Deal Service
//!
//! Drives the deal state machine. Every status change is checked against
//! [`DealStatus::can_transition_to`] and applied as a conditional update, so
//! concurrent callers racing on the same deal see `Ok(false)` rather than
//! corrupting state.

use std::sync::Arc;

use super::signature::DealSigner;
use super::store::DealRepository;
use super::types::{
    Deal, DealError, DealStatus, DraftUpdate, EscrowFees, NewDeal, Party, SettlementOutcome,
};
use super::wallet::EscrowWalletFactory;
use crate::chain::{AccountId, EscrowWatchList};
use crate::common::log_deal_transition;

/// Deal lifecycle service
pub struct DealService {
    deals: Arc<dyn DealRepository>,
    signer: DealSigner,
    fees: EscrowFees,
    wallets: Arc<dyn EscrowWalletFactory>,
    watch_list: Arc<dyn EscrowWatchList>,
}

impl DealService {
    pub fn new(
        deals: Arc<dyn DealRepository>,
        signer: DealSigner,
        fees: EscrowFees,
        wallets: Arc<dyn EscrowWalletFactory>,
        watch_list: Arc<dyn EscrowWatchList>,
    ) -> Self {
        Self {
            deals,
            signer,
            fees,
            wallets,
            watch_list,
        }
    }

    pub fn fees(&self) -> EscrowFees {
        self.fees
    }

    pub async fn get_deal(&self, deal_id: i64) -> Result<Deal, DealError> {
        self.deals
            .get_deal(deal_id)
            .await?
            .ok_or(DealError::NotFound(deal_id))
    }

    // ========================================================================
    // Draft
    // ========================================================================

    pub async fn create_deal(&self, deal: NewDeal) -> Result<Deal, DealError> {
        deal.terms.validate()?;
        if deal.lessor_id == deal.lessee_id {
            return Err(DealError::InvalidTerms(
                "lessor and lessee must differ".to_string(),
            ));
        }

        let escrow_amount = self.fees.escrow_amount(deal.terms.price_nano)?;
        let created = self.deals.insert_deal(&deal, escrow_amount).await?;

        tracing::info!(
            deal_id = created.id,
            channel_id = created.channel_id,
            escrow_amount_nano = escrow_amount,
            "Deal created"
        );
        Ok(created)
    }

    /// Edit draft terms. Any edit clears both signatures.
    pub async fn update_draft(
        &self,
        deal_id: i64,
        user_id: i64,
        update: DraftUpdate,
    ) -> Result<Deal, DealError> {
        let deal = self.get_deal(deal_id).await?;
        Self::require_party(&deal, user_id)?;
        if deal.status != DealStatus::Draft {
            return Err(DealError::NotDraft(deal_id));
        }
        if update.is_empty() {
            return Ok(deal);
        }

        let terms = update.apply(&deal.terms);
        terms.validate()?;
        let escrow_amount = self.fees.escrow_amount(terms.price_nano)?;

        if !self
            .deals
            .update_draft_terms(deal_id, &terms, escrow_amount)
            .await?
        {
            return Err(DealError::NotDraft(deal_id));
        }
        self.get_deal(deal_id).await
    }

    /// Set the caller's own payout address
    pub async fn set_payout_address(
        &self,
        deal_id: i64,
        user_id: i64,
        address: &str,
    ) -> Result<Deal, DealError> {
        let address = parse_address(address)?;
        let deal = self.get_deal(deal_id).await?;
        let party = Self::require_party(&deal, user_id)?;

        if !self
            .deals
            .set_payout_address(deal_id, party, &address.to_raw())
            .await?
        {
            return Err(DealError::NotDraft(deal_id));
        }
        self.get_deal(deal_id).await
    }

    pub async fn link_wallet(&self, user_id: i64, address: &str) -> Result<(), DealError> {
        let address = parse_address(address)?;
        self.deals.link_wallet(user_id, &address.to_raw()).await
    }

    /// Sign the current terms. The deal is approved once both parties'
    /// stored signatures match; otherwise it stays a draft.
    pub async fn sign_deal(&self, deal_id: i64, user_id: i64) -> Result<Deal, DealError> {
        let deal = self.get_deal(deal_id).await?;
        let party = Self::require_party(&deal, user_id)?;
        if deal.status != DealStatus::Draft {
            return Err(DealError::NotDraft(deal_id));
        }

        let own_payout = deal
            .payout_address(party)
            .ok_or(DealError::PayoutAddressMissing(deal_id))?;
        let linked = self
            .deals
            .linked_wallet(user_id)
            .await?
            .ok_or(DealError::WalletNotLinked(user_id))?;
        if linked != own_payout {
            return Err(DealError::WalletMismatch { deal_id, user_id });
        }

        let signature = self
            .signer
            .expected_for(&deal, party)
            .ok_or(DealError::PayoutAddressMissing(deal_id))?;

        let signed = self
            .deals
            .sign_and_try_approve(deal_id, party, &signature, &self.signer)
            .await?;

        tracing::info!(
            deal_id,
            user_id,
            status = %signed.status,
            "Deal signed"
        );
        Ok(signed)
    }

    /// Reject a draft. `NotDraft` once the deal has left draft.
    pub async fn reject_deal(&self, deal_id: i64, user_id: i64) -> Result<(), DealError> {
        let deal = self.get_deal(deal_id).await?;
        Self::require_party(&deal, user_id)?;

        let applied = self
            .deals
            .update_status(deal_id, DealStatus::Draft, DealStatus::Rejected)
            .await?;
        log_deal_transition(
            deal_id,
            DealStatus::Draft.as_str(),
            DealStatus::Rejected.as_str(),
            applied,
        );

        if !applied {
            return Err(DealError::NotDraft(deal_id));
        }
        Ok(())
    }

    // ========================================================================
    // Escrow
    // ========================================================================

    /// Create the escrow wallet for an approved deal.
    ///
    /// Returns false if another caller assigned escrow first.
    pub async fn create_escrow(&self, deal_id: i64) -> Result<bool, DealError> {
        let deal = self.get_deal(deal_id).await?;
        if !deal
            .status
            .can_transition_to(DealStatus::WaitingEscrowDeposit)
        {
            return Err(DealError::InvalidTransition {
                from: deal.status,
                to: DealStatus::WaitingEscrowDeposit,
            });
        }
        if deal.escrow_address.is_some() {
            return Ok(false);
        }

        let wallet = self.wallets.create_wallet(deal_id).await?;

        // Watch before the address is published so no deposit can beat it
        self.watch_list.watch(&wallet).await?;

        let assigned = self.deals.assign_escrow(deal_id, &wallet.to_raw()).await?;
        log_deal_transition(
            deal_id,
            DealStatus::Approved.as_str(),
            DealStatus::WaitingEscrowDeposit.as_str(),
            assigned,
        );

        if assigned {
            tracing::info!(
                deal_id,
                escrow_address = %wallet,
                escrow_amount_nano = deal.escrow_amount_nano,
                "Escrow created"
            );
        }
        Ok(assigned)
    }

    /// in_progress -> waiting_escrow_release | waiting_escrow_refund
    pub async fn begin_settlement(
        &self,
        deal_id: i64,
        outcome: SettlementOutcome,
    ) -> Result<bool, DealError> {
        let deal = self.get_deal(deal_id).await?;
        self.transition(&deal, outcome.waiting_status()).await
    }

    /// Close a deal whose escrow release or refund is confirmed
    pub async fn complete_deal(&self, deal_id: i64) -> Result<bool, DealError> {
        let deal = self.get_deal(deal_id).await?;
        self.transition(&deal, DealStatus::Completed).await
    }

    /// Conditional transition from the deal's current status
    pub async fn transition(&self, deal: &Deal, to: DealStatus) -> Result<bool, DealError> {
        transition(self.deals.as_ref(), deal, to).await
    }

    fn require_party(deal: &Deal, user_id: i64) -> Result<Party, DealError> {
        deal.party_of(user_id).ok_or(DealError::NotParty {
            deal_id: deal.id,
            user_id,
        })
    }
}

/// Check the transition is allowed and apply it conditionally
pub(crate) async fn transition(
    deals: &dyn DealRepository,
    deal: &Deal,
    to: DealStatus,
) -> Result<bool, DealError> {
    if !deal.status.can_transition_to(to) {
        return Err(DealError::InvalidTransition {
            from: deal.status,
            to,
        });
    }

    let applied = deals.update_status(deal.id, deal.status, to).await?;
    log_deal_transition(deal.id, deal.status.as_str(), to.as_str(), applied);
    Ok(applied)
}

fn parse_address(address: &str) -> Result<AccountId, DealError> {
    address
        .parse()
        .map_err(|_| DealError::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{WatchListSync, WatchedAddressRegistry};
    use crate::common::Metrics;
    use crate::deal::sqlite::SqliteDealStore;
    use crate::deal::types::DealTerms;
    use crate::deal::wallet::SeededWalletFactory;
    use crate::kv::{KeyValueStore, MemoryKeyStore};
    use crate::storage::Database;
    use std::time::Duration;

    const LESSOR: i64 = 1;
    const LESSEE: i64 = 2;

    struct Fixture {
        service: DealService,
        kv: Arc<MemoryKeyStore>,
        registry: Arc<WatchedAddressRegistry>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteDealStore::new(Database::in_memory().unwrap()));
        let kv = Arc::new(MemoryKeyStore::new(0));
        let registry = Arc::new(WatchedAddressRegistry::new());
        let sync = Arc::new(WatchListSync::new(
            registry.clone(),
            kv.clone(),
            store.clone(),
            0,
            Duration::from_secs(60),
            Arc::new(Metrics::new(&prometheus::Registry::new()).unwrap()),
        ));
        let service = DealService::new(
            store,
            DealSigner::new("secret").unwrap(),
            EscrowFees::default(),
            Arc::new(SeededWalletFactory::new("seed")),
            sync,
        );
        Fixture {
            service,
            kv,
            registry,
        }
    }

    fn wallet(byte: u8) -> String {
        AccountId::new(0, [byte; 32]).to_raw()
    }

    fn new_deal() -> NewDeal {
        NewDeal {
            lessor_id: LESSOR,
            lessee_id: LESSEE,
            channel_id: 100,
            terms: DealTerms {
                deal_type: "post".to_string(),
                duration_hours: 24,
                price_nano: 1_000_000_000,
                details: "pinned".to_string(),
            },
        }
    }

    /// Draft with both payout addresses and linked wallets
    async fn ready_draft(service: &DealService) -> Deal {
        let deal = service.create_deal(new_deal()).await.unwrap();
        service.link_wallet(LESSOR, &wallet(1)).await.unwrap();
        service.link_wallet(LESSEE, &wallet(2)).await.unwrap();
        service.set_payout_address(deal.id, LESSOR, &wallet(1)).await.unwrap();
        service.set_payout_address(deal.id, LESSEE, &wallet(2)).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_deal_computes_escrow_amount() {
        let f = fixture();
        let deal = f.service.create_deal(new_deal()).await.unwrap();
        assert_eq!(deal.status, DealStatus::Draft);
        assert_eq!(deal.escrow_amount_nano, 1_100_000_000);

        let mut same_party = new_deal();
        same_party.lessee_id = LESSOR;
        assert!(matches!(
            f.service.create_deal(same_party).await,
            Err(DealError::InvalidTerms(_))
        ));
    }

    #[tokio::test]
    async fn test_both_signatures_approve() {
        let f = fixture();
        let deal = ready_draft(&f.service).await;

        let after_one = f.service.sign_deal(deal.id, LESSOR).await.unwrap();
        assert_eq!(after_one.status, DealStatus::Draft);
        assert!(after_one.lessor_signature.is_some());

        let after_both = f.service.sign_deal(deal.id, LESSEE).await.unwrap();
        assert_eq!(after_both.status, DealStatus::Approved);
    }

    #[tokio::test]
    async fn test_sign_preconditions() {
        let f = fixture();
        let deal = f.service.create_deal(new_deal()).await.unwrap();

        assert!(matches!(
            f.service.sign_deal(deal.id, 99).await,
            Err(DealError::NotParty { .. })
        ));
        assert!(matches!(
            f.service.sign_deal(deal.id, LESSOR).await,
            Err(DealError::PayoutAddressMissing(_))
        ));

        f.service.set_payout_address(deal.id, LESSOR, &wallet(1)).await.unwrap();
        f.service.set_payout_address(deal.id, LESSEE, &wallet(2)).await.unwrap();
        assert!(matches!(
            f.service.sign_deal(deal.id, LESSOR).await,
            Err(DealError::WalletNotLinked(LESSOR))
        ));

        f.service.link_wallet(LESSOR, &wallet(9)).await.unwrap();
        assert!(matches!(
            f.service.sign_deal(deal.id, LESSOR).await,
            Err(DealError::WalletMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_payout_change_invalidates_signature() {
        let f = fixture();
        let deal = ready_draft(&f.service).await;
        f.service.sign_deal(deal.id, LESSOR).await.unwrap();

        let changed = f
            .service
            .set_payout_address(deal.id, LESSEE, &wallet(3))
            .await
            .unwrap();
        assert!(changed.lessor_signature.is_none());
        assert!(changed.lessee_signature.is_none());
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let f = fixture();
        let deal = f.service.create_deal(new_deal()).await.unwrap();
        assert!(matches!(
            f.service.set_payout_address(deal.id, LESSOR, "not-an-address").await,
            Err(DealError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_create_escrow_watches_and_assigns_once() {
        let f = fixture();
        let deal = ready_draft(&f.service).await;

        assert!(matches!(
            f.service.create_escrow(deal.id).await,
            Err(DealError::InvalidTransition { .. })
        ));

        f.service.sign_deal(deal.id, LESSOR).await.unwrap();
        f.service.sign_deal(deal.id, LESSEE).await.unwrap();

        assert!(f.service.create_escrow(deal.id).await.unwrap());
        let deal = f.service.get_deal(deal.id).await.unwrap();
        assert_eq!(deal.status, DealStatus::WaitingEscrowDeposit);

        let address: AccountId = deal.escrow_address.clone().unwrap().parse().unwrap();
        assert!(f.registry.is_watched(&address).await);
        assert_eq!(f.kv.scan_keys().await.unwrap(), vec![address.to_raw()]);

        assert!(matches!(
            f.service.create_escrow(deal.id).await,
            Err(DealError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_settlement_requires_in_progress() {
        let f = fixture();
        let deal = f.service.create_deal(new_deal()).await.unwrap();

        assert!(matches!(
            f.service
                .begin_settlement(deal.id, SettlementOutcome::Release)
                .await,
            Err(DealError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.service.complete_deal(deal.id).await,
            Err(DealError::InvalidTransition { .. })
        ));
    }
}
