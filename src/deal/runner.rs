//! Action Runner
//!
//! Runs a [`GuardedAction`] under a deal action lock:
//!
//! 1. A stale lock (still `locked`, TTL elapsed) is reconciled first: if the
//!    side effect is already there the deal moves on and the lock is marked
//!    `completed`, otherwise the lock is marked `failed` and the action retried.
//! 2. Take the lock; contention means another runner has it, skip this round.
//! 3. Re-read the deal under the lock, execute, transition, release.
//!
//! If the transition fails after the side effect succeeded the lock is left
//! held. It goes stale and step 1 picks it up.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::actions::{ActionError, GuardedAction};
use super::lock::{ActionLockStore, LockError, LockStatus};
use super::service::transition;
use super::store::DealRepository;
use super::types::{Deal, DealStatus};
use crate::common::{log_lock_event, Metrics};

const BATCH_SIZE: usize = 100;

/// What a run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Side effect performed now
    Executed,
    /// Side effect found from an earlier run; deal moved on
    Recovered,
    /// Not due, or another runner holds the lock
    Skipped,
}

pub struct ActionRunner {
    deals: Arc<dyn DealRepository>,
    locks: ActionLockStore,
    metrics: Arc<Metrics>,
}

impl ActionRunner {
    pub fn new(deals: Arc<dyn DealRepository>, locks: ActionLockStore, metrics: Arc<Metrics>) -> Self {
        Self {
            deals,
            locks,
            metrics,
        }
    }

    pub async fn run_action(
        &self,
        action: &dyn GuardedAction,
        deal: &Deal,
    ) -> Result<ActionOutcome, ActionError> {
        if deal.status != action.trigger_status() {
            return Ok(ActionOutcome::Skipped);
        }
        let kind = action.kind();

        if let Some(stale) = self.locks.find_expired_lock(deal.id, kind).await? {
            self.metrics.inc_locks_recovered();

            if action.already_applied(deal).await? {
                transition(self.deals.as_ref(), deal, action.success_status()).await?;
                self.locks.release_lock(stale.id, LockStatus::Completed).await?;
                log_lock_event("stale_lock_completed", deal.id, kind.as_str(), None);
                return Ok(ActionOutcome::Recovered);
            }

            self.locks.release_lock(stale.id, LockStatus::Failed).await?;
            log_lock_event(
                "stale_lock_failed",
                deal.id,
                kind.as_str(),
                Some("side effect not found, retrying"),
            );
        }

        let lock_id = match self.locks.take_lock(deal.id, kind).await {
            Ok(lock_id) => lock_id,
            Err(LockError::AlreadyLocked { .. }) => {
                self.metrics.inc_locks_contended();
                tracing::debug!(deal_id = deal.id, action = %kind, "Action locked elsewhere");
                return Ok(ActionOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        self.metrics.inc_locks_taken();

        // The caller's snapshot may predate a run that finished and released
        let deal = match self.deals.get_deal(deal.id).await {
            Ok(Some(current)) if current.status == action.trigger_status() => current,
            Ok(_) => {
                self.locks.release_lock(lock_id, LockStatus::Completed).await?;
                return Ok(ActionOutcome::Skipped);
            }
            Err(e) => {
                if let Err(release_err) = self.locks.release_lock(lock_id, LockStatus::Failed).await {
                    tracing::warn!(lock_id, error = %release_err, "Failed to release lock");
                }
                return Err(e.into());
            }
        };
        let deal = &deal;

        if let Err(e) = action.execute(deal).await {
            log_lock_event("action_failed", deal.id, kind.as_str(), Some(&e.to_string()));
            if let Err(release_err) = self.locks.release_lock(lock_id, LockStatus::Failed).await {
                tracing::warn!(lock_id, error = %release_err, "Failed to release lock");
            }
            return Err(e);
        }

        // Side effect done. On failure here the lock stays held for recovery.
        transition(self.deals.as_ref(), deal, action.success_status()).await?;
        self.locks.release_lock(lock_id, LockStatus::Completed).await?;
        log_lock_event("action_completed", deal.id, kind.as_str(), None);
        Ok(ActionOutcome::Executed)
    }
}

/// Counts from one worker pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActionPass {
    pub executed: usize,
    pub recovered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub completed: usize,
}

/// Drives every action over the deals due for it and closes settled deals
pub struct ActionWorker {
    deals: Arc<dyn DealRepository>,
    runner: ActionRunner,
    actions: Vec<Arc<dyn GuardedAction>>,
    interval: Duration,
}

impl ActionWorker {
    pub fn new(
        deals: Arc<dyn DealRepository>,
        runner: ActionRunner,
        actions: Vec<Arc<dyn GuardedAction>>,
        interval: Duration,
    ) -> Self {
        Self {
            deals,
            runner,
            actions,
            interval,
        }
    }

    pub async fn run_once(&self) -> Result<ActionPass, ActionError> {
        let mut pass = ActionPass::default();

        for action in &self.actions {
            let due = self
                .deals
                .list_by_status(action.trigger_status(), BATCH_SIZE)
                .await?;

            for deal in due {
                match self.runner.run_action(action.as_ref(), &deal).await {
                    Ok(ActionOutcome::Executed) => pass.executed += 1,
                    Ok(ActionOutcome::Recovered) => pass.recovered += 1,
                    Ok(ActionOutcome::Skipped) => pass.skipped += 1,
                    Err(e) => {
                        pass.failed += 1;
                        tracing::warn!(
                            deal_id = deal.id,
                            action = %action.kind(),
                            error = %e,
                            "Guarded action failed"
                        );
                    }
                }
            }
        }

        for status in [
            DealStatus::EscrowReleaseConfirmed,
            DealStatus::EscrowRefundConfirmed,
        ] {
            for deal in self.deals.list_by_status(status, BATCH_SIZE).await? {
                if transition(self.deals.as_ref(), &deal, DealStatus::Completed).await? {
                    pass.completed += 1;
                }
            }
        }

        Ok(pass)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(pass) if pass == ActionPass::default() => {}
                Ok(pass) => tracing::info!(?pass, "Action pass"),
                Err(e) => tracing::warn!(error = %e, "Action pass failed"),
            }
        }
        tracing::info!("Action worker stopped");
    }
}
