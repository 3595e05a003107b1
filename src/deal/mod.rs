//! Deal Lifecycle Module
//!
//! Ad deals between a channel owner (lessor) and an advertiser (lessee),
//! from draft through escrow funding to payout.
//!
//! # Components
//!
//! - `types`: deal records, status machine, fees
//! - `signature`: keyed signatures over exact terms
//! - `store` / `sqlite`: narrow store capabilities and their SQLite implementation
//! - `wallet`: per-deal escrow address derivation
//! - `service`: state machine driver
//! - `escrow_creator` / `escrow_worker`: background escrow creation and deposit confirmation
//! - `lock` / `actions` / `runner`: lock-guarded payouts and channel posts
//! - `dry_run`: logging stand-ins for the wallet signer and channel bot

pub mod actions;
pub mod dry_run;
pub mod escrow_creator;
pub mod escrow_worker;
pub mod lock;
pub mod runner;
pub mod service;
pub mod signature;
pub mod sqlite;
pub mod store;
pub mod types;
pub mod wallet;

// Re-exports for convenience
pub use actions::{
    transfer_memo, ActionError, ChannelPostAction, ChannelPublisher, EscrowRefundAction,
    EscrowReleaseAction, EscrowTransfers, GuardedAction,
};
pub use dry_run::{DryRunPublisher, DryRunTransfers, TransferRecord};
pub use escrow_creator::EscrowCreationWorker;
pub use escrow_worker::{EscrowDepositWorker, ESCROW_CONFIRMED_NOTIFICATION};
pub use lock::{ActionKind, ActionLockStore, DealActionLock, LockError, LockStatus};
pub use runner::{ActionOutcome, ActionPass, ActionRunner, ActionWorker};
pub use service::DealService;
pub use signature::DealSigner;
pub use sqlite::SqliteDealStore;
pub use store::{DealRepository, EscrowDepositDeals};
pub use types::{
    Deal, DealError, DealStatus, DealTerms, DraftUpdate, EscrowFees, NewDeal, Party,
    SettlementOutcome,
};
pub use wallet::{EscrowWalletFactory, SeededWalletFactory};
