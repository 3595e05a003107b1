//! Process Metrics
//!
//! Prometheus counters registered once at startup and handed to every
//! component as `Arc<Metrics>`. `snapshot()` reads the counters back for
//! periodic status logging.

use prometheus::{register_int_counter_with_registry, IntCounter, Registry};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub master_blocks_seen: u64,
    pub shard_blocks_emitted: u64,
    pub shard_fetch_failures: u64,
    pub transactions_scanned: u64,
    pub transaction_fetch_failures: u64,
    pub deposits_matched: u64,
    pub deposits_dropped: u64,
    pub events_published: u64,
    pub entries_processed: u64,
    pub entries_acked: u64,
    pub entries_reclaimed: u64,
    pub entries_trimmed: u64,
    pub escrow_confirmations: u64,
    pub deals_expired: u64,
    pub locks_taken: u64,
    pub locks_contended: u64,
    pub locks_recovered: u64,
}

#[derive(Clone, Debug)]
pub struct Metrics {
    started_at: Instant,
    master_blocks_seen: IntCounter,
    shard_blocks_emitted: IntCounter,
    shard_fetch_failures: IntCounter,
    transactions_scanned: IntCounter,
    transaction_fetch_failures: IntCounter,
    deposits_matched: IntCounter,
    deposits_dropped: IntCounter,
    events_published: IntCounter,
    entries_processed: IntCounter,
    entries_acked: IntCounter,
    entries_reclaimed: IntCounter,
    entries_trimmed: IntCounter,
    escrow_confirmations: IntCounter,
    deals_expired: IntCounter,
    locks_taken: IntCounter,
    locks_contended: IntCounter,
    locks_recovered: IntCounter,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            started_at: Instant::now(),
            master_blocks_seen: register_int_counter_with_registry!(
                "escrow_master_blocks_seen",
                "Total number of new masterchain blocks observed",
                registry,
            )?,
            shard_blocks_emitted: register_int_counter_with_registry!(
                "escrow_shard_blocks_emitted",
                "Total number of shard blocks handed to the scan workers",
                registry,
            )?,
            shard_fetch_failures: register_int_counter_with_registry!(
                "escrow_shard_fetch_failures",
                "Total number of shard block fetches that exhausted their retries",
                registry,
            )?,
            transactions_scanned: register_int_counter_with_registry!(
                "escrow_transactions_scanned",
                "Total number of transaction ids listed for watched accounts",
                registry,
            )?,
            transaction_fetch_failures: register_int_counter_with_registry!(
                "escrow_transaction_fetch_failures",
                "Total number of transactions skipped after their fetch failed",
                registry,
            )?,
            deposits_matched: register_int_counter_with_registry!(
                "escrow_deposits_matched",
                "Total number of incoming transfers matched to a watched escrow",
                registry,
            )?,
            deposits_dropped: register_int_counter_with_registry!(
                "escrow_deposits_dropped",
                "Total number of deposits dropped because the deposit queue was full",
                registry,
            )?,
            events_published: register_int_counter_with_registry!(
                "escrow_events_published",
                "Total number of escrow deposit events appended to the stream",
                registry,
            )?,
            entries_processed: register_int_counter_with_registry!(
                "escrow_stream_entries_processed",
                "Total number of stream entries handled by consumers",
                registry,
            )?,
            entries_acked: register_int_counter_with_registry!(
                "escrow_stream_entries_acked",
                "Total number of stream entries acknowledged",
                registry,
            )?,
            entries_reclaimed: register_int_counter_with_registry!(
                "escrow_stream_entries_reclaimed",
                "Total number of idle pending entries claimed by another consumer",
                registry,
            )?,
            entries_trimmed: register_int_counter_with_registry!(
                "escrow_stream_entries_trimmed",
                "Total number of stream entries removed by age trimming",
                registry,
            )?,
            escrow_confirmations: register_int_counter_with_registry!(
                "escrow_deposit_confirmations",
                "Total number of deals moved to escrow_deposit_confirmed",
                registry,
            )?,
            deals_expired: register_int_counter_with_registry!(
                "escrow_deals_expired",
                "Total number of deals expired after the deposit window lapsed",
                registry,
            )?,
            locks_taken: register_int_counter_with_registry!(
                "escrow_action_locks_taken",
                "Total number of deal action locks acquired",
                registry,
            )?,
            locks_contended: register_int_counter_with_registry!(
                "escrow_action_locks_contended",
                "Total number of lock attempts that found the action already locked",
                registry,
            )?,
            locks_recovered: register_int_counter_with_registry!(
                "escrow_action_locks_recovered",
                "Total number of expired action locks reconciled",
                registry,
            )?,
        })
    }

    pub fn inc_master_blocks(&self) {
        self.master_blocks_seen.inc();
    }

    pub fn add_shard_blocks(&self, count: u64) {
        self.shard_blocks_emitted.inc_by(count);
    }

    pub fn inc_shard_fetch_failures(&self) {
        self.shard_fetch_failures.inc();
    }

    pub fn add_transactions_scanned(&self, count: u64) {
        self.transactions_scanned.inc_by(count);
    }

    pub fn inc_transaction_fetch_failures(&self) {
        self.transaction_fetch_failures.inc();
    }

    pub fn inc_deposits_matched(&self) {
        self.deposits_matched.inc();
    }

    pub fn inc_deposits_dropped(&self) {
        self.deposits_dropped.inc();
    }

    pub fn inc_events_published(&self) {
        self.events_published.inc();
    }

    pub fn inc_entries_processed(&self) {
        self.entries_processed.inc();
    }

    pub fn add_entries_acked(&self, count: u64) {
        self.entries_acked.inc_by(count);
    }

    pub fn add_entries_reclaimed(&self, count: u64) {
        self.entries_reclaimed.inc_by(count);
    }

    pub fn add_entries_trimmed(&self, count: u64) {
        self.entries_trimmed.inc_by(count);
    }

    pub fn inc_escrow_confirmations(&self) {
        self.escrow_confirmations.inc();
    }

    pub fn inc_deals_expired(&self) {
        self.deals_expired.inc();
    }

    pub fn inc_locks_taken(&self) {
        self.locks_taken.inc();
    }

    pub fn inc_locks_contended(&self) {
        self.locks_contended.inc();
    }

    pub fn inc_locks_recovered(&self) {
        self.locks_recovered.inc();
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            master_blocks_seen: self.master_blocks_seen.get(),
            shard_blocks_emitted: self.shard_blocks_emitted.get(),
            shard_fetch_failures: self.shard_fetch_failures.get(),
            transactions_scanned: self.transactions_scanned.get(),
            transaction_fetch_failures: self.transaction_fetch_failures.get(),
            deposits_matched: self.deposits_matched.get(),
            deposits_dropped: self.deposits_dropped.get(),
            events_published: self.events_published.get(),
            entries_processed: self.entries_processed.get(),
            entries_acked: self.entries_acked.get(),
            entries_reclaimed: self.entries_reclaimed.get(),
            entries_trimmed: self.entries_trimmed.get(),
            escrow_confirmations: self.escrow_confirmations.get(),
            deals_expired: self.deals_expired.get(),
            locks_taken: self.locks_taken.get(),
            locks_contended: self.locks_contended.get(),
            locks_recovered: self.locks_recovered.get(),
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "up {}s | master: {} | shard blocks: {} | deposits: {} matched, {} dropped | events: {} | confirmed: {} | expired: {}",
            self.uptime_secs,
            self.master_blocks_seen,
            self.shard_blocks_emitted,
            self.deposits_matched,
            self.deposits_dropped,
            self.events_published,
            self.escrow_confirmations,
            self.deals_expired
        )
    }
}
