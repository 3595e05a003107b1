//! Stream Consumer Template
//!
//! Every consumer of every stream runs the same three loops:
//! - read: short poll for new entries, process, ack
//! - reclaim: take over entries left unacked past the idle threshold
//! - trim: drop entries past the retention window
//!
//! A handler returning `Ok` gets the entry acked. `Err` leaves it pending
//! so it is redelivered by the reclaim loop; use it for transient failures only.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::stream::EventStream;
use super::types::{EntryId, StreamError, StreamEvent};
use crate::common::{EscrowError, Metrics, StreamTimings};

/// Processes one event
#[async_trait]
pub trait StreamHandler<E>: Send + Sync {
    async fn handle(&self, id: EntryId, event: E) -> Result<(), EscrowError>;
}

pub struct StreamConsumer<E> {
    stream: EventStream<E>,
    handler: Arc<dyn StreamHandler<E>>,
    group: String,
    consumer: String,
    timings: StreamTimings,
    metrics: Arc<Metrics>,
}

impl<E: StreamEvent> StreamConsumer<E> {
    pub fn new(
        stream: EventStream<E>,
        handler: Arc<dyn StreamHandler<E>>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        timings: StreamTimings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            stream,
            handler,
            group: group.into(),
            consumer: consumer.into(),
            timings,
            metrics,
        }
    }

    /// Handle a batch and ack the entries that succeeded
    async fn process(&self, events: Vec<(EntryId, E)>) -> Result<usize, StreamError> {
        let mut done = Vec::with_capacity(events.len());
        for (id, event) in events {
            self.metrics.inc_entries_processed();
            match self.handler.handle(id, event).await {
                Ok(()) => done.push(id),
                Err(e) => {
                    tracing::warn!(
                        stream = %self.stream.key(),
                        entry_id = %id,
                        error = %e,
                        "Handler failed, leaving entry pending"
                    );
                }
            }
        }

        if !done.is_empty() {
            let acked = self.stream.ack(&self.group, &done).await?;
            self.metrics.add_entries_acked(acked);
        }
        Ok(done.len())
    }

    /// One read-and-process round. Returns the number of entries acked.
    pub async fn poll_once(&self) -> Result<usize, StreamError> {
        let events = self
            .stream
            .read(
                &self.group,
                &self.consumer,
                self.timings.batch_size,
                self.timings.poll_interval,
            )
            .await?;
        if events.is_empty() {
            return Ok(0);
        }
        self.process(events).await
    }

    /// One reclaim round. Returns the number of reclaimed entries acked.
    pub async fn reclaim_once(&self) -> Result<usize, StreamError> {
        let events = self
            .stream
            .reclaim_pending(
                &self.group,
                &self.consumer,
                self.timings.batch_size,
                self.timings.reclaim_min_idle,
            )
            .await?;
        if events.is_empty() {
            return Ok(0);
        }

        self.metrics.add_entries_reclaimed(events.len() as u64);
        tracing::info!(
            stream = %self.stream.key(),
            consumer = %self.consumer,
            count = events.len(),
            "Reclaimed pending entries"
        );
        self.process(events).await
    }

    /// One trim round
    pub async fn trim_once(&self) -> Result<u64, StreamError> {
        let removed = self.stream.trim_by_age(self.timings.retention).await?;
        if removed > 0 {
            self.metrics.add_entries_trimmed(removed);
            tracing::info!(stream = %self.stream.key(), removed, "Trimmed stream");
        }
        Ok(removed)
    }

    /// Run the three loops until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            stream = %self.stream.key(),
            group = %self.group,
            consumer = %self.consumer,
            "Stream consumer started"
        );

        tokio::join!(
            self.read_loop(cancel.clone()),
            self.reclaim_loop(cancel.clone()),
            self.trim_loop(cancel.clone()),
        );

        tracing::info!(stream = %self.stream.key(), consumer = %self.consumer, "Stream consumer stopped");
    }

    async fn read_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll_once() => {
                    if let Err(e) = result {
                        tracing::warn!(stream = %self.stream.key(), error = %e, "Stream read failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.timings.poll_interval) => {}
                        }
                    }
                }
            }
        }
    }

    async fn reclaim_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.timings.reclaim_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reclaim_once().await {
                        tracing::warn!(stream = %self.stream.key(), error = %e, "Pending reclaim failed");
                    }
                }
            }
        }
    }

    async fn trim_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.timings.trim_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.trim_once().await {
                        tracing::warn!(stream = %self.stream.key(), error = %e, "Stream trim failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::stream::events::{NotificationEvent, StreamKind};
    use crate::stream::log::StreamLog;
    use crate::stream::sqlite::SqliteStreamLog;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails the first `fail_first` calls, records the rest
    struct Recorder {
        fail_first: Mutex<usize>,
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl StreamHandler<NotificationEvent> for Recorder {
        async fn handle(&self, _id: EntryId, event: NotificationEvent) -> Result<(), EscrowError> {
            let mut fail = self.fail_first.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(EscrowError::internal("transient"));
            }
            self.seen.lock().unwrap().push(event.deal_id);
            Ok(())
        }
    }

    fn timings() -> StreamTimings {
        StreamTimings {
            poll_interval: Duration::from_millis(1),
            reclaim_min_idle: Duration::ZERO,
            ..StreamTimings::default()
        }
    }

    async fn setup(fail_first: usize) -> (EventStream<NotificationEvent>, Arc<Recorder>, StreamConsumer<NotificationEvent>) {
        let log: Arc<dyn StreamLog> = Arc::new(SqliteStreamLog::new(Database::in_memory().unwrap()));
        let stream = EventStream::new(log, StreamKind::Notification);
        stream.ensure_group("g").await.unwrap();

        let recorder = Arc::new(Recorder {
            fail_first: Mutex::new(fail_first),
            seen: Mutex::new(Vec::new()),
        });
        let consumer = StreamConsumer::new(
            stream.clone(),
            recorder.clone(),
            "g",
            "c1",
            timings(),
            Arc::new(Metrics::new(&prometheus::Registry::new()).unwrap()),
        );
        (stream, recorder, consumer)
    }

    fn note(deal_id: i64) -> NotificationEvent {
        NotificationEvent {
            deal_id,
            user_id: 1,
            kind: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_is_acked() {
        let (stream, recorder, consumer) = setup(0).await;
        stream.push(&note(1)).await.unwrap();
        stream.push(&note(2)).await.unwrap();

        assert_eq!(consumer.poll_once().await.unwrap(), 2);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(stream.pending_count("g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_stays_pending_and_is_reclaimed() {
        let (stream, recorder, consumer) = setup(1).await;
        stream.push(&note(7)).await.unwrap();

        assert_eq!(consumer.poll_once().await.unwrap(), 0);
        assert_eq!(stream.pending_count("g").await.unwrap(), 1);

        assert_eq!(consumer.reclaim_once().await.unwrap(), 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![7]);
        assert_eq!(stream.pending_count("g").await.unwrap(), 0);

        let snap = consumer.metrics.snapshot();
        assert_eq!(snap.entries_reclaimed, 1);
        assert_eq!(snap.entries_acked, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (stream, recorder, consumer) = setup(0).await;
        stream.push(&note(3)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(cancel.clone()));

        for _ in 0..100 {
            if !recorder.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec![3]);
    }
}
