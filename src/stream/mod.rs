//! Reliable Event Stream Module
//!
//! A log-structured, consumer-group based bus with at-least-once delivery:
//! - `types`: entry ids, field maps, typed event codec
//! - `log`: the durable log trait
//! - `sqlite`: log on the shared SQLite database
//! - `stream`: typed `EventStream<E>` (push / read / ack / reclaim / trim)
//! - `consumer`: the read + reclaim + trim loop template
//! - `events`: the logical streams and their event types

pub mod consumer;
pub mod events;
pub mod log;
pub mod sqlite;
#[allow(clippy::module_inception)]
pub mod stream;
pub mod types;

// Re-exports for convenience
pub use consumer::{StreamConsumer, StreamHandler};
pub use events::{EscrowDepositEvent, NotificationEvent, StreamKind};
pub use log::StreamLog;
pub use sqlite::SqliteStreamLog;
pub use stream::EventStream;
pub use types::{EntryId, FieldMap, StreamEntry, StreamError, StreamEvent};
