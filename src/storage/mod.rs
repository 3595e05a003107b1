//! Storage Layer Module
//!
//! One SQLite database backs the deal table, the action lock table, the
//! watch keys and the durable event stream log. Stores hold a cheap clone of [`Database`] and
//! borrow pooled connections per call.

pub mod error;
pub mod sqlite;

// Re-exports for convenience
pub use error::{StorageError, StorageResult};
pub use sqlite::Database;
