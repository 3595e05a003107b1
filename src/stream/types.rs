//! Stream Entry Types
//!
//! Entries carry a string-keyed field map. Numbers are decimal strings on
//! the wire; a missing or unparseable field reads back as zero/empty rather
//! than failing the whole entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::storage::StorageError;

/// Field map of one entry
pub type FieldMap = BTreeMap<String, String>;

/// Stream errors
#[derive(Debug, Error)]
pub enum StreamError {
    /// Consumer group was never created
    #[error("No such consumer group: {group} on {stream}")]
    NoGroup { stream: String, group: String },

    #[error("Invalid entry id: {0}")]
    InvalidId(String),

    #[error("Corrupt entry {id}: {reason}")]
    CorruptEntry { id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Log-assigned entry id, `<millis>-<seq>`, strictly increasing per stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EntryId {
    pub millis: u64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Next id for an append at wall-clock `now_millis`
    pub fn next_after(last: EntryId, now_millis: u64) -> EntryId {
        if now_millis > last.millis {
            EntryId::new(now_millis, 0)
        } else {
            EntryId::new(last.millis, last.seq + 1)
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (millis, seq) = s
            .split_once('-')
            .ok_or_else(|| StreamError::InvalidId(s.to_string()))?;
        Ok(Self {
            millis: millis.parse().map_err(|_| StreamError::InvalidId(s.to_string()))?,
            seq: seq.parse().map_err(|_| StreamError::InvalidId(s.to_string()))?,
        })
    }
}

/// One delivered entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: FieldMap,
}

/// A typed event carried on a stream
pub trait StreamEvent: Send + Sync + Sized + 'static {
    fn to_fields(&self) -> FieldMap;

    /// Never fails; bad fields degrade to defaults
    fn from_fields(fields: &FieldMap) -> Self;
}

/// String field, empty when missing
pub fn field_str(fields: &FieldMap, name: &str) -> String {
    fields.get(name).cloned().unwrap_or_default()
}

/// Unsigned field, zero when missing or unparseable
pub fn field_u64(fields: &FieldMap, name: &str) -> u64 {
    fields
        .get(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Signed field, zero when missing or unparseable
pub fn field_i64(fields: &FieldMap, name: &str) -> i64 {
    fields
        .get(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}
