// src/services/journal.rs
//! Append-only GPS journal contract.
//!
//! `Store` is the SQLite implementation; the detector only sees this trait so
//! callers can hand it any backend (tests use in-memory doubles).

use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::model::JournalEntry;

pub trait JournalStore: Send + Sync {
    /// Insert a new entry. `DuplicateKey` if its timestamp is already present.
    fn append(&self, entry: &JournalEntry) -> CoreResult<()>;

    /// Entries with `start <= timestamp <= end`, ascending.
    fn list_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<JournalEntry>>;

    /// Set `processed`. `NotFound` if no entry has this timestamp.
    fn mark_processed(&self, timestamp: DateTime<Utc>) -> CoreResult<()>;

    fn count(&self) -> CoreResult<usize>;
}
