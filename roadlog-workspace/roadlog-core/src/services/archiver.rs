// src/services/archiver.rs
//! TripArchiver: move a finished trip into its monthly bucket, once.
//!
//! One IMMEDIATE transaction per trip:
//!   lookup trip -> already in bucket? -> copy trip + journal -> seed/merge
//!   totals -> flag source trip archived -> commit
//! Any failure rolls the whole unit back, so a bucket is never half-updated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::model::ArchiveOutcome;
use crate::services::history::HistoryAggregator;
use crate::services::store::{self, Store};
use crate::utils::LogSink;

/// Result of an `archive_pending` sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub archived: usize,
    pub already_archived: usize,
    pub failed: usize,
    pub notes: Vec<String>,
}

pub struct TripArchiver {
    sink: Arc<dyn LogSink>,
}

impl TripArchiver {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Archive the trip that started at `origination`.
    ///
    /// - `NotFound` when no current trip has that origination timestamp.
    /// - `Ok(AlreadyArchived)` when the target bucket already holds a trip with
    ///   that origination timestamp, or the source trip is already flagged.
    /// - `Persistence` when the commit fails; nothing was changed.
    pub fn archive(&self, store: &Store, origination: DateTime<Utc>) -> CoreResult<ArchiveOutcome> {
        const MODULE: &str = "archiver.archive";

        let result = store.write(|tx| {
            let trip = store::select_trip(tx, origination)?
                .ok_or_else(|| CoreError::not_found("trip", origination.to_rfc3339()))?;
            let datestamp = trip.datestamp();

            if store::history_contains(tx, &datestamp, origination)? || trip.archived {
                return Ok((ArchiveOutcome::AlreadyArchived, datestamp, None));
            }

            let journal = store::select_trip_journal(tx, origination)?;
            let bucket = store::select_month(tx, &datestamp)?;
            let created = bucket.is_none();
            let bucket = HistoryAggregator::fold(bucket, &datestamp, &trip);

            store::insert_archived_trip(tx, &datestamp, &trip, &journal)?;
            store::upsert_month(tx, &bucket)?;
            store::set_trip_archived(tx, origination)?;
            Ok((ArchiveOutcome::Archived, datestamp, Some((created, journal.len(), bucket))))
        });

        match result {
            Ok((ArchiveOutcome::AlreadyArchived, datestamp, _)) => {
                self.sink.record(
                    MODULE,
                    &format!(
                        "trip {} already exists in history {}",
                        origination.to_rfc3339(),
                        datestamp
                    ),
                );
                Ok(ArchiveOutcome::AlreadyArchived)
            }
            Ok((outcome, datestamp, detail)) => {
                if let Some((created, rows, bucket)) = detail {
                    self.sink.record(
                        MODULE,
                        &format!(
                            "copied trip {} ({} journal rows) into {}{}; month now {} trips",
                            origination.to_rfc3339(),
                            rows,
                            datestamp,
                            if created { " (new month)" } else { "" },
                            bucket.total_trips
                        ),
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                self.sink.record(
                    MODULE,
                    &format!("archive of trip {} failed: {}", origination.to_rfc3339(), e),
                );
                Err(e)
            }
        }
    }

    /// Archive every trip still flagged `archived = false`, oldest first.
    /// Failures are counted and noted; the sweep continues.
    pub fn archive_pending(&self, store: &Store) -> CoreResult<ArchiveReport> {
        let mut report = ArchiveReport::default();
        for trip in store.pending_trips()? {
            match self.archive(store, trip.origination_timestamp) {
                Ok(ArchiveOutcome::Archived) => report.archived += 1,
                Ok(ArchiveOutcome::AlreadyArchived) => report.already_archived += 1,
                Err(e) => {
                    report.failed += 1;
                    report.notes.push(format!(
                        "{}: {}",
                        trip.origination_timestamp.to_rfc3339(),
                        e
                    ));
                }
            }
        }
        tracing::info!(
            archived = report.archived,
            already = report.already_archived,
            failed = report.failed,
            "archive sweep finished"
        );
        Ok(report)
    }
}
