// src/services/history.rs
//! Monthly rollup of archived trips.
//!
//! - `seed` builds a bucket from its first trip (never a zero-trip bucket).
//! - `merge` folds one more trip in: fixed-point sums (`Milli`), plus a
//!   monotonic max for speed.
//! - `recompute` rebuilds a bucket from its full archived set; incremental
//!   merging in any order must land on the same state.

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::model::{Datestamp, Milli, MonthlyHistorySummary, TripSummary};
use crate::services::store::{self, Store};
use crate::utils::LogSink;

pub struct HistoryAggregator {
    sink: Arc<dyn LogSink>,
}

impl HistoryAggregator {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// First trip of a month: totals come straight from the trip.
    pub fn seed(datestamp: Datestamp, trip: &TripSummary) -> MonthlyHistorySummary {
        MonthlyHistorySummary {
            datestamp,
            total_trips: 1,
            total_distance: Milli::from_f64(trip.distance),
            total_duration: Milli::from_f64(trip.duration),
            highest_speed: trip.max_speed,
            total_smoothness: Milli::from_f64(trip.score_smoothness),
            total_acceleration: Milli::from_f64(trip.score_acceleration),
            total_deceleration: Milli::from_f64(trip.score_deceleration),
            total_distractions: Milli::ZERO,
        }
    }

    pub fn merge(bucket: &mut MonthlyHistorySummary, trip: &TripSummary) {
        bucket.total_trips += 1;
        bucket.total_distance += Milli::from_f64(trip.distance);
        bucket.total_duration += Milli::from_f64(trip.duration);
        bucket.highest_speed = bucket.highest_speed.max(trip.max_speed);
        bucket.total_smoothness += Milli::from_f64(trip.score_smoothness);
        bucket.total_acceleration += Milli::from_f64(trip.score_acceleration);
        bucket.total_deceleration += Milli::from_f64(trip.score_deceleration);
    }

    /// Seed-or-merge in one step.
    pub fn fold(
        bucket: Option<MonthlyHistorySummary>,
        datestamp: &Datestamp,
        trip: &TripSummary,
    ) -> MonthlyHistorySummary {
        match bucket {
            Some(mut b) => {
                Self::merge(&mut b, trip);
                b
            }
            None => Self::seed(datestamp.clone(), trip),
        }
    }

    /// Bucket state from scratch. `None` when `trips` is empty.
    pub fn recompute<'a>(
        datestamp: &Datestamp,
        trips: impl IntoIterator<Item = &'a TripSummary>,
    ) -> Option<MonthlyHistorySummary> {
        trips
            .into_iter()
            .fold(None, |acc, trip| Some(Self::fold(acc, datestamp, trip)))
    }

    /// Recompute a stored bucket from its archived trips without writing.
    /// `NotFound` when the month has no archived trips.
    pub fn recompute_month(
        &self,
        store: &Store,
        datestamp: &Datestamp,
    ) -> CoreResult<MonthlyHistorySummary> {
        let archived = store.archived_trips(datestamp)?;
        let out = Self::recompute(datestamp, archived.iter().map(|a| &a.trip))
            .ok_or_else(|| CoreError::not_found("history month", datestamp))?;
        self.sink.record(
            "history.recompute_month",
            &format!("{} recomputed from {} trips", datestamp, out.total_trips),
        );
        Ok(out)
    }

    /// Recompute and overwrite the stored totals, atomically.
    pub fn repair_month(
        &self,
        store: &Store,
        datestamp: &Datestamp,
    ) -> CoreResult<MonthlyHistorySummary> {
        let (before, after) = store.write(|tx| {
            let before = store::select_month(tx, datestamp)?;
            let archived = store::select_archived_trips(tx, datestamp)?;
            let after = Self::recompute(datestamp, archived.iter().map(|a| &a.trip))
                .ok_or_else(|| CoreError::not_found("history month", datestamp))?;
            store::upsert_month(tx, &after)?;
            Ok((before, after))
        })?;
        let changed = before.as_ref() != Some(&after);
        self.sink.record(
            "history.repair_month",
            &format!(
                "{} repaired ({} trips, {})",
                datestamp,
                after.total_trips,
                if changed { "totals rewritten" } else { "already consistent" }
            ),
        );
        Ok(after)
    }
}
