// src/services/summarizer.rs
//! Journal -> trips.
//!
//! Unprocessed journal entries are split wherever two neighbours sit more than
//! `separator_secs` apart. Each closed segment becomes one `TripSummary`; its
//! rows are copied into the trip journal and flagged processed in the same
//! transaction. The last segment stays open while it may still be growing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::TripsConfig;
use crate::error::CoreResult;
use crate::model::{JournalEntry, LatLng, TripSummary};
use crate::services::store::Store;
use crate::utils::LogSink;
use crate::utils::geo::{haversine_m, round_to};

// Ten years; keeps the gap inside chrono's range.
const MAX_SEPARATOR_SECS: u64 = 315_360_000;

/// Reverse geocoding collaborator. Must answer synchronously; "" when unknown.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, position: LatLng) -> String;
}

/// Leaves every address empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAddresses;

impl AddressResolver for NoAddresses {
    fn resolve(&self, _position: LatLng) -> String {
        String::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessReport {
    pub trips: Vec<TripSummary>,
    /// Entries in closed segments too short to be a trip.
    pub discarded: usize,
    /// Entries left for the next pass (open segment).
    pub pending: usize,
    pub notes: Vec<String>,
}

pub struct TripSummarizer {
    cfg: TripsConfig,
    resolver: Arc<dyn AddressResolver>,
    sink: Arc<dyn LogSink>,
}

impl TripSummarizer {
    pub fn new(
        cfg: TripsConfig,
        resolver: Arc<dyn AddressResolver>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self { cfg, resolver, sink }
    }

    fn separator(&self) -> Duration {
        Duration::seconds(self.cfg.separator_secs.min(MAX_SEPARATOR_SECS) as i64)
    }

    /// Split an ascending entry run into gap-separated segments.
    pub fn segment<'a>(&self, entries: &'a [JournalEntry]) -> Vec<&'a [JournalEntry]> {
        let gap = self.separator();
        let mut out = Vec::new();
        let mut start = 0;
        for i in 1..entries.len() {
            if entries[i].timestamp - entries[i - 1].timestamp > gap {
                out.push(&entries[start..i]);
                start = i;
            }
        }
        if start < entries.len() {
            out.push(&entries[start..]);
        }
        out
    }

    /// Summarize one ascending segment. `None` for an empty slice.
    pub fn summarize(&self, entries: &[JournalEntry]) -> Option<TripSummary> {
        let first = entries.first()?;
        let last = entries.last()?;

        let distance: f64 = entries
            .windows(2)
            .map(|w| haversine_m(w[0].position(), w[1].position()))
            .sum();
        let max_speed = entries.iter().map(|e| e.speed).fold(0.0_f64, f64::max);

        // m/s^2 between neighbours; zero-length intervals carry no signal.
        let accels: Vec<f64> = entries
            .windows(2)
            .filter_map(|w| {
                let dt = (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0;
                (dt > 0.0).then(|| (w[1].speed - w[0].speed) / dt)
            })
            .collect();
        let hard_accels = accels.iter().filter(|a| **a > self.cfg.hard_acceleration).count();
        let hard_brakes = accels.iter().filter(|a| **a < -self.cfg.hard_deceleration).count();
        let smoothness = if accels.len() < 2 {
            0.0
        } else {
            let jerk: f64 = accels.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
            round_to(jerk / (accels.len() - 1) as f64, 2)
        };

        Some(TripSummary {
            origination_timestamp: first.timestamp,
            origination: first.position(),
            origination_address: self.resolver.resolve(first.position()),
            destination_timestamp: last.timestamp,
            destination: last.position(),
            destination_address: self.resolver.resolve(last.position()),
            max_speed,
            duration: (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0,
            distance,
            score_acceleration: hard_accels as f64,
            score_deceleration: hard_brakes as f64,
            score_smoothness: smoothness,
            archived: false,
        })
    }

    /// Turn closed journal segments into stored trips.
    pub fn process_journal(&self, store: &Store, now: DateTime<Utc>) -> CoreResult<ProcessReport> {
        let entries = store.unprocessed_journal()?;
        let mut report = ProcessReport::default();
        let segments = self.segment(&entries);
        let count = segments.len();

        for (idx, seg) in segments.into_iter().enumerate() {
            let is_last = idx + 1 == count;
            let still_open = seg
                .last()
                .map(|e| now - e.timestamp <= self.separator())
                .unwrap_or(false);
            if is_last && still_open {
                report.pending = seg.len();
                continue;
            }

            if seg.len() < self.cfg.min_entries {
                store.discard_entries(seg)?;
                report.discarded += seg.len();
                continue;
            }

            let Some(trip) = self.summarize(seg) else {
                continue;
            };
            match store.record_trip(&trip, seg) {
                Ok(()) => {
                    self.sink.record(
                        "summarizer.process_journal",
                        &format!(
                            "trip {} -> {}: {} entries, {:.0} m, {:.0} s",
                            trip.origination_timestamp.to_rfc3339(),
                            trip.destination_timestamp.to_rfc3339(),
                            seg.len(),
                            trip.distance,
                            trip.duration
                        ),
                    );
                    report.trips.push(trip);
                }
                Err(e) if e.is_duplicate() => {
                    // Same origination as an existing trip; keep the first one.
                    store.discard_entries(seg)?;
                    report.discarded += seg.len();
                    report.notes.push(format!(
                        "trip {} already recorded; segment discarded",
                        trip.origination_timestamp.to_rfc3339()
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}
