// src/services/detector.rs
//! Speed-threshold trip detector.
//!
//! Per fix, in delivery order, single writer:
//!   invalid            -> dropped, logged, no state change
//!   speed <  threshold -> buffered (pre-trip context), armed
//!   speed >= threshold -> if armed: flush the buffer oldest-first into the
//!                         journal and restart the cadence counter; then count
//!                         the fix and persist every `sample_rate`-th one
//!
//! Journal writes during a flush are at-least-once: a failed append is logged
//! and skipped, entries already written stay written.

use std::sync::Arc;

use serde::Serialize;

use crate::config::TrackingConfig;
use crate::model::{JournalEntry, RawFix};
use crate::services::buffer::SampleBuffer;
use crate::services::journal::JournalStore;
use crate::utils::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    /// Nothing seen yet.
    Idle,
    /// Last valid fix was below the threshold and sits in the buffer.
    Armed,
    /// At/above the threshold.
    InTrip,
}

/// What a single fix did. Only for observation; no error escapes `detect_and_record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FixOutcome {
    Rejected,
    Buffered,
    /// Threshold crossed upward: buffered context went to the journal.
    /// `recorded` is `None` when the crossing fix was not due on the cadence,
    /// `Some(false)` when it was due but its append failed.
    Flushed {
        persisted: usize,
        failed: usize,
        recorded: Option<bool>,
    },
    /// In-trip fix persisted on the cadence.
    Recorded,
    /// In-trip fix counted but not persisted.
    Counted,
    /// In-trip fix due for persistence, but the append failed.
    RecordFailed,
}

pub struct TripDetector {
    threshold: f64,
    sample_rate: u32,
    buffer: SampleBuffer,
    armed: bool,
    counter: u32,
    state: DetectorState,
    sink: Arc<dyn LogSink>,
}

impl TripDetector {
    pub fn new(cfg: &TrackingConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            threshold: cfg.speed_threshold,
            sample_rate: cfg.sample_rate.max(1),
            buffer: SampleBuffer::with_capacity(cfg.buffer_capacity),
            armed: false,
            counter: 0,
            state: DetectorState::Idle,
            sink,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn buffered(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Consume one fix. Persistence errors are logged, never returned.
    pub fn detect_and_record(&mut self, journal: &dyn JournalStore, fix: &RawFix) -> FixOutcome {
        if let Err(e) = fix.validate() {
            self.sink.record("detector.ingest", &format!("dropped fix: {e}"));
            return FixOutcome::Rejected;
        }

        if fix.speed < self.threshold {
            self.buffer.push(fix.into());
            self.armed = true;
            self.state = DetectorState::Armed;
            return FixOutcome::Buffered;
        }

        let flushed = if self.armed {
            let (persisted, failed) = self.flush(journal);
            self.armed = false;
            self.counter = 0;
            Some((persisted, failed))
        } else {
            None
        };
        self.state = DetectorState::InTrip;

        self.counter += 1;
        let due = self.counter >= self.sample_rate;
        let recorded = if due {
            self.counter = 0;
            Some(self.persist(journal, JournalEntry::from(fix), "detector.record"))
        } else {
            None
        };

        match (flushed, recorded) {
            (Some((persisted, failed)), recorded) => FixOutcome::Flushed {
                persisted,
                failed,
                recorded,
            },
            (None, Some(true)) => FixOutcome::Recorded,
            (None, Some(false)) => FixOutcome::RecordFailed,
            (None, None) => FixOutcome::Counted,
        }
    }

    /// Drain the buffer oldest-first into the journal. Returns (persisted, failed).
    fn flush(&mut self, journal: &dyn JournalStore) -> (usize, usize) {
        let drained = self.buffer.drain_ascending();
        let total = drained.len();
        let mut persisted = 0;
        for sample in drained {
            if self.persist(journal, sample.into(), "detector.flush") {
                persisted += 1;
            }
        }
        let failed = total - persisted;
        self.sink.record(
            "detector.flush",
            &format!("flushed {persisted} of {total} buffered samples at trip start"),
        );
        (persisted, failed)
    }

    fn persist(&self, journal: &dyn JournalStore, entry: JournalEntry, module: &str) -> bool {
        match journal.append(&entry) {
            Ok(()) => true,
            Err(e) if e.is_duplicate() => {
                self.sink.record(
                    module,
                    &format!("skipped duplicate sample {}", entry.timestamp.to_rfc3339()),
                );
                false
            }
            Err(e) => {
                self.sink.record(
                    module,
                    &format!("failed to persist sample {}: {e}", entry.timestamp.to_rfc3339()),
                );
                false
            }
        }
    }
}
