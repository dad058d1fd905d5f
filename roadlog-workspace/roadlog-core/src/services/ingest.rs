// src/services/ingest.rs
//! Single-consumer fix pump.
//!
//! Producers push `RawFix`es into a crossbeam channel; one thread owns the
//! detector and applies them in channel order. The detector is handed back
//! when every sender has been dropped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;

use crate::model::RawFix;
use crate::services::detector::{FixOutcome, TripDetector};
use crate::services::journal::JournalStore;

/// Counts kept by the pump, returned with the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestTally {
    pub received: usize,
    pub rejected: usize,
    pub persisted: usize,
    pub failed: usize,
}

impl IngestTally {
    pub fn observe(&mut self, outcome: FixOutcome) {
        self.received += 1;
        match outcome {
            FixOutcome::Rejected => self.rejected += 1,
            FixOutcome::Buffered | FixOutcome::Counted => {}
            FixOutcome::Flushed {
                persisted,
                failed,
                recorded,
            } => {
                self.persisted += persisted + usize::from(recorded == Some(true));
                self.failed += failed + usize::from(recorded == Some(false));
            }
            FixOutcome::Recorded => self.persisted += 1,
            FixOutcome::RecordFailed => self.failed += 1,
        }
    }
}

/// Drain `rx` on a dedicated thread until it disconnects.
pub fn spawn_ingest(
    mut detector: TripDetector,
    journal: Arc<dyn JournalStore>,
    rx: Receiver<RawFix>,
) -> JoinHandle<(TripDetector, IngestTally)> {
    thread::spawn(move || {
        let mut tally = IngestTally::default();
        for fix in rx.iter() {
            let outcome = detector.detect_and_record(journal.as_ref(), &fix);
            tally.observe(outcome);
        }
        tracing::debug!(
            received = tally.received,
            persisted = tally.persisted,
            "ingest channel closed"
        );
        (detector, tally)
    })
}
