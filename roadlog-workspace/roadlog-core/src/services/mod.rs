// src/services/mod.rs

pub mod buffer;      // fixed-capacity pre-trip window
pub mod detector;    // threshold state machine; writes the journal
pub mod journal;     // append-only journal contract
pub mod store;       // the ONLY SQLite writer
pub mod summarizer;  // journal segments -> trips
pub mod archiver;    // trips -> monthly history, once each
pub mod history;     // monthly totals: seed, merge, recompute
pub mod ingest;      // channel pump in front of the detector

// Public API
pub use archiver::{ArchiveReport, TripArchiver};
pub use buffer::SampleBuffer;
pub use detector::{DetectorState, FixOutcome, TripDetector};
pub use history::HistoryAggregator;
pub use ingest::{IngestTally, spawn_ingest};
pub use journal::JournalStore;
pub use store::{Store, StoreStats};
pub use summarizer::{AddressResolver, NoAddresses, ProcessReport, TripSummarizer};
