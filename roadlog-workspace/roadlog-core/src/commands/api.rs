// src/commands/api.rs
use std::io::BufRead;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commands::init::ensure_initialized;
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::model::{ArchiveOutcome, Datestamp, MonthlyHistorySummary, RawFix};
use crate::services::{
    AddressResolver, ArchiveReport, FixOutcome, HistoryAggregator, IngestTally, JournalStore,
    NoAddresses, ProcessReport, Store, StoreStats, TripArchiver, TripDetector, TripSummarizer,
    spawn_ingest,
};
use crate::utils::{LogSink, Logbook};

/// One handle over the store and every service that writes to it.
pub struct Commands {
    cfg: CoreConfig,
    store: Arc<Store>,
    sink: Arc<dyn LogSink>,
    detector: Mutex<TripDetector>,
    summarizer: TripSummarizer,
    archiver: TripArchiver,
    history: HistoryAggregator,
}

/// Result of feeding a JSONL file of fixes through the detector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub lines: usize,
    /// Lines that were not a parseable fix; skipped.
    pub malformed: usize,
    pub received: usize,
    pub rejected: usize,
    pub persisted: usize,
    pub failed: usize,
}

impl Commands {
    /// Initialize `root` if needed, load its config and open the store.
    pub fn open(root: &Path) -> Result<Self> {
        let report = ensure_initialized(root)?;
        let cfg = CoreConfig::load(&report.root)?;
        let store = Store::open(&cfg.store.db_path)
            .with_context(|| format!("opening store {}", cfg.store.db_path.display()))?;
        let sink: Arc<dyn LogSink> = Arc::new(Logbook::from_config(&cfg));
        Ok(Self::from_parts(cfg, Arc::new(store), sink, Arc::new(NoAddresses)))
    }

    pub fn from_parts(
        cfg: CoreConfig,
        store: Arc<Store>,
        sink: Arc<dyn LogSink>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        let detector = TripDetector::new(&cfg.tracking, Arc::clone(&sink));
        Self {
            summarizer: TripSummarizer::new(cfg.trips.clone(), resolver, Arc::clone(&sink)),
            archiver: TripArchiver::new(Arc::clone(&sink)),
            history: HistoryAggregator::new(Arc::clone(&sink)),
            detector: Mutex::new(detector),
            store,
            sink,
            cfg,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn detector(&self) -> MutexGuard<'_, TripDetector> {
        self.detector.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- ingestion -------------------------------------------------------

    pub fn detect_and_record(&self, fix: &RawFix) -> FixOutcome {
        self.detector().detect_and_record(self.store.as_ref(), fix)
    }

    /// Feed one JSON `RawFix` per line through the ingest pump.
    /// Blank lines are ignored; malformed lines are counted and skipped.
    pub fn ingest_lines(&self, reader: impl BufRead) -> Result<IngestReport> {
        let mut guard = self.detector();
        let fresh = TripDetector::new(&self.cfg.tracking, Arc::clone(&self.sink));
        let detector = std::mem::replace(&mut *guard, fresh);

        let (tx, rx) = crossbeam_channel::bounded::<RawFix>(256);
        let journal: Arc<dyn JournalStore> = self.store.clone();
        let pump = spawn_ingest(detector, journal, rx);

        let mut report = IngestReport::default();
        let mut read_err = None;
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    read_err = Some(e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            report.lines += 1;
            match serde_json::from_str::<RawFix>(&line) {
                Ok(fix) => {
                    if tx.send(fix).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    report.malformed += 1;
                    tracing::warn!(line = report.lines, "skipping malformed fix: {e}");
                }
            }
        }
        drop(tx);

        let (detector, tally) = pump
            .join()
            .map_err(|_| anyhow!("ingest thread panicked"))?;
        *guard = detector;
        if let Some(e) = read_err {
            return Err(e).context("reading fixes");
        }

        let IngestTally {
            received,
            rejected,
            persisted,
            failed,
        } = tally;
        report.received = received;
        report.rejected = rejected;
        report.persisted = persisted;
        report.failed = failed;
        self.sink.record(
            "commands.ingest",
            &format!(
                "{} lines, {} malformed, {} persisted, {} failed",
                report.lines, report.malformed, report.persisted, report.failed
            ),
        );
        Ok(report)
    }

    // ---- trips and history -----------------------------------------------

    pub fn process_journal(&self) -> CoreResult<ProcessReport> {
        self.process_journal_at(Utc::now())
    }

    /// Same as `process_journal`, with an explicit "now".
    pub fn process_journal_at(&self, now: DateTime<Utc>) -> CoreResult<ProcessReport> {
        self.summarizer.process_journal(&self.store, now)
    }

    pub fn archive_trip(&self, origination: DateTime<Utc>) -> CoreResult<ArchiveOutcome> {
        self.archiver.archive(&self.store, origination)
    }

    pub fn archive_pending(&self) -> CoreResult<ArchiveReport> {
        self.archiver.archive_pending(&self.store)
    }

    pub fn recompute_month(&self, datestamp: &Datestamp) -> CoreResult<MonthlyHistorySummary> {
        self.history.recompute_month(&self.store, datestamp)
    }

    pub fn repair_month(&self, datestamp: &Datestamp) -> CoreResult<MonthlyHistorySummary> {
        self.history.repair_month(&self.store, datestamp)
    }

    pub fn history(&self) -> CoreResult<Vec<MonthlyHistorySummary>> {
        self.store.months()
    }

    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.store.stats()
    }

    pub fn count_journal(&self) -> CoreResult<usize> {
        self.store.count()
    }
}
