// src/utils/logbook.rs
//! Telemetry sink for the core: `record(module, message)`.
//!
//! - Fire-and-forget: a sink never blocks on anything but a local append and
//!   never reports failure to the caller.
//! - `Logbook` writes JSONL under `<root>/logbook/`; `TracingSink` only emits
//!   `tracing` events.

use chrono::Utc;
use serde::Serialize;
use std::{fs, io::Write, path::PathBuf, sync::Mutex};

use crate::config::CoreConfig;

pub trait LogSink: Send + Sync {
    fn record(&self, module: &str, message: &str);
}

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: String,
    module: &'a str,
    message: &'a str,
}

/// Append-only JSONL logbook. Writes are serialized through a mutex so lines
/// from different threads never interleave.
#[derive(Debug)]
pub struct Logbook {
    path: PathBuf,
    enabled: bool,
    lock: Mutex<()>,
}

impl Logbook {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(cfg: &CoreConfig) -> Self {
        Self {
            path: cfg.logbook.events.clone(),
            enabled: cfg.services.logbook_enabled,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn append(&self, line: &LogLine<'_>) {
        let Ok(json) = serde_json::to_string(line) else {
            return;
        };
        // A poisoned lock only means another writer panicked mid-append.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(mut f) = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            let _ = writeln!(f, "{}", json);
        }
    }
}

impl LogSink for Logbook {
    fn record(&self, module: &str, message: &str) {
        tracing::debug!(module, "{message}");
        if !self.enabled {
            return;
        }
        self.append(&LogLine {
            timestamp: Utc::now().to_rfc3339(),
            module,
            message,
        });
    }
}

/// Sink that forwards to `tracing` only; handy for tools and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, module: &str, message: &str) {
        tracing::info!(module, "{message}");
    }
}
