use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub trips: TripsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logbook: LogbookConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl CoreConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<CoreConfig>(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using CoreConfig::default().",
                path.display()
            );
            CoreConfig::default()
        };
        cfg.validate()
            .with_context(|| format!("validating config file {}", path.display()))?;
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.tracking.validate()?;
        self.trips.validate()
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.store.db_path = absolutize(root, &self.store.db_path);
        self.logbook.path = absolutize(root, &self.logbook.path);
        self.logbook.events = absolutize(root, &self.logbook.events);
    }
}

/// Detector knobs: the speed threshold, the in-trip cadence and the pre-trip window.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// m/s, inclusive.
    #[serde(default = "TrackingConfig::default_speed_threshold")]
    pub speed_threshold: f64,
    /// Persist every Nth fix while at/above the threshold.
    #[serde(default = "TrackingConfig::default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "TrackingConfig::default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl TrackingConfig {
    fn default_speed_threshold() -> f64 {
        5.0
    }

    fn default_sample_rate() -> u32 {
        5
    }

    // Keep at or below the number of fixes seen inside one trip separator.
    fn default_buffer_capacity() -> usize {
        12
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.speed_threshold.is_finite() && self.speed_threshold >= 0.0,
            "tracking.speed_threshold must be a non-negative number, got {}",
            self.speed_threshold
        );
        anyhow::ensure!(self.sample_rate >= 1, "tracking.sample_rate must be >= 1");
        anyhow::ensure!(
            self.buffer_capacity >= 1,
            "tracking.buffer_capacity must be >= 1"
        );
        Ok(())
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            speed_threshold: Self::default_speed_threshold(),
            sample_rate: Self::default_sample_rate(),
            buffer_capacity: Self::default_buffer_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripsConfig {
    /// A journal gap longer than this splits two trips.
    #[serde(default = "TripsConfig::default_separator_secs")]
    pub separator_secs: u64,
    #[serde(default = "TripsConfig::default_min_entries")]
    pub min_entries: usize,
    /// m/s^2
    #[serde(default = "TripsConfig::default_hard_acceleration")]
    pub hard_acceleration: f64,
    /// m/s^2, compared against the magnitude of a slowdown
    #[serde(default = "TripsConfig::default_hard_deceleration")]
    pub hard_deceleration: f64,
}

impl TripsConfig {
    fn default_separator_secs() -> u64 {
        300
    }

    fn default_min_entries() -> usize {
        2
    }

    fn default_hard_acceleration() -> f64 {
        3.0
    }

    fn default_hard_deceleration() -> f64 {
        3.0
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.separator_secs >= 1, "trips.separator_secs must be >= 1");
        anyhow::ensure!(self.min_entries >= 1, "trips.min_entries must be >= 1");
        anyhow::ensure!(
            self.hard_acceleration > 0.0 && self.hard_deceleration > 0.0,
            "trips.hard_acceleration and trips.hard_deceleration must be positive"
        );
        Ok(())
    }
}

impl Default for TripsConfig {
    fn default() -> Self {
        Self {
            separator_secs: Self::default_separator_secs(),
            min_entries: Self::default_min_entries(),
            hard_acceleration: Self::default_hard_acceleration(),
            hard_deceleration: Self::default_hard_deceleration(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "StoreConfig::default_db_path")]
    pub db_path: PathBuf,
}

impl StoreConfig {
    fn default_db_path() -> PathBuf {
        PathBuf::from("db/journal.db")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogbookConfig {
    #[serde(default = "LogbookConfig::default_path")]
    pub path: PathBuf,
    #[serde(default = "LogbookConfig::default_events")]
    pub events: PathBuf,
}

impl LogbookConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("logbook")
    }

    fn default_events() -> PathBuf {
        PathBuf::from("logbook/events.jsonl")
    }
}

impl Default for LogbookConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            events: Self::default_events(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "ServicesConfig::default_true")]
    pub logbook_enabled: bool,
}

impl ServicesConfig {
    fn default_true() -> bool {
        true
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            logbook_enabled: true,
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}
