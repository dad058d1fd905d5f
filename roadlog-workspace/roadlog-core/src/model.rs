// src/model.rs
//! Record shapes read and written by the core.
//!
//! Ownership follows keys, not references:
//! - journal entries are keyed by `timestamp`,
//! - trips by `origination_timestamp` (their journal rows by `(trip, timestamp)`),
//! - monthly buckets by `Datestamp`, archived trips by `(datestamp, origination_timestamp)`.

use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// One fix as delivered by the location source. Speed is m/s; a negative or
/// non-finite speed means the source did not know it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
}

impl RawFix {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64, speed: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            speed,
        }
    }

    /// Reject fixes that must never be buffered or persisted.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(CoreError::InvalidSample(format!(
                "speed {} at {}",
                self.speed,
                self.timestamp.to_rfc3339()
            )));
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CoreError::InvalidSample(format!(
                "latitude {} at {}",
                self.latitude,
                self.timestamp.to_rfc3339()
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CoreError::InvalidSample(format!(
                "longitude {} at {}",
                self.longitude,
                self.timestamp.to_rfc3339()
            )));
        }
        Ok(())
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// Pre-trip context held by the sample buffer until a flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedSample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub processed: bool,
    pub annotation_code: String,
    pub note: String,
}

impl From<&RawFix> for BufferedSample {
    fn from(fix: &RawFix) -> Self {
        Self {
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed: fix.speed,
            processed: false,
            annotation_code: String::new(),
            note: String::new(),
        }
    }
}

/// A persisted GPS sample. Only `processed` changes after the write.
///
/// Timestamps are stored at millisecond precision; two fixes inside the same
/// millisecond collide on the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub processed: bool,
    pub annotation_code: String,
    pub note: String,
}

impl JournalEntry {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

impl From<BufferedSample> for JournalEntry {
    fn from(s: BufferedSample) -> Self {
        Self {
            timestamp: s.timestamp,
            latitude: s.latitude,
            longitude: s.longitude,
            speed: s.speed,
            processed: s.processed,
            annotation_code: s.annotation_code,
            note: s.note,
        }
    }
}

impl From<&RawFix> for JournalEntry {
    fn from(fix: &RawFix) -> Self {
        BufferedSample::from(fix).into()
    }
}

/// Derived summary of one trip. `archived` flips to true exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSummary {
    pub origination_timestamp: DateTime<Utc>,
    pub origination: LatLng,
    pub origination_address: String,
    pub destination_timestamp: DateTime<Utc>,
    pub destination: LatLng,
    pub destination_address: String,
    pub max_speed: f64,
    /// seconds
    pub duration: f64,
    /// meters
    pub distance: f64,
    pub score_acceleration: f64,
    pub score_deceleration: f64,
    pub score_smoothness: f64,
    pub archived: bool,
}

impl TripSummary {
    /// Month bucket this trip rolls into.
    pub fn datestamp(&self) -> Datestamp {
        Datestamp::from_timestamp(self.origination_timestamp)
    }
}

/// Year-month bucket key, `YYYY-MM`, UTC calendar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Datestamp(String);

impl Datestamp {
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts.format("%Y-%m").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Datestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let ok = s.len() == 7
            && NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").is_ok();
        if !ok {
            return Err(CoreError::InvalidSample(format!(
                "datestamp must be YYYY-MM, got {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Datestamp {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Datestamp> for String {
    fn from(d: Datestamp) -> Self {
        d.0
    }
}

impl fmt::Display for Datestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed-point amount in thousandths of its unit (mm, ms, milli-points).
///
/// Each trip value is rounded once on the way in; after that, sums are
/// integer adds, so a bucket's totals do not depend on merge order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Milli(i64);

impl Milli {
    pub const ZERO: Milli = Milli(0);

    /// Nearest thousandth. Non-finite input maps to zero.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::ZERO;
        }
        Self((value * 1000.0).round() as i64)
    }

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Add for Milli {
    type Output = Milli;

    fn add(self, rhs: Milli) -> Milli {
        Milli(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Milli {
    fn add_assign(&mut self, rhs: Milli) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Milli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_f64(), f)
    }
}

/// Running totals for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyHistorySummary {
    pub datestamp: Datestamp,
    pub total_trips: u32,
    /// meters
    pub total_distance: Milli,
    /// seconds
    pub total_duration: Milli,
    /// m/s; a max, not a sum
    pub highest_speed: f64,
    pub total_smoothness: Milli,
    pub total_acceleration: Milli,
    pub total_deceleration: Milli,
    pub total_distractions: Milli,
}

/// Immutable copy of a trip (and its journal) owned by a month bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTrip {
    pub datestamp: Datestamp,
    pub trip: TripSummary,
    pub journal: Vec<JournalEntry>,
}

/// What `archive` did with a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Archived,
    AlreadyArchived,
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
