// src/services/store.rs
//! Single-writer SQLite store for the journal, trips and monthly history.
//!
//! - Owns one SQLite connection (WAL) behind a mutex; `Store` is shared by
//!   reference or `Arc` and every statement runs on that connection.
//! - Multi-row changes go through [`Store::write`], an IMMEDIATE transaction:
//!   all rows commit or none do, and two writers of the same month bucket are
//!   serialized by the database lock.
//! - Timestamps are stored as epoch milliseconds so keys sort numerically.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::model::{
    ArchivedTrip, Datestamp, JournalEntry, LatLng, Milli, MonthlyHistorySummary, TripSummary,
    from_millis, to_millis,
};
use crate::services::journal::JournalStore;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

-- Raw GPS journal; the timestamp is the key.
CREATE TABLE IF NOT EXISTS gps_journal (
  timestamp_ms  INTEGER PRIMARY KEY,
  latitude      REAL    NOT NULL,
  longitude     REAL    NOT NULL,
  speed         REAL    NOT NULL,
  processed     INTEGER NOT NULL DEFAULT 0,
  codes         TEXT    NOT NULL DEFAULT '',
  note          TEXT    NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_journal_processed ON gps_journal(processed, timestamp_ms);

-- Current (not yet rolled up) trips.
CREATE TABLE IF NOT EXISTS trip_summaries (
  origination_ms       INTEGER PRIMARY KEY,
  origination_lat      REAL    NOT NULL,
  origination_lng      REAL    NOT NULL,
  origination_address  TEXT    NOT NULL,
  destination_ms       INTEGER NOT NULL,
  destination_lat      REAL    NOT NULL,
  destination_lng      REAL    NOT NULL,
  destination_address  TEXT    NOT NULL,
  max_speed            REAL    NOT NULL,
  duration             REAL    NOT NULL,
  distance             REAL    NOT NULL,
  score_acceleration   REAL    NOT NULL,
  score_deceleration   REAL    NOT NULL,
  score_smoothness     REAL    NOT NULL,
  archived             INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS trip_journal (
  trip_ms       INTEGER NOT NULL,
  timestamp_ms  INTEGER NOT NULL,
  latitude      REAL    NOT NULL,
  longitude     REAL    NOT NULL,
  speed         REAL    NOT NULL,
  codes         TEXT    NOT NULL,
  note          TEXT    NOT NULL,
  PRIMARY KEY (trip_ms, timestamp_ms)
);

-- Monthly buckets; rows are only ever created or incremented here.
CREATE TABLE IF NOT EXISTS history_months (
  datestamp           TEXT    PRIMARY KEY,  -- YYYY-MM
  total_trips         INTEGER NOT NULL,
  total_distance      INTEGER NOT NULL,  -- thousandths (mm)
  total_duration      INTEGER NOT NULL,  -- thousandths (ms)
  highest_speed       REAL    NOT NULL,
  total_smoothness    INTEGER NOT NULL,  -- thousandths
  total_acceleration  INTEGER NOT NULL,
  total_deceleration  INTEGER NOT NULL,
  total_distractions  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS history_trips (
  datestamp            TEXT    NOT NULL,
  origination_ms       INTEGER NOT NULL,
  origination_lat      REAL    NOT NULL,
  origination_lng      REAL    NOT NULL,
  origination_address  TEXT    NOT NULL,
  destination_ms       INTEGER NOT NULL,
  destination_lat      REAL    NOT NULL,
  destination_lng      REAL    NOT NULL,
  destination_address  TEXT    NOT NULL,
  max_speed            REAL    NOT NULL,
  duration             REAL    NOT NULL,
  distance             REAL    NOT NULL,
  score_acceleration   REAL    NOT NULL,
  score_deceleration   REAL    NOT NULL,
  score_smoothness     REAL    NOT NULL,
  PRIMARY KEY (datestamp, origination_ms)
);

CREATE TABLE IF NOT EXISTS history_trip_journal (
  datestamp     TEXT    NOT NULL,
  trip_ms       INTEGER NOT NULL,
  timestamp_ms  INTEGER NOT NULL,
  latitude      REAL    NOT NULL,
  longitude     REAL    NOT NULL,
  speed         REAL    NOT NULL,
  codes         TEXT    NOT NULL,
  note          TEXT    NOT NULL,
  PRIMARY KEY (datestamp, trip_ms, timestamp_ms)
);
"#;

const TRIP_COLS: &str = "origination_ms, origination_lat, origination_lng, origination_address, \
     destination_ms, destination_lat, destination_lng, destination_address, \
     max_speed, duration, distance, score_acceleration, score_deceleration, score_smoothness";

const MONTH_COLS: &str = "datestamp, total_trips, total_distance, total_duration, highest_speed, \
     total_smoothness, total_acceleration, total_deceleration, total_distractions";

/// Row counts across every table, for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub journal_entries: usize,
    pub unprocessed_entries: usize,
    pub trips: usize,
    pub unarchived_trips: usize,
    pub months: usize,
    pub archived_trips: usize,
}

pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open/create the database and ensure the schema.
    pub fn open(db_path: impl AsRef<Path>) -> CoreResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    /// Private in-memory database; nothing survives the handle.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> CoreResult<Self> {
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // SQLite state stays consistent even if a holder panicked; the open
        // transaction (if any) was rolled back when it dropped.
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` inside one IMMEDIATE transaction. Any error rolls everything back.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ---- journal ---------------------------------------------------------

    /// Unprocessed entries, ascending.
    pub fn unprocessed_journal(&self) -> CoreResult<Vec<JournalEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp_ms, latitude, longitude, speed, processed, codes, note
             FROM gps_journal WHERE processed = 0 ORDER BY timestamp_ms ASC",
        )?;
        let rows = stmt.query_map([], |row| journal_from_row(row))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark a run of entries processed without making a trip of them.
    pub fn discard_entries(&self, entries: &[JournalEntry]) -> CoreResult<()> {
        self.write(|tx| {
            for e in entries {
                mark_processed(tx, e.timestamp)?;
            }
            Ok(())
        })
    }

    // ---- trips -----------------------------------------------------------

    /// Persist a trip with its journal window and mark those entries processed.
    /// `DuplicateKey` if a trip with the same origination timestamp exists.
    pub fn record_trip(&self, trip: &TripSummary, entries: &[JournalEntry]) -> CoreResult<()> {
        self.write(|tx| {
            let inserted = tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO trip_summaries({TRIP_COLS}, archived)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    to_millis(trip.origination_timestamp),
                    trip.origination.latitude,
                    trip.origination.longitude,
                    trip.origination_address,
                    to_millis(trip.destination_timestamp),
                    trip.destination.latitude,
                    trip.destination.longitude,
                    trip.destination_address,
                    trip.max_speed,
                    trip.duration,
                    trip.distance,
                    trip.score_acceleration,
                    trip.score_deceleration,
                    trip.score_smoothness,
                    trip.archived,
                ],
            )?;
            if inserted == 0 {
                return Err(CoreError::duplicate(
                    "trip_summaries",
                    trip.origination_timestamp.to_rfc3339(),
                ));
            }
            let trip_ms = to_millis(trip.origination_timestamp);
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO trip_journal
                   (trip_ms, timestamp_ms, latitude, longitude, speed, codes, note)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for e in entries {
                stmt.execute(params![
                    trip_ms,
                    to_millis(e.timestamp),
                    e.latitude,
                    e.longitude,
                    e.speed,
                    e.annotation_code,
                    e.note,
                ])?;
                mark_processed(tx, e.timestamp)?;
            }
            Ok(())
        })
    }

    pub fn trip(&self, origination: DateTime<Utc>) -> CoreResult<Option<TripSummary>> {
        select_trip(&self.conn(), origination)
    }

    /// All current trips, ascending by origination.
    pub fn trips(&self) -> CoreResult<Vec<TripSummary>> {
        self.select_trips("")
    }

    /// Trips still waiting for the monthly rollup, ascending by origination.
    pub fn pending_trips(&self) -> CoreResult<Vec<TripSummary>> {
        self.select_trips("WHERE archived = 0")
    }

    fn select_trips(&self, filter: &str) -> CoreResult<Vec<TripSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRIP_COLS}, archived FROM trip_summaries {filter} ORDER BY origination_ms ASC"
        ))?;
        let rows = stmt.query_map([], |row| {
            let mut t = trip_from_row(row, 0)?;
            t.archived = row.get(14)?;
            Ok(t)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn trip_journal(&self, origination: DateTime<Utc>) -> CoreResult<Vec<JournalEntry>> {
        select_trip_journal(&self.conn(), origination)
    }

    // ---- history ---------------------------------------------------------

    pub fn month(&self, datestamp: &Datestamp) -> CoreResult<Option<MonthlyHistorySummary>> {
        select_month(&self.conn(), datestamp)
    }

    /// Every bucket, ascending by month.
    pub fn months(&self) -> CoreResult<Vec<MonthlyHistorySummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MONTH_COLS} FROM history_months ORDER BY datestamp ASC"
        ))?;
        let rows = stmt.query_map([], |row| month_from_row(row))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn archived_trips(&self, datestamp: &Datestamp) -> CoreResult<Vec<ArchivedTrip>> {
        select_archived_trips(&self.conn(), datestamp)
    }

    pub fn stats(&self) -> CoreResult<StoreStats> {
        let conn = self.conn();
        let count = |sql: &str| -> CoreResult<usize> {
            let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
            Ok(n.max(0) as usize)
        };
        Ok(StoreStats {
            journal_entries: count("SELECT COUNT(*) FROM gps_journal")?,
            unprocessed_entries: count("SELECT COUNT(*) FROM gps_journal WHERE processed = 0")?,
            trips: count("SELECT COUNT(*) FROM trip_summaries")?,
            unarchived_trips: count("SELECT COUNT(*) FROM trip_summaries WHERE archived = 0")?,
            months: count("SELECT COUNT(*) FROM history_months")?,
            archived_trips: count("SELECT COUNT(*) FROM history_trips")?,
        })
    }
}

impl JournalStore for Store {
    fn append(&self, entry: &JournalEntry) -> CoreResult<()> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO gps_journal
               (timestamp_ms, latitude, longitude, speed, processed, codes, note)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_millis(entry.timestamp),
                entry.latitude,
                entry.longitude,
                entry.speed,
                entry.processed,
                entry.annotation_code,
                entry.note,
            ],
        )?;
        if inserted == 0 {
            return Err(CoreError::duplicate(
                "gps_journal",
                entry.timestamp.to_rfc3339(),
            ));
        }
        Ok(())
    }

    fn list_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<JournalEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp_ms, latitude, longitude, speed, processed, codes, note
             FROM gps_journal
             WHERE timestamp_ms BETWEEN ?1 AND ?2
             ORDER BY timestamp_ms ASC",
        )?;
        let rows = stmt.query_map(params![to_millis(start), to_millis(end)], |row| {
            journal_from_row(row)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn mark_processed(&self, timestamp: DateTime<Utc>) -> CoreResult<()> {
        mark_processed(&self.conn(), timestamp)
    }

    fn count(&self) -> CoreResult<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM gps_journal", [], |r| r.get(0))?;
        Ok(n.max(0) as usize)
    }
}

// ---- statement helpers (shared with the archiver's transaction) ----------

fn mark_processed(conn: &Connection, timestamp: DateTime<Utc>) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE gps_journal SET processed = 1 WHERE timestamp_ms = ?1",
        [to_millis(timestamp)],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("journal entry", timestamp.to_rfc3339()));
    }
    Ok(())
}

pub(crate) fn select_trip(
    conn: &Connection,
    origination: DateTime<Utc>,
) -> CoreResult<Option<TripSummary>> {
    let trip = conn
        .query_row(
            &format!("SELECT {TRIP_COLS}, archived FROM trip_summaries WHERE origination_ms = ?1"),
            [to_millis(origination)],
            |row| {
                let mut t = trip_from_row(row, 0)?;
                t.archived = row.get(14)?;
                Ok(t)
            },
        )
        .optional()?;
    Ok(trip)
}

pub(crate) fn select_trip_journal(
    conn: &Connection,
    origination: DateTime<Utc>,
) -> CoreResult<Vec<JournalEntry>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp_ms, latitude, longitude, speed, 1, codes, note
         FROM trip_journal WHERE trip_ms = ?1 ORDER BY timestamp_ms ASC",
    )?;
    let rows = stmt.query_map([to_millis(origination)], |row| journal_from_row(row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn select_month(
    conn: &Connection,
    datestamp: &Datestamp,
) -> CoreResult<Option<MonthlyHistorySummary>> {
    let month = conn
        .query_row(
            &format!("SELECT {MONTH_COLS} FROM history_months WHERE datestamp = ?1"),
            [datestamp.as_str()],
            |row| month_from_row(row),
        )
        .optional()?;
    Ok(month)
}

pub(crate) fn history_contains(
    conn: &Connection,
    datestamp: &Datestamp,
    origination: DateTime<Utc>,
) -> CoreResult<bool> {
    let hit = conn
        .query_row(
            "SELECT 1 FROM history_trips WHERE datestamp = ?1 AND origination_ms = ?2",
            params![datestamp.as_str(), to_millis(origination)],
            |_| Ok(()),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Copy a trip and its journal under a bucket. `DuplicateKey` if already there.
pub(crate) fn insert_archived_trip(
    conn: &Connection,
    datestamp: &Datestamp,
    trip: &TripSummary,
    journal: &[JournalEntry],
) -> CoreResult<()> {
    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO history_trips(datestamp, {TRIP_COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        params![
            datestamp.as_str(),
            to_millis(trip.origination_timestamp),
            trip.origination.latitude,
            trip.origination.longitude,
            trip.origination_address,
            to_millis(trip.destination_timestamp),
            trip.destination.latitude,
            trip.destination.longitude,
            trip.destination_address,
            trip.max_speed,
            trip.duration,
            trip.distance,
            trip.score_acceleration,
            trip.score_deceleration,
            trip.score_smoothness,
        ],
    )?;
    if inserted == 0 {
        return Err(CoreError::duplicate(
            "history_trips",
            format!("{}/{}", datestamp, trip.origination_timestamp.to_rfc3339()),
        ));
    }
    let trip_ms = to_millis(trip.origination_timestamp);
    let mut stmt = conn.prepare(
        "INSERT INTO history_trip_journal
           (datestamp, trip_ms, timestamp_ms, latitude, longitude, speed, codes, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for e in journal {
        stmt.execute(params![
            datestamp.as_str(),
            trip_ms,
            to_millis(e.timestamp),
            e.latitude,
            e.longitude,
            e.speed,
            e.annotation_code,
            e.note,
        ])?;
    }
    Ok(())
}

pub(crate) fn upsert_month(conn: &Connection, m: &MonthlyHistorySummary) -> CoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO history_months({MONTH_COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(datestamp) DO UPDATE SET
               total_trips        = excluded.total_trips,
               total_distance     = excluded.total_distance,
               total_duration     = excluded.total_duration,
               highest_speed      = excluded.highest_speed,
               total_smoothness   = excluded.total_smoothness,
               total_acceleration = excluded.total_acceleration,
               total_deceleration = excluded.total_deceleration,
               total_distractions = excluded.total_distractions"
        ),
        params![
            m.datestamp.as_str(),
            m.total_trips,
            m.total_distance.raw(),
            m.total_duration.raw(),
            m.highest_speed,
            m.total_smoothness.raw(),
            m.total_acceleration.raw(),
            m.total_deceleration.raw(),
            m.total_distractions.raw(),
        ],
    )?;
    Ok(())
}

pub(crate) fn set_trip_archived(conn: &Connection, origination: DateTime<Utc>) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE trip_summaries SET archived = 1 WHERE origination_ms = ?1 AND archived = 0",
        [to_millis(origination)],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found(
            "unarchived trip",
            origination.to_rfc3339(),
        ));
    }
    Ok(())
}

pub(crate) fn select_archived_trips(
    conn: &Connection,
    datestamp: &Datestamp,
) -> CoreResult<Vec<ArchivedTrip>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRIP_COLS} FROM history_trips WHERE datestamp = ?1 ORDER BY origination_ms ASC"
    ))?;
    let trips = stmt
        .query_map([datestamp.as_str()], |row| {
            let mut t = trip_from_row(row, 0)?;
            t.archived = true;
            Ok(t)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut journal_stmt = conn.prepare(
        "SELECT timestamp_ms, latitude, longitude, speed, 1, codes, note
         FROM history_trip_journal
         WHERE datestamp = ?1 AND trip_ms = ?2
         ORDER BY timestamp_ms ASC",
    )?;
    let mut out = Vec::with_capacity(trips.len());
    for trip in trips {
        let journal = journal_stmt
            .query_map(
                params![datestamp.as_str(), to_millis(trip.origination_timestamp)],
                |row| journal_from_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(ArchivedTrip {
            datestamp: datestamp.clone(),
            trip,
            journal,
        });
    }
    Ok(out)
}

// ---- row mapping ---------------------------------------------------------

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    from_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn journal_from_row(row: &Row<'_>) -> rusqlite::Result<JournalEntry> {
    Ok(JournalEntry {
        timestamp: ts_at(row, 0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        speed: row.get(3)?,
        processed: row.get(4)?,
        annotation_code: row.get(5)?,
        note: row.get(6)?,
    })
}

/// Map the 14 `TRIP_COLS` starting at `at`. `archived` is left false.
fn trip_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<TripSummary> {
    Ok(TripSummary {
        origination_timestamp: ts_at(row, at)?,
        origination: LatLng::new(row.get(at + 1)?, row.get(at + 2)?),
        origination_address: row.get(at + 3)?,
        destination_timestamp: ts_at(row, at + 4)?,
        destination: LatLng::new(row.get(at + 5)?, row.get(at + 6)?),
        destination_address: row.get(at + 7)?,
        max_speed: row.get(at + 8)?,
        duration: row.get(at + 9)?,
        distance: row.get(at + 10)?,
        score_acceleration: row.get(at + 11)?,
        score_deceleration: row.get(at + 12)?,
        score_smoothness: row.get(at + 13)?,
        archived: false,
    })
}

fn month_from_row(row: &Row<'_>) -> rusqlite::Result<MonthlyHistorySummary> {
    let raw: String = row.get(0)?;
    let datestamp = raw.parse::<Datestamp>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(MonthlyHistorySummary {
        datestamp,
        total_trips: row.get(1)?,
        total_distance: Milli::from_raw(row.get(2)?),
        total_duration: Milli::from_raw(row.get(3)?),
        highest_speed: row.get(4)?,
        total_smoothness: Milli::from_raw(row.get(5)?),
        total_acceleration: Milli::from_raw(row.get(6)?),
        total_deceleration: Milli::from_raw(row.get(7)?),
        total_distractions: Milli::from_raw(row.get(8)?),
    })
}
