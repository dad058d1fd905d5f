use chrono::{DateTime, Duration, TimeZone, Utc};

use roadlog_core::error::CoreError;
use roadlog_core::model::{JournalEntry, RawFix};
use roadlog_core::services::{JournalStore, Store};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 20, 18, 0, 0).unwrap()
}

fn entry(offset_secs: i64, speed: f64) -> JournalEntry {
    JournalEntry::from(&RawFix::new(
        t0() + Duration::seconds(offset_secs),
        35.68,
        139.69,
        speed,
    ))
}

#[test]
fn append_rejects_an_existing_timestamp() {
    let store = Store::open_in_memory().unwrap();
    store.append(&entry(0, 9.0)).unwrap();

    let err = store.append(&entry(0, 12.0)).unwrap_err();
    assert!(err.is_duplicate(), "got {err}");
    match err {
        CoreError::DuplicateKey { table, .. } => assert_eq!(table, "gps_journal"),
        other => panic!("unexpected error {other}"),
    }

    // The first write stands.
    let rows = store.list_by_time_range(t0(), t0()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].speed, 9.0);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn mark_processed_flags_entry_and_reports_missing_ones() {
    let store = Store::open_in_memory().unwrap();
    store.append(&entry(0, 6.0)).unwrap();
    store.append(&entry(1, 7.0)).unwrap();

    store.mark_processed(t0()).unwrap();
    let unprocessed = store.unprocessed_journal().unwrap();
    assert_eq!(unprocessed.len(), 1);
    assert_eq!(unprocessed[0].timestamp, t0() + Duration::seconds(1));

    let err = store
        .mark_processed(t0() + Duration::seconds(99))
        .unwrap_err();
    assert!(err.is_not_found(), "got {err}");
    assert_eq!(store.unprocessed_journal().unwrap().len(), 1);
}

#[test]
fn time_range_is_inclusive_and_ascending() {
    let store = Store::open_in_memory().unwrap();
    for off in [4, 0, 2, 6, 8] {
        store.append(&entry(off, off as f64)).unwrap();
    }

    let rows = store
        .list_by_time_range(t0() + Duration::seconds(2), t0() + Duration::seconds(6))
        .unwrap();
    let secs: Vec<i64> = rows.iter().map(|e| (e.timestamp - t0()).num_seconds()).collect();
    assert_eq!(secs, vec![2, 4, 6]);

    assert!(
        store
            .list_by_time_range(t0() + Duration::seconds(9), t0() + Duration::seconds(20))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn journal_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    {
        let store = Store::open(&path).unwrap();
        store.append(&entry(0, 3.0)).unwrap();
        store.append(&entry(1, 4.0)).unwrap();
    }
    let store = Store::open(&path).unwrap();
    assert_eq!(store.count().unwrap(), 2);
    assert!(store.append(&entry(1, 4.0)).unwrap_err().is_duplicate());
}
