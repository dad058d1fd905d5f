use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use roadlog_core::error::CoreError;
use roadlog_core::model::{
    ArchiveOutcome, Datestamp, JournalEntry, LatLng, Milli, MonthlyHistorySummary, RawFix,
    TripSummary,
};
use roadlog_core::services::{HistoryAggregator, JournalStore, Store, TripArchiver};
use roadlog_core::utils::{LogSink, TracingSink};

#[derive(Default)]
struct CapturingSink {
    lines: Mutex<Vec<(String, String)>>,
}

impl LogSink for CapturingSink {
    fn record(&self, module: &str, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((module.to_string(), message.to_string()));
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, day, hour, 0, 0).unwrap()
}

fn trip(
    origination: DateTime<Utc>,
    distance: f64,
    duration: f64,
    max_speed: f64,
    scores: (f64, f64, f64),
) -> TripSummary {
    let (smoothness, acceleration, deceleration) = scores;
    TripSummary {
        origination_timestamp: origination,
        origination: LatLng::new(47.6, -122.3),
        origination_address: "home".into(),
        destination_timestamp: origination + Duration::seconds(duration as i64),
        destination: LatLng::new(47.7, -122.2),
        destination_address: "work".into(),
        max_speed,
        duration,
        distance,
        score_acceleration: acceleration,
        score_deceleration: deceleration,
        score_smoothness: smoothness,
        archived: false,
    }
}

/// Store a trip with a short journal window behind it.
fn seed_trip(store: &Store, t: &TripSummary) {
    let entries: Vec<JournalEntry> = (0..3)
        .map(|i| {
            let fix = RawFix::new(
                t.origination_timestamp + Duration::seconds(i),
                47.6,
                -122.3,
                10.0,
            );
            JournalEntry::from(&fix)
        })
        .collect();
    for e in &entries {
        store.append(e).unwrap();
    }
    store.record_trip(t, &entries).unwrap();
}

fn july() -> Datestamp {
    "2024-07".parse().unwrap()
}

#[test]
fn first_trip_seeds_bucket_and_max_speed_is_monotonic() {
    let store = Store::open_in_memory().unwrap();
    let archiver = TripArchiver::new(Arc::new(TracingSink));

    let first = trip(at(1, 8), 10.5, 600.0, 65.0, (1.0, 2.0, 3.0));
    seed_trip(&store, &first);
    assert_eq!(
        archiver.archive(&store, first.origination_timestamp).unwrap(),
        ArchiveOutcome::Archived
    );

    let bucket = store.month(&july()).unwrap().expect("bucket created");
    assert_eq!(
        bucket,
        MonthlyHistorySummary {
            datestamp: july(),
            total_trips: 1,
            total_distance: Milli::from_f64(10.5),
            total_duration: Milli::from_f64(600.0),
            highest_speed: 65.0,
            total_smoothness: Milli::from_f64(1.0),
            total_acceleration: Milli::from_f64(2.0),
            total_deceleration: Milli::from_f64(3.0),
            total_distractions: Milli::ZERO,
        }
    );

    let second = trip(at(2, 8), 4.0, 300.0, 40.0, (0.5, 1.0, 0.0));
    seed_trip(&store, &second);
    archiver.archive(&store, second.origination_timestamp).unwrap();

    let bucket = store.month(&july()).unwrap().unwrap();
    assert_eq!(bucket.total_trips, 2);
    assert_eq!(bucket.highest_speed, 65.0);
    assert_eq!(bucket.total_distance.as_f64(), 14.5);
    assert_eq!(bucket.total_duration.as_f64(), 900.0);
    assert_eq!(bucket.total_smoothness.as_f64(), 1.5);
    assert_eq!(bucket.total_acceleration.as_f64(), 3.0);
}

#[test]
fn archiving_twice_counts_once() {
    let store = Store::open_in_memory().unwrap();
    let sink = Arc::new(CapturingSink::default());
    let archiver = TripArchiver::new(sink.clone());

    let t = trip(at(3, 9), 12.0, 720.0, 30.0, (0.25, 1.0, 2.0));
    seed_trip(&store, &t);

    let first = archiver.archive(&store, t.origination_timestamp).unwrap();
    let second = archiver.archive(&store, t.origination_timestamp).unwrap();
    assert_eq!(first, ArchiveOutcome::Archived);
    assert_eq!(second, ArchiveOutcome::AlreadyArchived);

    let bucket = store.month(&july()).unwrap().unwrap();
    assert_eq!(bucket.total_trips, 1);
    assert_eq!(bucket.total_distance.as_f64(), 12.0);

    let archived = store.archived_trips(&july()).unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].journal.len(), 3, "journal copied with the trip");
    assert!(store.trip(t.origination_timestamp).unwrap().unwrap().archived);

    let lines = sink.lines.lock().unwrap();
    assert!(
        lines
            .iter()
            .any(|(m, msg)| m == "archiver.archive" && msg.contains("already exists"))
    );
}

#[test]
fn unknown_trip_is_not_found_and_changes_nothing() {
    let store = Store::open_in_memory().unwrap();
    let archiver = TripArchiver::new(Arc::new(TracingSink));

    let err = archiver.archive(&store, at(9, 9)).unwrap_err();
    assert!(err.is_not_found(), "got {err}");
    assert!(store.months().unwrap().is_empty());
}

#[test]
fn trip_lands_in_month_of_its_origination() {
    let store = Store::open_in_memory().unwrap();
    let archiver = TripArchiver::new(Arc::new(TracingSink));

    // Starts on the last evening of July, ends in August.
    let origination = Utc.with_ymd_and_hms(2024, 7, 31, 23, 50, 0).unwrap();
    let t = trip(origination, 8.0, 1200.0, 20.0, (0.0, 0.0, 0.0));
    seed_trip(&store, &t);
    archiver.archive(&store, origination).unwrap();

    assert!(store.month(&july()).unwrap().is_some());
    assert!(store.month(&"2024-08".parse().unwrap()).unwrap().is_none());
}

#[test]
fn recompute_matches_incremental_merge_in_any_order() {
    let mut rng = StdRng::seed_from_u64(42);
    let trips: Vec<TripSummary> = (0..12)
        .map(|i| {
            trip(
                at(1 + i, 6),
                rng.gen_range(0.0..25_000.0),
                rng.gen_range(30.0..5_400.0),
                [12.3, 30.7, 27.1, 18.9][i as usize % 4],
                (
                    rng.gen_range(0.0..3.0),
                    (i % 4) as f64,
                    0.1 * (i % 3) as f64,
                ),
            )
        })
        .collect();

    let reference = HistoryAggregator::recompute(&july(), trips.iter()).unwrap();
    assert_eq!(reference.total_trips, 12);
    assert_eq!(reference.highest_speed, 30.7);

    for _ in 0..5 {
        let mut order = trips.clone();
        order.shuffle(&mut rng);

        let store = Store::open_in_memory().unwrap();
        let archiver = TripArchiver::new(Arc::new(TracingSink));
        let history = HistoryAggregator::new(Arc::new(TracingSink));
        for t in &order {
            seed_trip(&store, t);
        }
        for t in &order {
            archiver.archive(&store, t.origination_timestamp).unwrap();
        }

        let incremental = store.month(&july()).unwrap().unwrap();
        assert_eq!(incremental, reference);
        assert_eq!(history.recompute_month(&store, &july()).unwrap(), reference);
    }
}

#[test]
fn decimal_totals_do_not_drift_with_archive_order() {
    let store = Store::open_in_memory().unwrap();
    let sink = Arc::new(CapturingSink::default());
    let archiver = TripArchiver::new(sink.clone());
    let history = HistoryAggregator::new(sink.clone());

    let trips = [
        trip(at(10, 8), 0.1, 0.1, 5.0, (0.1, 0.0, 0.0)),
        trip(at(11, 8), 0.2, 0.2, 5.0, (0.2, 0.0, 0.0)),
        trip(at(12, 8), 0.3, 0.3, 5.0, (0.3, 0.0, 0.0)),
    ];
    for t in &trips {
        seed_trip(&store, t);
    }
    // Newest first, the opposite of recompute's order.
    for t in trips.iter().rev() {
        archiver.archive(&store, t.origination_timestamp).unwrap();
    }

    let incremental = store.month(&july()).unwrap().unwrap();
    let recomputed = history.recompute_month(&store, &july()).unwrap();
    assert_eq!(incremental, recomputed);
    assert_eq!(incremental.total_distance.as_f64(), 0.6);
    assert_eq!(incremental.total_duration.as_f64(), 0.6);
    assert_eq!(incremental.total_smoothness.as_f64(), 0.6);

    history.repair_month(&store, &july()).unwrap();
    let lines = sink.lines.lock().unwrap();
    assert!(
        lines
            .iter()
            .any(|(m, msg)| m == "history.repair_month" && msg.contains("already consistent"))
    );
}

#[test]
fn recompute_of_empty_month_is_not_found() {
    let store = Store::open_in_memory().unwrap();
    let history = HistoryAggregator::new(Arc::new(TracingSink));
    let err = history.recompute_month(&store, &july()).unwrap_err();
    assert!(err.is_not_found());
    assert!(HistoryAggregator::recompute(&july(), std::iter::empty()).is_none());
}

#[test]
fn repair_rewrites_drifted_totals() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let sink = Arc::new(CapturingSink::default());
    let archiver = TripArchiver::new(sink.clone());
    let history = HistoryAggregator::new(sink.clone());

    let a = trip(at(4, 7), 2.0, 100.0, 10.0, (0.5, 1.0, 1.0));
    let b = trip(at(5, 7), 3.0, 200.0, 15.0, (0.5, 0.0, 2.0));
    seed_trip(&store, &a);
    seed_trip(&store, &b);
    archiver.archive(&store, a.origination_timestamp).unwrap();
    archiver.archive(&store, b.origination_timestamp).unwrap();
    let good = store.month(&july()).unwrap().unwrap();

    let repaired = history.repair_month(&store, &july()).unwrap();
    assert_eq!(repaired, good);
    assert_eq!(store.month(&july()).unwrap().unwrap(), good);

    let lines = sink.lines.lock().unwrap();
    assert!(
        lines
            .iter()
            .any(|(m, msg)| m == "history.repair_month" && msg.contains("already consistent"))
    );
}

#[test]
fn failed_archive_rolls_back_every_table() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("journal.db");
    let store = Store::open(&db_path).unwrap();
    let archiver = TripArchiver::new(Arc::new(TracingSink));

    let earlier = trip(at(1, 7), 5.0, 300.0, 20.0, (0.5, 1.0, 0.0));
    let target = trip(at(2, 7), 7.0, 400.0, 25.0, (0.25, 0.0, 1.0));
    seed_trip(&store, &earlier);
    seed_trip(&store, &target);
    archiver.archive(&store, earlier.origination_timestamp).unwrap();
    let before = store.month(&july()).unwrap().unwrap();

    // A stray journal row under the target's key makes the copy step collide
    // after the trip row itself was already inserted.
    let origination_ms = target.origination_timestamp.timestamp_millis();
    {
        let raw = rusqlite::Connection::open(&db_path).unwrap();
        raw.execute(
            "INSERT INTO history_trip_journal
               (datestamp, trip_ms, timestamp_ms, latitude, longitude, speed, codes, note)
             VALUES ('2024-07', ?1, ?1, 0.0, 0.0, 0.0, '', '')",
            [origination_ms],
        )
        .unwrap();
    }

    let err = archiver
        .archive(&store, target.origination_timestamp)
        .unwrap_err();
    assert!(matches!(err, CoreError::Persistence(_)), "got {err}");

    assert_eq!(store.month(&july()).unwrap().unwrap(), before);
    let archived: Vec<DateTime<Utc>> = store
        .archived_trips(&july())
        .unwrap()
        .iter()
        .map(|a| a.trip.origination_timestamp)
        .collect();
    assert_eq!(archived, vec![earlier.origination_timestamp]);
    assert!(!store.trip(target.origination_timestamp).unwrap().unwrap().archived);
    assert_eq!(store.pending_trips().unwrap().len(), 1);

    // Once the collision is gone the same call goes through.
    {
        let raw = rusqlite::Connection::open(&db_path).unwrap();
        raw.execute(
            "DELETE FROM history_trip_journal WHERE trip_ms = ?1",
            [origination_ms],
        )
        .unwrap();
    }
    assert_eq!(
        archiver.archive(&store, target.origination_timestamp).unwrap(),
        ArchiveOutcome::Archived
    );
    let after = store.month(&july()).unwrap().unwrap();
    assert_eq!(after.total_trips, 2);
    assert_eq!(after.total_distance.as_f64(), 12.0);
    assert_eq!(store.archived_trips(&july()).unwrap()[1].journal.len(), 3);
}

#[test]
fn archive_pending_sweeps_oldest_first_and_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    let archiver = TripArchiver::new(Arc::new(TracingSink));

    for day in [6, 2, 4] {
        seed_trip(&store, &trip(at(day, 10), 1.0, 60.0, 9.0, (0.0, 0.0, 0.0)));
    }

    let report = archiver.archive_pending(&store).unwrap();
    assert_eq!(report.archived, 3);
    assert_eq!(report.failed, 0);
    assert!(store.pending_trips().unwrap().is_empty());

    let again = archiver.archive_pending(&store).unwrap();
    assert_eq!(again.archived, 0);
    assert_eq!(store.month(&july()).unwrap().unwrap().total_trips, 3);

    let stats = store.stats().unwrap();
    assert_eq!(stats.trips, 3);
    assert_eq!(stats.unarchived_trips, 0);
    assert_eq!(stats.archived_trips, 3);
    assert_eq!(stats.months, 1);
}

#[test]
fn concurrent_archives_into_one_month_do_not_lose_updates() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("db").join("journal.db")).unwrap());
    let archiver = Arc::new(TripArchiver::new(Arc::new(TracingSink)));

    let trips: Vec<TripSummary> = (0..16)
        .map(|i| trip(at(1 + i, 12), 1.0, 30.0, i as f64, (0.0, 1.0, 0.0)))
        .collect();
    for t in &trips {
        seed_trip(&store, t);
    }

    let handles: Vec<_> = trips
        .chunks(4)
        .map(|chunk| {
            let store = Arc::clone(&store);
            let archiver = Arc::clone(&archiver);
            let keys: Vec<DateTime<Utc>> = chunk.iter().map(|t| t.origination_timestamp).collect();
            thread::spawn(move || {
                for k in keys {
                    // Every thread also retries a neighbour's first trip.
                    archiver.archive(&store, k).unwrap();
                    archiver.archive(&store, at(1, 12)).ok();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let bucket = store.month(&july()).unwrap().unwrap();
    assert_eq!(bucket.total_trips, 16);
    assert_eq!(bucket.total_distance.as_f64(), 16.0);
    assert_eq!(bucket.total_acceleration.as_f64(), 16.0);
    assert_eq!(bucket.highest_speed, 15.0);
    assert_eq!(store.archived_trips(&july()).unwrap().len(), 16);
}
