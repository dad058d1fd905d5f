use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use roadlog_core::config::TripsConfig;
use roadlog_core::model::{JournalEntry, LatLng, RawFix};
use roadlog_core::services::{
    AddressResolver, JournalStore, NoAddresses, Store, TripSummarizer,
};
use roadlog_core::utils::TracingSink;

struct GridResolver;

impl AddressResolver for GridResolver {
    fn resolve(&self, p: LatLng) -> String {
        format!("{:.3},{:.3}", p.latitude, p.longitude)
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 14, 17, 0, 0).unwrap()
}

fn entry(offset_secs: i64, lng: f64, speed: f64) -> JournalEntry {
    JournalEntry::from(&RawFix::new(
        t0() + Duration::seconds(offset_secs),
        0.0,
        lng,
        speed,
    ))
}

fn summarizer(resolver: Arc<dyn AddressResolver>) -> TripSummarizer {
    TripSummarizer::new(TripsConfig::default(), resolver, Arc::new(TracingSink))
}

#[test]
fn summary_fields_from_one_segment() {
    let s = summarizer(Arc::new(GridResolver));
    // One-second steps along the equator: +4 m/s^2, 0, -4 m/s^2.
    let entries = vec![
        entry(0, 0.000, 0.0),
        entry(1, 0.001, 4.0),
        entry(2, 0.002, 4.0),
        entry(3, 0.003, 0.0),
    ];
    let trip = s.summarize(&entries).expect("non-empty");

    assert_eq!(trip.origination_timestamp, t0());
    assert_eq!(trip.destination_timestamp, t0() + Duration::seconds(3));
    assert_eq!(trip.origination_address, "0.000,0.000");
    assert_eq!(trip.destination_address, "0.000,0.003");
    assert_eq!(trip.duration, 3.0);
    assert_eq!(trip.max_speed, 4.0);
    assert_eq!(trip.score_acceleration, 1.0);
    assert_eq!(trip.score_deceleration, 1.0);
    // |0 - 4| + |-4 - 0| over two changes.
    assert_eq!(trip.score_smoothness, 4.0);
    // ~111.2 m per milli-degree at the equator.
    assert!((trip.distance - 333.58).abs() < 0.5, "distance {}", trip.distance);
    assert!(!trip.archived);
}

#[test]
fn empty_and_tiny_segments() {
    let s = summarizer(Arc::new(NoAddresses));
    assert!(s.summarize(&[]).is_none());

    let trip = s.summarize(&[entry(0, 0.0, 3.0)]).unwrap();
    assert_eq!(trip.duration, 0.0);
    assert_eq!(trip.distance, 0.0);
    assert_eq!(trip.score_smoothness, 0.0);
    assert_eq!(trip.origination_address, "");
}

#[test]
fn gaps_longer_than_separator_split_trips() {
    let s = summarizer(Arc::new(NoAddresses));
    let entries = vec![
        entry(0, 0.0, 6.0),
        entry(10, 0.0, 6.0),
        entry(310, 0.0, 6.0), // exactly 300 s later: same trip
        entry(611, 0.0, 6.0), // 301 s later: new trip
        entry(620, 0.0, 6.0),
    ];
    let segments = s.segment(&entries);
    let lens: Vec<usize> = segments.iter().map(|seg| seg.len()).collect();
    assert_eq!(lens, vec![3, 2]);
    assert!(s.segment(&[]).is_empty());
}

#[test]
fn process_journal_records_closed_trips_and_leaves_open_one() {
    let store = Store::open_in_memory().unwrap();
    let s = summarizer(Arc::new(NoAddresses));

    // Trip A (3 rows), a stray single row, then trip B still in progress.
    let offsets = [0, 5, 10, 1000, 2000, 2005];
    for off in offsets {
        store.append(&entry(off, off as f64 * 1e-5, 7.0)).unwrap();
    }

    let now = t0() + Duration::seconds(2100);
    let report = s.process_journal(&store, now).unwrap();
    assert_eq!(report.trips.len(), 1);
    assert_eq!(report.trips[0].origination_timestamp, t0());
    assert_eq!(report.discarded, 1);
    assert_eq!(report.pending, 2);

    let trip_rows = store.trip_journal(t0()).unwrap();
    assert_eq!(trip_rows.len(), 3);
    assert_eq!(store.unprocessed_journal().unwrap().len(), 2);

    // Later, trip B has closed.
    let later = t0() + Duration::seconds(4000);
    let report = s.process_journal(&store, later).unwrap();
    assert_eq!(report.trips.len(), 1);
    assert_eq!(report.pending, 0);
    assert!(store.unprocessed_journal().unwrap().is_empty());
    assert_eq!(store.trips().unwrap().len(), 2);
}

#[test]
fn segment_reusing_a_trip_origination_is_discarded() {
    let store = Store::open_in_memory().unwrap();
    let s = summarizer(Arc::new(NoAddresses));

    let first = vec![entry(0, 0.0, 6.0), entry(5, 0.0, 6.0)];
    let existing = s.summarize(&first).unwrap();
    store.record_trip(&existing, &[]).unwrap();

    for e in &first {
        store.append(e).unwrap();
    }
    let report = s
        .process_journal(&store, t0() + Duration::seconds(3600))
        .unwrap();
    assert!(report.trips.is_empty());
    assert_eq!(report.discarded, 2);
    assert_eq!(report.notes.len(), 1);
    assert!(store.unprocessed_journal().unwrap().is_empty());
}
