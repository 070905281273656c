//! End-to-end sync against the on-disk Parquet store, across process restarts.

mod common;

use common::{d, days, FakeFeed};
use histsync_core::data::{DataError, Library, ParquetStore, TimeSeriesStore};
use histsync_core::{FixedClock, SyncEngine, SyncOutcome};
use std::path::Path;

const LIB: &str = "ts_his_lib";

fn engine(root: &Path, feed: &FakeFeed, today: chrono::NaiveDate) -> SyncEngine {
    SyncEngine::new(ParquetStore::new(root), feed.clone(), LIB).with_clock(FixedClock(today))
}

fn library(root: &Path) -> Box<dyn Library> {
    ParquetStore::new(root).open_library(LIB).unwrap()
}

#[test]
fn bootstrap_then_daily_appends_survive_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let feed = FakeFeed::with_days(&days(d(2024, 1, 1), 50)).with_extra_columns(&["ma5", "v_ma5"]);

    let outcome = engine(dir.path(), &feed, d(2024, 2, 20))
        .sync_one("000002")
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Bootstrapped { rows: 50 });

    let meta = library(dir.path()).collection_meta("000002").unwrap().unwrap();
    assert_eq!(meta.row_count, 50);
    assert_eq!(meta.first_date, d(2024, 1, 1));
    assert_eq!(meta.last_date, d(2024, 2, 19));

    // Three more days, one process per day.
    for today in [d(2024, 2, 21), d(2024, 2, 22), d(2024, 2, 23)] {
        feed.push_day(today.pred_opt().unwrap());
        let outcome = engine(dir.path(), &feed, today).sync_one("000002").unwrap();
        assert_eq!(outcome, SyncOutcome::Appended { rows: 1 });
    }

    let stored = library(dir.path()).read_full("000002").unwrap();
    assert_eq!(stored.height(), 53);
    assert!(stored.column("ma5").is_err());
    assert!(stored.column("v_ma5").is_err());

    let meta = library(dir.path()).collection_meta("000002").unwrap().unwrap();
    assert_eq!(meta.last_date, d(2024, 2, 22));

    // Same-day rerun after a restart.
    let outcome = engine(dir.path(), &feed, d(2024, 2, 23))
        .sync_one("000002")
        .unwrap();
    assert_eq!(outcome, SyncOutcome::UpToDate);
    assert_eq!(library(dir.path()).read_full("000002").unwrap().height(), 53);
}

#[test]
fn library_marker_is_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let feed = FakeFeed::with_days(&days(d(2024, 1, 1), 3));

    engine(dir.path(), &feed, d(2024, 1, 4)).sync_one("000651").unwrap();
    let marker = dir.path().join(LIB).join("library.json");
    let first = std::fs::read_to_string(&marker).unwrap();

    engine(dir.path(), &feed, d(2024, 1, 4)).sync_one("600519").unwrap();
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), first);

    let keys = library(dir.path()).list_collection_keys().unwrap();
    assert_eq!(
        keys.into_iter().collect::<Vec<_>>(),
        ["000651".to_string(), "600519".to_string()]
    );
}

#[test]
fn read_before_any_sync_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let feed = FakeFeed::with_days(&days(d(2024, 1, 1), 3));
    let mut engine = engine(dir.path(), &feed, d(2024, 1, 4));

    assert!(matches!(
        engine.read("000651"),
        Err(DataError::CollectionNotFound { .. })
    ));
    assert!(
        !dir.path().join(LIB).exists(),
        "read must not create the library"
    );
}

#[test]
fn path_like_key_is_refused_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let feed = FakeFeed::with_days(&days(d(2024, 1, 1), 3));
    let mut engine = engine(dir.path(), &feed, d(2024, 1, 4));

    assert!(matches!(
        engine.sync_one("../../escaped"),
        Err(DataError::Store(_))
    ));
    assert!(feed.calls().is_empty());
    assert!(!dir.path().join("escaped").exists());
    assert!(!dir.path().join(LIB).join("escaped").exists());

    let summary = engine.sync_many(["000651", "../escaped"]);
    assert_eq!(summary.bootstrapped, 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(
        library(dir.path())
            .list_collection_keys()
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>(),
        ["000651".to_string()]
    );
}

#[test]
fn corrupt_collection_is_rebootstrapped() {
    let dir = tempfile::tempdir().unwrap();
    let feed = FakeFeed::with_days(&days(d(2024, 1, 1), 10));
    engine(dir.path(), &feed, d(2024, 1, 11)).sync_one("000651").unwrap();

    let collection = dir.path().join(LIB).join("symbol=000651");
    std::fs::write(collection.join("data.parquet"), b"not parquet").unwrap();

    let mut engine = engine(dir.path(), &feed, d(2024, 1, 11));
    assert!(engine.read("000651").is_err());
    assert!(collection.join("data.parquet.quarantined").exists());

    assert_eq!(
        engine.sync_one("000651").unwrap(),
        SyncOutcome::Bootstrapped { rows: 10 }
    );
    assert_eq!(engine.read("000651").unwrap().height(), 10);
}
