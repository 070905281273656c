//! Shared fakes for the sync integration tests.

#![allow(dead_code)]

use chrono::{Datelike, NaiveDate};
use histsync_core::data::store::CollectionMeta;
use histsync_core::data::{parse_date, DataError, DataProvider, Library, MemoryStore, TimeSeriesStore};
use polars::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// `n` consecutive calendar days starting at `start`.
pub fn days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    start.iter_days().take(n).collect()
}

/// One `fetch_range` call as seen by the fake feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub key: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Default)]
struct FeedState {
    /// Raw provider date strings, in the order the feed emits them.
    dates: Vec<String>,
    extra_columns: Vec<String>,
    calls: Vec<FetchCall>,
    failing: bool,
    broken_keys: HashSet<String>,
}

/// Scripted provider: one shared history for every key, newest row first.
#[derive(Clone, Default)]
pub struct FakeFeed {
    state: Arc<Mutex<FeedState>>,
}

impl FakeFeed {
    pub fn with_days(days: &[NaiveDate]) -> Self {
        let feed = Self::default();
        for day in days {
            feed.push_day(*day);
        }
        feed
    }

    /// History made of raw provider strings, used as-is.
    pub fn with_raw_dates<S: Into<String>>(dates: impl IntoIterator<Item = S>) -> Self {
        let feed = Self::default();
        feed.state.lock().unwrap().dates = dates.into_iter().map(Into::into).collect();
        feed
    }

    /// Add provider-computed columns to every fetched table.
    pub fn with_extra_columns(self, columns: &[&str]) -> Self {
        self.state.lock().unwrap().extra_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// A new trading day becomes available. The feed lists it first.
    pub fn push_day(&self, day: NaiveDate) {
        self.state
            .lock()
            .unwrap()
            .dates
            .insert(0, day.format("%Y-%m-%d").to_string());
    }

    /// Every fetch fails as if the retry budget were exhausted.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// Fetches for `key` return a row the date parser rejects.
    pub fn break_key(&self, key: &str) {
        self.state.lock().unwrap().broken_keys.insert(key.to_string());
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl DataProvider for FakeFeed {
    fn name(&self) -> &str {
        "fake_feed"
    }

    fn fetch_range(
        &self,
        key: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame, DataError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(FetchCall {
            key: key.to_string(),
            start,
            end,
        });

        if state.failing {
            return Err(DataError::ProviderUnavailable {
                attempts: 5,
                reason: "network unreachable: connection refused".into(),
            });
        }

        let dates: Vec<String> = if state.broken_keys.contains(key) {
            vec!["not-a-date".to_string()]
        } else {
            state
                .dates
                .iter()
                .filter(|raw| {
                    let date = parse_date(raw).unwrap();
                    start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
                })
                .cloned()
                .collect()
        };

        let prices: Vec<f64> = dates
            .iter()
            .map(|raw| parse_date(raw).map(|d| d.ordinal() as f64).unwrap_or(0.0))
            .collect();

        let mut columns = vec![
            Column::new("date".into(), dates.clone()),
            Column::new("open".into(), prices.clone()),
            Column::new("high".into(), prices.iter().map(|p| p + 1.0).collect::<Vec<f64>>()),
            Column::new("close".into(), prices.clone()),
            Column::new("low".into(), prices.iter().map(|p| p - 1.0).collect::<Vec<f64>>()),
            Column::new("volume".into(), vec![1_000.0; dates.len()]),
        ];
        for name in &state.extra_columns {
            columns.push(Column::new(name.as_str().into(), vec![0.5; dates.len()]));
        }
        Ok(DataFrame::new(columns)?)
    }

    fn list_index_members(&self) -> Result<Vec<String>, DataError> {
        Ok(vec!["000651".into(), "000002".into()])
    }
}

#[derive(Debug, Default)]
pub struct Counts {
    pub writes: AtomicUsize,
    pub appends: AtomicUsize,
}

impl Counts {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

/// Memory store that counts write operations across every handle.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub counts: Arc<Counts>,
}

impl CountingStore {
    /// Row count of a stored collection, or `None` if absent.
    pub fn rows(&self, library: &str, key: &str) -> Option<usize> {
        let lib = self.inner.open_library(library).ok()?;
        lib.read_full(key).ok().map(|t| t.height())
    }

    pub fn library(&self, name: &str) -> Box<dyn Library> {
        self.inner.open_library(name).unwrap()
    }

    /// Handle on a library, or `None` before the engine created it.
    pub fn inner_library(&self, name: &str) -> Option<Box<dyn Library>> {
        self.inner.open_library(name).ok()
    }
}

impl TimeSeriesStore for CountingStore {
    fn library_exists(&self, name: &str) -> Result<bool, DataError> {
        self.inner.library_exists(name)
    }

    fn create_library(&self, name: &str) -> Result<(), DataError> {
        self.inner.create_library(name)
    }

    fn open_library(&self, name: &str) -> Result<Box<dyn Library>, DataError> {
        Ok(Box::new(CountingLibrary {
            inner: self.inner.open_library(name)?,
            counts: Arc::clone(&self.counts),
        }))
    }

    fn list_libraries(&self) -> Result<Vec<String>, DataError> {
        self.inner.list_libraries()
    }
}

struct CountingLibrary {
    inner: Box<dyn Library>,
    counts: Arc<Counts>,
}

impl Library for CountingLibrary {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn has_collection(&self, key: &str) -> Result<bool, DataError> {
        self.inner.has_collection(key)
    }

    fn write_full(&self, key: &str, table: &DataFrame) -> Result<(), DataError> {
        self.counts.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_full(key, table)
    }

    fn append(&self, key: &str, table: &DataFrame) -> Result<(), DataError> {
        self.counts.appends.fetch_add(1, Ordering::SeqCst);
        self.inner.append(key, table)
    }

    fn read_full(&self, key: &str) -> Result<DataFrame, DataError> {
        self.inner.read_full(key)
    }

    fn list_collection_keys(&self) -> Result<BTreeSet<String>, DataError> {
        self.inner.list_collection_keys()
    }

    fn collection_meta(&self, key: &str) -> Result<Option<CollectionMeta>, DataError> {
        self.inner.collection_meta(key)
    }
}

/// Stored (string) dates of a collection, parsed.
pub fn stored_dates(lib: &dyn Library, key: &str) -> Vec<NaiveDate> {
    histsync_core::data::table::date_values(&lib.read_full(key).unwrap()).unwrap()
}
