//! Bootstrap-or-append synchronization of per-instrument daily history.
//!
//! For each instrument key the engine either bootstraps the collection (full
//! history, pruned, sorted, written once) or appends the previous calendar
//! day. Keys bootstrapped by this engine instance never get a delta append in
//! the same lifetime: the bootstrap already covered yesterday.
//!
//! Provider trouble is never fatal here. An empty fetch or a fetch that ran out
//! of retries is logged and reported as an outcome, and nothing is written.
//! Only store failures come back as `Err`.

use crate::clock::{Clock, SystemClock};
use crate::data::provider::{DataError, DataProvider};
use crate::data::store::{Library, TimeSeriesStore};
use crate::data::table::{
    date_values, dedup_dates, normalize_dates, rows_after, sort_by_date, strip_unused_columns,
    UNUSED_COLUMNS,
};
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::collections::HashSet;
use std::fmt;

/// Which fetch a sync step was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Bootstrap,
    Delta,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Bootstrap => f.write_str("bootstrap"),
            SyncPhase::Delta => f.write_str("delta"),
        }
    }
}

/// What `sync_one` did for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Collection created with `rows` records.
    Bootstrapped { rows: usize },
    /// `rows` records appended to an existing collection.
    Appended { rows: usize },
    /// Key was bootstrapped earlier by this engine; delta skipped.
    SkippedFreshBootstrap,
    /// The delta day is already stored.
    UpToDate,
    /// Provider answered with zero rows; nothing written.
    Empty { phase: SyncPhase },
    /// Provider failed (retries exhausted or unusable response); nothing written.
    Unavailable { phase: SyncPhase, reason: String },
}

impl SyncOutcome {
    /// Whether this outcome wrote to the store.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Bootstrapped { .. } | SyncOutcome::Appended { .. }
        )
    }
}

/// Summary of a `sync_many` run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub total: usize,
    pub bootstrapped: usize,
    pub appended: usize,
    pub skipped: usize,
    pub empty: usize,
    pub unavailable: usize,
    pub errors: Vec<(String, DataError)>,
}

impl SyncSummary {
    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Bootstrapped { .. } => self.bootstrapped += 1,
            SyncOutcome::Appended { .. } => self.appended += 1,
            SyncOutcome::SkippedFreshBootstrap | SyncOutcome::UpToDate => self.skipped += 1,
            SyncOutcome::Empty { .. } => self.empty += 1,
            SyncOutcome::Unavailable { .. } => self.unavailable += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Keeps one library of instrument collections in step with a provider.
///
/// One engine per worker: it owns its store handle, and its bootstrap set is
/// private to it.
pub struct SyncEngine {
    store: Box<dyn TimeSeriesStore>,
    provider: Box<dyn DataProvider>,
    clock: Box<dyn Clock>,
    library_name: String,
    library: Option<Box<dyn Library>>,
    unused_columns: Vec<String>,
    bootstrapped: HashSet<String>,
}

impl SyncEngine {
    pub fn new(
        store: impl TimeSeriesStore + 'static,
        provider: impl DataProvider + 'static,
        library_name: impl Into<String>,
    ) -> Self {
        Self {
            store: Box::new(store),
            provider: Box::new(provider),
            clock: Box::new(SystemClock),
            library_name: library_name.into(),
            library: None,
            unused_columns: UNUSED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            bootstrapped: HashSet::new(),
        }
    }

    /// Replace the clock that decides which day the delta fetches.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the set of columns stripped before persistence.
    pub fn with_unused_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unused_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    /// Whether `key` was bootstrapped by this engine instance.
    pub fn is_bootstrapped(&self, key: &str) -> bool {
        self.bootstrapped.contains(key)
    }

    /// Create the library if it is missing, then bind the handle.
    fn ensure_library(&mut self) -> Result<(), DataError> {
        if !self.store.library_exists(&self.library_name)? {
            self.store.create_library(&self.library_name)?;
        }
        self.bind_library()
    }

    fn bind_library(&mut self) -> Result<(), DataError> {
        if self.library.is_none() {
            self.library = Some(self.store.open_library(&self.library_name)?);
        }
        Ok(())
    }

    fn library(&self) -> Result<&dyn Library, DataError> {
        self.library
            .as_deref()
            .ok_or_else(|| DataError::LibraryNotFound {
                name: self.library_name.clone(),
            })
    }

    /// Bring one instrument's collection up to date.
    ///
    /// Absent collections are bootstrapped from full history. Present ones get
    /// yesterday appended, unless this engine bootstrapped them.
    pub fn sync_one(&mut self, key: &str) -> Result<SyncOutcome, DataError> {
        self.ensure_library()?;

        if !self.library()?.has_collection(key)? {
            return self.bootstrap(key);
        }

        if self.bootstrapped.contains(key) {
            tracing::debug!(key, "bootstrapped in this run, skipping delta");
            return Ok(SyncOutcome::SkippedFreshBootstrap);
        }

        self.append_delta(key)
    }

    /// `sync_one` over every key, in order. Failures are logged and skipped.
    pub fn sync_many<I, S>(&mut self, keys: I) -> SyncSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut summary = SyncSummary::default();

        for key in keys {
            let key = key.as_ref();
            summary.total += 1;

            match self.sync_one(key) {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    tracing::error!(key, error = %e, "sync failed");
                    summary.errors.push((key.to_string(), e));
                }
            }
        }

        tracing::info!(
            total = summary.total,
            bootstrapped = summary.bootstrapped,
            appended = summary.appended,
            skipped = summary.skipped,
            empty = summary.empty,
            unavailable = summary.unavailable,
            failed = summary.failed(),
            "sync complete"
        );
        summary
    }

    /// Read the stored collection for `key` with canonical `Date` values.
    pub fn read(&mut self, key: &str) -> Result<DataFrame, DataError> {
        if self.library.is_none() && !self.store.library_exists(&self.library_name)? {
            return Err(DataError::CollectionNotFound {
                key: key.to_string(),
            });
        }
        self.bind_library()?;

        let table = self.library()?.read_full(key)?;
        normalize_dates(&table)
    }

    fn bootstrap(&mut self, key: &str) -> Result<SyncOutcome, DataError> {
        let table = match self
            .fetch(key, None, None)
            .and_then(|fetched| self.prepare(key, &fetched))
        {
            Ok(table) => table,
            Err(e) => return Ok(Self::recover(key, SyncPhase::Bootstrap, e)),
        };

        let rows = table.height();
        self.library()?.write_full(key, &table)?;
        self.bootstrapped.insert(key.to_string());

        tracing::info!(key, rows, library = %self.library_name, "bootstrapped collection");
        Ok(SyncOutcome::Bootstrapped { rows })
    }

    fn append_delta(&mut self, key: &str) -> Result<SyncOutcome, DataError> {
        let today = self.clock.today();
        let day = today
            .pred_opt()
            .ok_or_else(|| DataError::InvalidDate(format!("no day before {today}")))?;

        let mut table = match self
            .fetch(key, Some(day), Some(day))
            .and_then(|fetched| self.prepare(key, &fetched))
        {
            Ok(table) => table,
            Err(e) => return Ok(Self::recover(key, SyncPhase::Delta, e)),
        };

        if let Some(last) = self.last_stored_date(key)? {
            let fetched_rows = table.height();
            table = rows_after(&table, last)?;
            if table.height() < fetched_rows {
                tracing::debug!(
                    key,
                    %last,
                    dropped = fetched_rows - table.height(),
                    "dropped delta rows already stored"
                );
            }
        }

        if table.height() == 0 {
            tracing::info!(key, %day, "collection already up to date");
            return Ok(SyncOutcome::UpToDate);
        }

        let rows = table.height();
        self.library()?.append(key, &table)?;

        tracing::info!(key, rows, %day, "appended delta");
        Ok(SyncOutcome::Appended { rows })
    }

    /// Fetch a range; zero rows comes back as `ProviderEmptyResult`.
    fn fetch(
        &self,
        key: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame, DataError> {
        let table = self.provider.fetch_range(key, start, end)?;
        if table.height() == 0 {
            return Err(DataError::ProviderEmptyResult {
                key: key.to_string(),
            });
        }
        Ok(table)
    }

    /// Strip unused fields, sort by date and collapse repeated days.
    ///
    /// A failure here means the provider sent something unusable.
    fn prepare(&self, key: &str, fetched: &DataFrame) -> Result<DataFrame, DataError> {
        let sorted = sort_by_date(&strip_unused_columns(fetched, self.unused_columns.as_slice())?)?;
        let table = dedup_dates(&sorted)?;
        if table.height() < sorted.height() {
            tracing::warn!(
                key,
                dropped = sorted.height() - table.height(),
                "provider repeated dates, keeping the last row of each"
            );
        }
        Ok(table)
    }

    /// Turn a failed fetch into a no-write outcome.
    fn recover(key: &str, phase: SyncPhase, err: DataError) -> SyncOutcome {
        match err {
            DataError::ProviderEmptyResult { .. } => {
                tracing::warn!(key, %phase, "provider returned no data, nothing written");
                SyncOutcome::Empty { phase }
            }
            other => {
                tracing::warn!(key, %phase, error = %other, "fetch failed, nothing written");
                SyncOutcome::Unavailable {
                    phase,
                    reason: other.to_string(),
                }
            }
        }
    }

    /// Last stored date, from the sidecar when there is one.
    fn last_stored_date(&self, key: &str) -> Result<Option<NaiveDate>, DataError> {
        let library = self.library()?;
        if let Some(meta) = library.collection_meta(key)? {
            return Ok(Some(meta.last_date));
        }
        let stored = library.read_full(key)?;
        Ok(date_values(&stored)?.into_iter().max())
    }
}
