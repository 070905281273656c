//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over market-data sources so the sync engine
//! can be pointed at the live history feed or at a scripted fake in tests.

use chrono::NaiveDate;
use polars::prelude::{DataFrame, PolarsError};
use thiserror::Error;

/// Structured error types for fetch, store and table operations.
///
/// These are designed to be displayable in CLI output and log lines alike.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider returned HTTP {status}")]
    ServerError { status: u16 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("provider returned no rows for '{key}'")]
    ProviderEmptyResult { key: String },

    #[error("provider unavailable after {attempts} attempt(s): {reason}")]
    ProviderUnavailable { attempts: u32, reason: String },

    #[error("no stored collection for '{key}'; run `sync {key}` first")]
    CollectionNotFound { key: String },

    #[error("library '{name}' does not exist")]
    LibraryNotFound { name: String },

    #[error("append to '{key}' would duplicate date {date}")]
    DuplicateDateAppend { key: String, date: NaiveDate },

    #[error("append to '{key}' is out of order: {date} is not after {last}")]
    OutOfOrderAppend {
        key: String,
        date: NaiveDate,
        last: NaiveDate,
    },

    #[error("invalid date '{0}'")]
    InvalidDate(String),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("config error: {0}")]
    Config(String),
}

impl DataError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_)
                | DataError::RateLimited { .. }
                | DataError::ServerError { .. }
        )
    }
}

impl From<PolarsError> for DataError {
    fn from(e: PolarsError) -> Self {
        DataError::Table(e.to_string())
    }
}

/// Trait for market-data providers.
///
/// Implementations handle the specifics of talking to one source, including
/// their own retry budget. The store sits beside this trait; providers don't
/// know about persistence.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily records for `key` between `start` and `end` inclusive.
    ///
    /// `None` on either bound means "as far as the provider goes". The returned
    /// table has a string `date` column in the provider's native format; row
    /// order is whatever the provider emits. Zero rows is a valid answer.
    fn fetch_range(
        &self,
        key: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame, DataError>;

    /// Instrument keys of the tracked index, used to pick a sync universe.
    fn list_index_members(&self) -> Result<Vec<String>, DataError>;
}
