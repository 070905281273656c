//! Time-series store traits.
//!
//! A store holds named libraries; a library holds one collection per
//! instrument key. Collections are date-ordered tables that can be written in
//! full, appended to, and read back. Every implementation shares the append
//! semantics of [`append_rows`](super::table::append_rows).

use super::provider::DataError;
use super::table::{date_values, ensure_unique_dates};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Metadata sidecar for a stored collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub key: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub row_count: usize,
    pub data_hash: String,
    pub written_at: chrono::NaiveDateTime,
}

impl CollectionMeta {
    /// Describe `table` as stored under `key`. `encoded` is the persisted byte form.
    /// Fails on a table that repeats a date.
    pub fn describe(key: &str, table: &DataFrame, encoded: &[u8]) -> Result<Self, DataError> {
        ensure_unique_dates(table, key)?;
        let dates = date_values(table)?;
        let (first_date, last_date) = match (dates.iter().min(), dates.iter().max()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(DataError::Store(format!(
                    "refusing to describe empty collection '{key}'"
                )))
            }
        };

        Ok(Self {
            key: key.to_string(),
            first_date,
            last_date,
            row_count: table.height(),
            data_hash: blake3::hash(encoded).to_hex().to_string(),
            written_at: chrono::Local::now().naive_local(),
        })
    }
}

/// Encode a table as Parquet bytes.
pub fn encode_parquet(table: &DataFrame) -> Result<Vec<u8>, DataError> {
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut table.clone())
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(buf)
}

/// Decode Parquet bytes into a table.
pub fn decode_parquet(bytes: Vec<u8>) -> Result<DataFrame, DataError> {
    ParquetReader::new(std::io::Cursor::new(bytes))
        .finish()
        .map_err(|e| DataError::Parquet(format!("read parquet: {e}")))
}

/// Handle to one library: the collections of one dataset.
pub trait Library: Send {
    /// Name of the library this handle is bound to.
    fn name(&self) -> &str;

    /// Whether a collection exists for `key`.
    fn has_collection(&self, key: &str) -> Result<bool, DataError>;

    /// Create or replace the collection for `key`. Empty tables are refused.
    fn write_full(&self, key: &str, table: &DataFrame) -> Result<(), DataError>;

    /// Append date-ordered rows. Fails on a date already present.
    fn append(&self, key: &str, table: &DataFrame) -> Result<(), DataError>;

    /// Read the whole collection, or `CollectionNotFound`.
    fn read_full(&self, key: &str) -> Result<DataFrame, DataError>;

    /// Keys of every collection in the library.
    fn list_collection_keys(&self) -> Result<BTreeSet<String>, DataError>;

    /// Sidecar metadata for `key`, if the collection has any.
    fn collection_meta(&self, key: &str) -> Result<Option<CollectionMeta>, DataError>;
}

/// A time-series store: a set of named libraries.
///
/// Handles are not meant to cross process boundaries; every worker opens its
/// own.
pub trait TimeSeriesStore: Send {
    fn library_exists(&self, name: &str) -> Result<bool, DataError>;

    /// Create `name` if missing. Creating an existing library is a no-op.
    fn create_library(&self, name: &str) -> Result<(), DataError>;

    /// Bind a handle to an existing library, or `LibraryNotFound`.
    fn open_library(&self, name: &str) -> Result<Box<dyn Library>, DataError>;

    fn list_libraries(&self) -> Result<Vec<String>, DataError>;
}
