//! Table helpers shared by the provider, the stores and the sync engine.
//!
//! Tables are Polars DataFrames keyed by a `date` column. On the fetch and
//! persistence paths `date` holds the provider's native string form; `read`
//! hands callers a proper `Date` column produced by [`parse_date`].

use super::provider::DataError;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::HashSet;

pub const DATE_COLUMN: &str = "date";

/// Columns kept in every stored collection, in storage order.
pub const RETAINED_COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

/// Provider-computed derivatives that are never persisted.
pub const UNUSED_COLUMNS: [&str; 9] = [
    "price_change",
    "p_change",
    "ma5",
    "ma10",
    "ma20",
    "v_ma5",
    "v_ma10",
    "v_ma20",
    "turnover",
];

const SORT_KEY: &str = "__date_key";

/// `NaiveDate::num_days_from_ce` of 1970-01-01, the Polars `Date` epoch.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse a stored or provider-native date string into a calendar date.
///
/// This is the single canonical date routine: every date that leaves the
/// store goes through it.
pub fn parse_date(raw: &str) -> Result<NaiveDate, DataError> {
    let s = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    Err(DataError::InvalidDate(raw.to_string()))
}

/// Days since 1970-01-01, the physical representation of a Polars `Date`.
pub fn epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

/// Inverse of [`epoch_days`].
pub fn from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + EPOCH_DAYS_FROM_CE)
}

/// Parse every row of the string `date` column.
pub fn date_values(df: &DataFrame) -> Result<Vec<NaiveDate>, DataError> {
    let column = df
        .column(DATE_COLUMN)
        .map_err(|_| DataError::MissingColumn(DATE_COLUMN.into()))?;
    let strings = column
        .str()
        .map_err(|e| DataError::Table(format!("date column type: {e}")))?;

    strings
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Some(s) => parse_date(s),
            None => Err(DataError::InvalidDate(format!("null at row {i}"))),
        })
        .collect()
}

/// Return a copy of `df` without the named columns.
///
/// Names that aren't present are ignored: provider schemas drift, and
/// pruning must not fail because a derivative column went missing.
pub fn strip_unused_columns<S: AsRef<str>>(
    df: &DataFrame,
    fields: &[S],
) -> Result<DataFrame, DataError> {
    let keep: Vec<PlSmallStr> = df
        .get_column_names()
        .into_iter()
        .filter(|name| !fields.iter().any(|f| f.as_ref() == name.as_str()))
        .cloned()
        .collect();
    Ok(df.select(keep)?)
}

/// Sort rows ascending by parsed date. Ties keep their input order.
pub fn sort_by_date(df: &DataFrame) -> Result<DataFrame, DataError> {
    let keys: Vec<i32> = date_values(df)?.into_iter().map(epoch_days).collect();

    let mut keyed = df.clone();
    keyed.with_column(Column::new(SORT_KEY.into(), keys))?;
    let sorted = keyed.sort(
        [SORT_KEY],
        SortMultipleOptions::default().with_maintain_order(true),
    )?;
    Ok(sorted.drop(SORT_KEY)?)
}

/// Replace the string `date` column with a canonical `Date` column.
pub fn normalize_dates(df: &DataFrame) -> Result<DataFrame, DataError> {
    let days: Vec<i32> = date_values(df)?.into_iter().map(epoch_days).collect();
    let dates = Column::new(DATE_COLUMN.into(), days).cast(&DataType::Date)?;

    let mut out = df.clone();
    out.with_column(dates)?;
    Ok(out)
}

/// Keep only rows dated strictly after `after`.
pub fn rows_after(df: &DataFrame, after: NaiveDate) -> Result<DataFrame, DataError> {
    let mask: Vec<bool> = date_values(df)?.into_iter().map(|d| d > after).collect();
    let mask = BooleanChunked::from_slice("mask".into(), &mask);
    Ok(df.filter(&mask)?)
}

/// Fail with `DuplicateDateAppend` if any calendar day appears twice.
///
/// Different spellings of the same day count as the same date.
pub fn ensure_unique_dates(df: &DataFrame, key: &str) -> Result<(), DataError> {
    let mut seen = HashSet::new();
    for date in date_values(df)? {
        if !seen.insert(date) {
            return Err(DataError::DuplicateDateAppend {
                key: key.to_string(),
                date,
            });
        }
    }
    Ok(())
}

/// Drop repeated days from a date-sorted table, keeping the last row of each.
pub fn dedup_dates(df: &DataFrame) -> Result<DataFrame, DataError> {
    let dates = date_values(df)?;
    let mask: Vec<bool> = dates
        .iter()
        .enumerate()
        .map(|(i, date)| dates.get(i + 1) != Some(date))
        .collect();
    if mask.iter().all(|keep| *keep) {
        return Ok(df.clone());
    }
    let mask = BooleanChunked::from_slice("mask".into(), &mask);
    Ok(df.filter(&mask)?)
}

/// Append `delta` to `existing`, enforcing the collection invariants.
///
/// The delta is aligned to the existing column order, must not repeat any
/// stored date (or any of its own), and must start strictly after the last
/// stored date so the collection stays in chronological order.
pub fn append_rows(
    existing: &DataFrame,
    delta: &DataFrame,
    key: &str,
) -> Result<DataFrame, DataError> {
    let delta = sort_by_date(delta)?;
    let stored = date_values(existing)?;
    let incoming = date_values(&delta)?;

    let mut seen: HashSet<NaiveDate> = stored.iter().copied().collect();
    for date in &incoming {
        if !seen.insert(*date) {
            return Err(DataError::DuplicateDateAppend {
                key: key.to_string(),
                date: *date,
            });
        }
    }

    if let (Some(last), Some(first)) = (stored.iter().max(), incoming.first()) {
        if first <= last {
            return Err(DataError::OutOfOrderAppend {
                key: key.to_string(),
                date: *first,
                last: *last,
            });
        }
    }

    let names: Vec<PlSmallStr> = existing.get_column_names().into_iter().cloned().collect();
    let aligned = delta
        .select(names)
        .map_err(|e| DataError::Table(format!("delta for '{key}' does not match stored schema: {e}")))?;
    Ok(existing.vstack(&aligned)?)
}
