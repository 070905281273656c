//! China A-share daily history feed.
//!
//! Fetches daily records from the `akdaily` endpoint that backs the classic
//! `get_hist_data` call. Each record carries OHLCV plus provider-computed
//! derivatives (price change, moving averages, turnover). The feed ignores
//! date bounds, so range filtering happens client-side.
//!
//! Requests go through the configured [`RetryPolicy`].

use super::provider::{DataError, DataProvider};
use super::retry::RetryPolicy;
use super::table::{parse_date, DATE_COLUMN};
use crate::config::ProviderConfig;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Deserialize;
use std::time::Duration;

/// Field order of one `record` row.
const FEED_COLUMNS: [&str; 15] = [
    "date",
    "open",
    "high",
    "close",
    "low",
    "volume",
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

/// Index rows stop at `volume`; anything narrower is not a price record.
const MIN_FEED_WIDTH: usize = 6;

/// `akdaily` response body.
#[derive(Debug, Deserialize)]
struct DailyResponse {
    record: Option<Vec<Vec<serde_json::Value>>>,
}

/// HTTP provider for the daily-history feed.
pub struct HistFeedProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    index_members_url: Option<String>,
    retry: RetryPolicy,
}

impl HistFeedProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            index_members_url: config.index_members_url.clone(),
            retry: config.retry,
        })
    }

    /// Exchange prefix for a six-digit code: Shanghai for 5/6/9, Shenzhen otherwise.
    pub fn exchange_prefix(key: &str) -> &'static str {
        match key.chars().next() {
            Some('5') | Some('6') | Some('9') => "sh",
            _ => "sz",
        }
    }

    fn daily_url(&self, key: &str) -> String {
        format!(
            "{}/akdaily/?code={}{key}&type=last",
            self.base_url,
            Self::exchange_prefix(key)
        )
    }

    /// GET `url` and return the body, retrying transient failures.
    fn get_text(&self, url: &str) -> Result<String, DataError> {
        self.retry.run(|attempt| {
            tracing::debug!(url, attempt, "requesting");
            let resp = self
                .client
                .get(url)
                .send()
                .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;
            let status = resp.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(DataError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }

            if status.is_server_error() {
                return Err(DataError::ServerError {
                    status: status.as_u16(),
                });
            }

            if !status.is_success() {
                return Err(DataError::ResponseFormatChanged(format!("HTTP {status} for {url}")));
            }

            resp.text()
                .map_err(|e| DataError::NetworkUnreachable(e.to_string()))
        })
    }
}

/// Numeric cell: JSON number, or string with optional thousands separators.
fn cell_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    }
}

/// Parse an `akdaily` body into a table, keeping rows within `[start, end]`.
fn parse_daily(
    key: &str,
    body: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DataFrame, DataError> {
    let resp: DailyResponse = serde_json::from_str(body).map_err(|e| {
        DataError::ResponseFormatChanged(format!("failed to parse response for {key}: {e}"))
    })?;
    let records = resp.record.unwrap_or_default();

    let width = records
        .first()
        .map(|row| row.len().min(FEED_COLUMNS.len()))
        .unwrap_or(FEED_COLUMNS.len());
    if width < MIN_FEED_WIDTH {
        return Err(DataError::ResponseFormatChanged(format!(
            "record for {key} has {width} fields, expected at least {MIN_FEED_WIDTH}"
        )));
    }

    let mut dates: Vec<String> = Vec::with_capacity(records.len());
    let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(records.len()); width - 1];

    for row in &records {
        if row.len() < width {
            return Err(DataError::ResponseFormatChanged(format!(
                "ragged record for {key}: {} fields, expected {width}",
                row.len()
            )));
        }

        let raw_date = row[0]
            .as_str()
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("non-string date for {key}")))?;
        let date = parse_date(raw_date)?;
        if start.is_some_and(|s| date < s) || end.is_some_and(|e| date > e) {
            continue;
        }

        dates.push(raw_date.to_string());
        for (i, (column, cell)) in values.iter_mut().zip(&row[1..width]).enumerate() {
            let name = FEED_COLUMNS[i + 1];
            let value = match cell_number(cell) {
                Some(v) => v,
                // Derivatives are stripped before persistence.
                None if i + 1 >= MIN_FEED_WIDTH => f64::NAN,
                None => {
                    return Err(DataError::ResponseFormatChanged(format!(
                        "non-numeric {name} {cell} for {key} on {raw_date}"
                    )))
                }
            };
            column.push(value);
        }
    }

    let mut columns = Vec::with_capacity(width);
    columns.push(Column::new(DATE_COLUMN.into(), dates));
    for (name, column) in FEED_COLUMNS[1..width].iter().zip(values) {
        columns.push(Column::new((*name).into(), column));
    }
    Ok(DataFrame::new(columns)?)
}

/// Extract the `code` column of an index-constituent CSV, zero-padded to six digits.
fn parse_index_members(body: &str) -> Result<Vec<String>, DataError> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| DataError::ResponseFormatChanged(format!("index CSV header: {e}")))?;
    let code_idx = headers
        .iter()
        .position(|h| h.trim() == "code")
        .ok_or_else(|| DataError::MissingColumn("code".into()))?;

    let mut codes = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| DataError::ResponseFormatChanged(format!("index CSV row: {e}")))?;
        if let Some(code) = record.get(code_idx).map(str::trim).filter(|c| !c.is_empty()) {
            codes.push(format!("{code:0>6}"));
        }
    }
    Ok(codes)
}

impl DataProvider for HistFeedProvider {
    fn name(&self) -> &str {
        "hist_feed"
    }

    fn fetch_range(
        &self,
        key: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DataFrame, DataError> {
        let body = self.get_text(&self.daily_url(key))?;
        let table = parse_daily(key, &body, start, end)?;
        tracing::debug!(key, rows = table.height(), ?start, ?end, "fetched daily history");
        Ok(table)
    }

    fn list_index_members(&self) -> Result<Vec<String>, DataError> {
        let url = self
            .index_members_url
            .as_deref()
            .ok_or_else(|| DataError::Config("provider.index_members_url is not set".into()))?;
        parse_index_members(&self.get_text(url)?)
    }
}
