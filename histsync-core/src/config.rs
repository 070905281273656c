//! Serializable sync configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid config.

use crate::data::provider::DataError;
use crate::data::retry::RetryPolicy;
use crate::data::table::UNUSED_COLUMNS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Library holding the CN equities daily collections.
pub const DEFAULT_LIBRARY: &str = "ts_his_lib";

/// Top-level configuration for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Name of the library that holds one collection per instrument.
    pub library: String,

    /// Root directory of the Parquet store.
    pub store_dir: PathBuf,

    /// Columns stripped from every fetched table before it is persisted.
    pub unused_columns: Vec<String>,

    pub provider: ProviderConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            library: DEFAULT_LIBRARY.to_string(),
            store_dir: PathBuf::from("data"),
            unused_columns: UNUSED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            provider: ProviderConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, DataError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DataError::Config(format!("parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DataError> {
        if self.library.trim().is_empty() {
            return Err(DataError::Config("library name must not be empty".into()));
        }
        if self.provider.base_url.trim().is_empty() {
            return Err(DataError::Config("provider.base_url must not be empty".into()));
        }
        Ok(())
    }
}

/// Settings for the HTTP history feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Scheme and host of the daily-history feed.
    pub base_url: String,

    /// CSV of index constituents with a `code` column.
    pub index_members_url: Option<String>,

    /// Per-request HTTP timeout.
    pub timeout_secs: u64,

    pub retry: RetryPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://api.finance.ifeng.com".to_string(),
            index_members_url: None,
            timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}
