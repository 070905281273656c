//! histsync core: keeps a local time-series copy of daily price history.
//!
//! This crate contains:
//! - The sync engine: bootstrap-or-append per instrument key
//! - The provider trait and the HTTP daily-history feed, with a retry policy
//! - The time-series store traits and their Parquet and in-memory backends
//! - Table helpers: column pruning, canonical date parsing, ordered appends
//! - TOML configuration

pub mod clock;
pub mod config;
pub mod data;
pub mod sync;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ProviderConfig, SyncConfig};
pub use sync::{SyncEngine, SyncOutcome, SyncPhase, SyncSummary};
