//! Providers, tables and stores

pub mod hist_feed;
pub mod memory_store;
pub mod parquet_store;
pub mod provider;
pub mod retry;
pub mod store;
pub mod table;

pub use hist_feed::HistFeedProvider;
pub use memory_store::MemoryStore;
pub use parquet_store::ParquetStore;
pub use provider::{DataError, DataProvider};
pub use retry::RetryPolicy;
pub use store::{CollectionMeta, Library, TimeSeriesStore};
pub use table::{parse_date, strip_unused_columns, RETAINED_COLUMNS, UNUSED_COLUMNS};
