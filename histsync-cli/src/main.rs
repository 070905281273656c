//! histsync CLI: sync, read and inspect the local daily-history store.
//!
//! Commands:
//! - `sync`: bootstrap or delta-sync instruments into the store
//! - `read`: print a stored collection with canonical dates
//! - `status`: report collections, row counts and date ranges
//! - `members`: print the configured index constituents

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use histsync_core::data::{DataProvider, HistFeedProvider, ParquetStore, TimeSeriesStore};
use histsync_core::{SyncConfig, SyncEngine};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "histsync",
    about = "Keep a local time-series copy of daily price history in sync"
)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory, overriding the config file.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Log level for histsync targets (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap new instruments and append yesterday for existing ones.
    Sync {
        /// Instrument keys (e.g. 000651 600519).
        keys: Vec<String>,

        /// Sync the index constituents instead of (or in addition to) KEYS.
        #[arg(long, default_value_t = false)]
        index: bool,

        /// Only sync the first N keys.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a stored collection.
    Read {
        key: String,

        /// Only print the last N rows.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// List stored collections with row counts and date ranges.
    Status,
    /// Print the index constituents.
    Members,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("histsync={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_ref(), cli.store_dir)?;
    tracing::debug!(
        library = %config.library,
        store_dir = %config.store_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Sync { keys, index, limit } => run_sync(&config, keys, index, limit),
        Commands::Read { key, tail } => run_read(&config, &key, tail),
        Commands::Status => run_status(&config),
        Commands::Members => run_members(&config),
    }
}

fn load_config(path: Option<&PathBuf>, store_dir: Option<PathBuf>) -> Result<SyncConfig> {
    let mut config = match path {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(dir) = store_dir {
        config.store_dir = dir;
    }
    Ok(config)
}

fn build_engine(config: &SyncConfig) -> Result<SyncEngine> {
    let provider = HistFeedProvider::new(&config.provider)?;
    let store = ParquetStore::new(&config.store_dir);
    Ok(SyncEngine::new(store, provider, config.library.clone())
        .with_unused_columns(config.unused_columns.clone()))
}

fn run_sync(
    config: &SyncConfig,
    mut keys: Vec<String>,
    index: bool,
    limit: Option<usize>,
) -> Result<()> {
    if index {
        let provider = HistFeedProvider::new(&config.provider)?;
        let members = provider
            .list_index_members()
            .context("listing index members")?;
        tracing::info!(count = members.len(), "loaded index members");
        for member in members {
            if !keys.contains(&member) {
                keys.push(member);
            }
        }
    }
    if keys.is_empty() {
        bail!("no keys to sync: pass KEYS or --index");
    }
    if let Some(limit) = limit {
        keys.truncate(limit);
    }

    let mut engine = build_engine(config)?;
    let summary = engine.sync_many(&keys);

    println!(
        "Synced {} keys into '{}': {} bootstrapped, {} appended, {} skipped, {} empty, {} unavailable, {} failed",
        summary.total,
        engine.library_name(),
        summary.bootstrapped,
        summary.appended,
        summary.skipped,
        summary.empty,
        summary.unavailable,
        summary.failed(),
    );

    if !summary.all_succeeded() {
        for (key, err) in &summary.errors {
            eprintln!("Error for {key}: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_read(config: &SyncConfig, key: &str, tail: Option<usize>) -> Result<()> {
    let mut engine = build_engine(config)?;
    let table = engine.read(key)?;
    let table = match tail {
        Some(n) => table.tail(Some(n)),
        None => table,
    };
    println!("{table}");
    Ok(())
}

fn run_status(config: &SyncConfig) -> Result<()> {
    let store = ParquetStore::new(&config.store_dir);
    if !store.library_exists(&config.library)? {
        println!(
            "Library '{}' does not exist under {}",
            config.library,
            config.store_dir.display()
        );
        return Ok(());
    }

    let library = store.open_library(&config.library)?;
    let keys = library.list_collection_keys()?;
    if keys.is_empty() {
        println!("Library '{}' is empty", config.library);
        return Ok(());
    }

    println!("Library: {} ({})", config.library, config.store_dir.display());
    println!("Collections: {}", keys.len());
    println!();
    println!("{:<10} {:<25} {:>8} {:<20}", "Key", "Date Range", "Rows", "Written");
    println!("{}", "-".repeat(66));
    for key in &keys {
        match library.collection_meta(key)? {
            Some(meta) => println!(
                "{:<10} {:<25} {:>8} {:<20}",
                key,
                format!("{} to {}", meta.first_date, meta.last_date),
                meta.row_count,
                meta.written_at.format("%Y-%m-%d %H:%M:%S"),
            ),
            None => println!("{:<10} {:<25} {:>8} {:<20}", key, "(no meta)", "-", "-"),
        }
    }

    Ok(())
}

fn run_members(config: &SyncConfig) -> Result<()> {
    let provider = HistFeedProvider::new(&config.provider)?;
    for member in provider.list_index_members()? {
        println!("{member}");
    }
    Ok(())
}
