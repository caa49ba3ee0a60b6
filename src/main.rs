mod cli;
mod config;
mod db;
mod error;
mod fetcher;
mod freshness;
mod reconcile;
mod types;

use std::fs::{File, OpenOptions};
use std::path::Path;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::Cli;
use crate::config::Config;
use crate::db::{Database, StatsStore};
use crate::error::Result;
use crate::fetcher::HttpFeedSource;
use crate::freshness::FreshnessTracker;
use crate::reconcile::Reconciler;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    let log_guard = match init_tracing(&cfg) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Log file error ({}): {e}", cfg.log_file.as_deref().unwrap_or_default());
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli, cfg).await {
        error!("Fatal error: {e}");
        // Flush the file log before exiting.
        drop(log_guard);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cfg: Config) -> Result<()> {
    info!("Starting ad stats sync");

    let range = cli.range();
    match (range.start, range.end) {
        (Some(start), Some(end)) => info!("Date range: {start} to {end}"),
        (Some(start), None) => info!("Start date: {start}"),
        (None, Some(end)) => info!("End date: {end}"),
        (None, None) => info!("No date range given, considering every date that needs a sync"),
    }
    if range.is_inverted() {
        warn!("Start date is after end date; no dates will match");
    }

    let db_path = cli.db_path.unwrap_or_else(|| cfg.db_path.clone());
    let db = Database::connect(&db_path).await?;
    let stats = StatsStore::new(db.pool().clone());
    let freshness = FreshnessTracker::new(db.pool().clone());
    let source = HttpFeedSource::from_config(&cfg)?;

    let summary = Reconciler::new(source, &stats, &freshness).reconcile(range).await;
    db.close().await;
    let summary = summary?;

    info!(
        outcome = ?summary.outcome,
        dates = summary.dates_processed.len(),
        stats = summary.stats_written,
        "Sync finished"
    );
    Ok(())
}

/// Console logging to stderr, mirrored to `cfg.log_file` when set.
/// The returned guard must live until exit so the file writer flushes.
fn init_tracing(cfg: &Config) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match cfg.log_file.as_deref() {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(Path::new(path))?);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(&cfg.log_level))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Open `path` for appending, creating it and its parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
