//! SQLite persistence: the shared connection handle, the schema, and the
//! keyed daily-stats table.

pub mod models;
pub mod stats_store;

pub use models::{FreshnessRecord, StoredStat};
pub use stats_store::StatsStore;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS daily_stats (
        date        TEXT    NOT NULL,
        campaign_id TEXT    NOT NULL,
        spend       REAL    NOT NULL,
        conversions INTEGER NOT NULL,
        cpa         REAL,
        PRIMARY KEY (date, campaign_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_freshness (
        date           TEXT    PRIMARY KEY,
        last_synced_at TEXT    NOT NULL,
        is_complete    INTEGER NOT NULL DEFAULT 0
    )
    "#,
];

/// Owned database handle, opened at process start and closed at exit.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the SQLite file at `path`, creating it if missing, and ensure the schema.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // Single writer, single reader: one connection is all a run needs.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        info!("Database ready at {path}");
        Ok(db)
    }

    /// Private in-memory database. The pool is pinned to one connection that
    /// never expires, since every connection would otherwise get its own empty DB.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
