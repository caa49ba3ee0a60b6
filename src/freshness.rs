use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::FRESHNESS_TTL_HOURS;
use crate::db::models::FreshnessRecord;
use crate::error::Result;

/// Why a date does or does not need another sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// No freshness record yet.
    Missing,
    /// Last sync was recorded as partial.
    Incomplete,
    /// Complete, but older than the TTL.
    Stale,
    /// Complete and within the TTL; skip.
    Fresh,
}

impl SyncDecision {
    pub fn needs_sync(self) -> bool {
        !matches!(self, SyncDecision::Fresh)
    }

    /// Pure freshness policy over an optional existing record.
    pub fn evaluate(record: Option<&FreshnessRecord>, now: DateTime<Utc>) -> Self {
        match record {
            None => SyncDecision::Missing,
            Some(r) if !r.is_complete => SyncDecision::Incomplete,
            Some(r) if now - r.last_synced_at > Duration::hours(FRESHNESS_TTL_HOURS) => {
                SyncDecision::Stale
            }
            Some(_) => SyncDecision::Fresh,
        }
    }
}

impl std::fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncDecision::Missing => "missing",
            SyncDecision::Incomplete => "incomplete",
            SyncDecision::Stale => "stale",
            SyncDecision::Fresh => "fresh",
        };
        write!(f, "{s}")
    }
}

/// Per-date sync bookkeeping in `sync_freshness`.
#[derive(Debug, Clone)]
pub struct FreshnessTracker {
    pool: SqlitePool,
}

impl FreshnessTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, date: NaiveDate) -> Result<Option<FreshnessRecord>> {
        let record = sqlx::query_as::<_, FreshnessRecord>(
            r#"
            SELECT date, last_synced_at, is_complete
            FROM sync_freshness
            WHERE date = ?
            "#,
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn check(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<SyncDecision> {
        let record = self.get(date).await?;
        let decision = SyncDecision::evaluate(record.as_ref(), now);
        match &record {
            Some(r) => info!(
                %date,
                decision = %decision,
                last_synced_at = %r.last_synced_at.to_rfc3339(),
                is_complete = r.is_complete,
                "Freshness check"
            ),
            None => info!(%date, decision = %decision, "Freshness check"),
        }
        Ok(decision)
    }

    pub async fn needs_sync(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.check(date, now).await?.needs_sync())
    }

    /// Upsert the record for `date` with `last_synced_at = now`.
    pub async fn mark_synced(
        &self,
        date: NaiveDate,
        complete: bool,
        now: DateTime<Utc>,
    ) -> Result<FreshnessRecord> {
        let record = sqlx::query_as::<_, FreshnessRecord>(
            r#"
            INSERT INTO sync_freshness (date, last_synced_at, is_complete)
            VALUES (?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                last_synced_at = excluded.last_synced_at,
                is_complete = excluded.is_complete
            RETURNING date, last_synced_at, is_complete
            "#,
        )
        .bind(date)
        .bind(now)
        .bind(complete)
        .fetch_one(&self.pool)
        .await?;

        debug!(%date, complete, "Marked date synced");
        Ok(record)
    }
}
