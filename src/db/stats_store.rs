use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::models::StoredStat;
use crate::error::{AppError, Result};
use crate::types::CombinedStat;

/// Keyed access to `daily_stats`, one row per (date, campaign_id).
#[derive(Debug, Clone)]
pub struct StatsStore {
    pool: SqlitePool,
}

impl StatsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the stat, or overwrite spend/conversions/cpa of the existing row.
    /// A single statement, so each call is atomic.
    pub async fn upsert(&self, stat: &CombinedStat) -> Result<StoredStat> {
        let conversions =
            i64::try_from(stat.conversions).map_err(|_| AppError::ConversionOverflow {
                date: stat.date,
                campaign_id: stat.campaign_id.clone(),
            })?;

        let row = sqlx::query_as::<_, StoredStat>(
            r#"
            INSERT INTO daily_stats (date, campaign_id, spend, conversions, cpa)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(date, campaign_id) DO UPDATE SET
                spend = excluded.spend,
                conversions = excluded.conversions,
                cpa = excluded.cpa
            RETURNING date, campaign_id, spend, conversions, cpa
            "#,
        )
        .bind(stat.date)
        .bind(&stat.campaign_id)
        .bind(stat.spend)
        .bind(conversions)
        .bind(stat.cpa)
        .fetch_one(&self.pool)
        .await?;

        debug!(date = %row.date, campaign_id = %row.campaign_id, "Upserted daily stat");
        Ok(row)
    }

    pub async fn get(&self, date: NaiveDate, campaign_id: &str) -> Result<Option<StoredStat>> {
        let row = sqlx::query_as::<_, StoredStat>(
            r#"
            SELECT date, campaign_id, spend, conversions, cpa
            FROM daily_stats
            WHERE date = ? AND campaign_id = ?
            "#,
        )
        .bind(date)
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Every stored row, ordered by (date, campaign_id).
    pub async fn list_all(&self) -> Result<Vec<StoredStat>> {
        let rows = sqlx::query_as::<_, StoredStat>(
            r#"
            SELECT date, campaign_id, spend, conversions, cpa
            FROM daily_stats
            ORDER BY date, campaign_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
