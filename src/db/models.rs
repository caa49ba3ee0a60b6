//! Database row types for the two persisted tables.
//! Used by sqlx for typed queries.
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredStat {
    pub date: NaiveDate,
    pub campaign_id: String,
    pub spend: f64,
    pub conversions: i64,
    pub cpa: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FreshnessRecord {
    pub date: NaiveDate,
    pub last_synced_at: DateTime<Utc>,
    pub is_complete: bool,
}
