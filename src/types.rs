use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Feed records
// ---------------------------------------------------------------------------

/// One row of the ad-spend feed. Several rows may share a (date, campaign) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendRecord {
    pub date: NaiveDate,
    pub campaign_id: String,
    pub spend: f64,
}

/// One row of the conversions feed. Same duplication rule as `SpendRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub date: NaiveDate,
    pub campaign_id: String,
    pub conversions: u64,
}

// ---------------------------------------------------------------------------
// Combined daily statistic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedStat {
    pub date: NaiveDate,
    pub campaign_id: String,
    pub spend: f64,
    pub conversions: u64,
    /// `spend / conversions`; `None` whenever there were no conversions.
    pub cpa: Option<f64>,
}

impl CombinedStat {
    pub fn new(date: NaiveDate, campaign_id: String, spend: f64, conversions: u64) -> Self {
        Self {
            date,
            campaign_id,
            spend,
            conversions,
            cpa: cost_per_acquisition(spend, conversions),
        }
    }
}

/// Largest conversion count the stats table can hold (an SQLite INTEGER).
pub const MAX_CONVERSIONS: u64 = i64::MAX as u64;

pub fn cost_per_acquisition(spend: f64, conversions: u64) -> Option<f64> {
    if conversions > 0 {
        Some(spend / conversions as f64)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Date range filter
// ---------------------------------------------------------------------------

/// Inclusive date bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    /// True when both bounds are set and no date can satisfy them.
    pub fn is_inverted(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s > e)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.start, self.end) {
            (Some(s), Some(e)) => write!(f, "{s} to {e}"),
            (Some(s), None) => write!(f, "from {s}"),
            (None, Some(e)) => write!(f, "up to {e}"),
            (None, None) => write!(f, "all dates"),
        }
    }
}
