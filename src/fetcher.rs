use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::types::{ConversionRecord, SpendRecord, MAX_CONVERSIONS};

/// The two upstream feeds. Implementations never fail: any transport or
/// payload problem degrades to an empty list.
pub trait FeedSource {
    fn fetch_spend(&self) -> impl Future<Output = Vec<SpendRecord>>;
    fn fetch_conversions(&self) -> impl Future<Output = Vec<ConversionRecord>>;
}

// ---------------------------------------------------------------------------
// Wire rows
// ---------------------------------------------------------------------------

/// A loosely-typed feed row, checked into its record type before use.
trait FeedRow: DeserializeOwned {
    type Record;
    fn validate(self) -> std::result::Result<Self::Record, String>;
}

#[derive(Debug, Deserialize)]
struct SpendRow {
    date: String,
    campaign_id: String,
    spend: f64,
}

impl FeedRow for SpendRow {
    type Record = SpendRecord;

    fn validate(self) -> std::result::Result<SpendRecord, String> {
        let date = parse_feed_date(&self.date)?;
        if !self.spend.is_finite() || self.spend < 0.0 {
            return Err(format!("spend must be a non-negative amount, got {}", self.spend));
        }
        Ok(SpendRecord { date, campaign_id: self.campaign_id, spend: self.spend })
    }
}

#[derive(Debug, Deserialize)]
struct ConversionRow {
    date: String,
    campaign_id: String,
    conversions: u64,
}

impl FeedRow for ConversionRow {
    type Record = ConversionRecord;

    fn validate(self) -> std::result::Result<ConversionRecord, String> {
        let date = parse_feed_date(&self.date)?;
        if self.conversions > MAX_CONVERSIONS {
            return Err(format!("conversions out of range, got {}", self.conversions));
        }
        Ok(ConversionRecord { date, campaign_id: self.campaign_id, conversions: self.conversions })
    }
}

fn parse_feed_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("bad date {s:?}: {e}"))
}

// ---------------------------------------------------------------------------
// Fetch failures (logged, never returned to callers)
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
enum FeedError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(reqwest::Error),
    #[error("bad status {0}")]
    Status(reqwest::StatusCode),
    #[error("payload is not a JSON array of rows: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("row {index} rejected: {reason}")]
    InvalidRow { index: usize, reason: String },
    #[error("request failed: {0}")]
    Other(reqwest::Error),
}

impl FeedError {
    fn kind(&self) -> &'static str {
        match self {
            FeedError::Timeout => "timeout",
            FeedError::Connect(_) => "connect",
            FeedError::Status(_) => "status",
            FeedError::Decode(_) | FeedError::InvalidRow { .. } => "decode",
            FeedError::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FeedError::Timeout
        } else if e.is_connect() {
            FeedError::Connect(e)
        } else if let Some(status) = e.status() {
            FeedError::Status(status)
        } else {
            FeedError::Other(e)
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpFeedSource {
    client: reqwest::Client,
    spend_url: String,
    conversions_url: String,
}

impl HttpFeedSource {
    pub fn new(spend_url: String, conversions_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, spend_url, conversions_url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.spend_feed_url.clone(), cfg.conversions_feed_url.clone(), cfg.fetch_timeout)
    }

    /// GET `url` and parse the body into records, or log why not and return empty.
    async fn fetch_feed<R: FeedRow>(&self, feed: &str, url: &str) -> Vec<R::Record> {
        info!(feed, url, "Fetching feed");
        match self.try_fetch_feed::<R>(url).await {
            Ok(records) => {
                info!(feed, url, count = records.len(), "Feed fetched");
                records
            }
            Err(e) => {
                error!(feed, url, kind = e.kind(), "Feed fetch failed, treating as empty: {e}");
                Vec::new()
            }
        }
    }

    async fn try_fetch_feed<R: FeedRow>(
        &self,
        url: &str,
    ) -> std::result::Result<Vec<R::Record>, FeedError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status(status));
        }
        let body = resp.text().await?;
        parse_rows::<R>(&body)
    }
}

impl FeedSource for HttpFeedSource {
    async fn fetch_spend(&self) -> Vec<SpendRecord> {
        self.fetch_feed::<SpendRow>("spend", &self.spend_url).await
    }

    async fn fetch_conversions(&self) -> Vec<ConversionRecord> {
        self.fetch_feed::<ConversionRow>("conversions", &self.conversions_url).await
    }
}

/// One bad row rejects the whole payload.
fn parse_rows<R: FeedRow>(body: &str) -> std::result::Result<Vec<R::Record>, FeedError> {
    let rows: Vec<R> = serde_json::from_str(body)?;
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| row.validate().map_err(|reason| FeedError::InvalidRow { index, reason }))
        .collect()
}
