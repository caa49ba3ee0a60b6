use std::time::Duration;

use crate::error::{AppError, Result};

pub const SPEND_FEED_URL: &str = "https://179c1438-5a21-4e5c-b700-3412c1473e22.mock.pstmn.io/fb_spend";
pub const CONVERSIONS_FEED_URL: &str =
    "https://179c1438-5a21-4e5c-b700-3412c1473e22.mock.pstmn.io/network_conv";

/// A date synced longer ago than this is reprocessed even if marked complete.
pub const FRESHNESS_TTL_HOURS: i64 = 24;

/// Per-request timeout for feed fetches (seconds).
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub spend_feed_url: String,
    pub conversions_feed_url: String,
    pub db_path: String,
    pub log_level: String,
    /// Mirror of the console log (LOG_FILE). `None` when set to an empty string.
    pub log_file: Option<String>,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_file = std::env::var("LOG_FILE").unwrap_or_else(|_| "app_sync.log".to_string());
        let fetch_timeout_secs = std::env::var("FETCH_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_FETCH_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Config("FETCH_TIMEOUT_SECS must be a whole number of seconds".to_string())
            })?;

        Ok(Self {
            spend_feed_url: std::env::var("SPEND_FEED_URL")
                .unwrap_or_else(|_| SPEND_FEED_URL.to_string()),
            conversions_feed_url: std::env::var("CONVERSIONS_FEED_URL")
                .unwrap_or_else(|_| CONVERSIONS_FEED_URL.to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "adsync.db".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_file: if log_file.trim().is_empty() { None } else { Some(log_file) },
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
        })
    }
}
