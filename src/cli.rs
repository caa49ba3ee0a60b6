use chrono::NaiveDate;
use clap::Parser;

use crate::types::DateRange;

#[derive(Parser, Debug)]
#[command(
    name = "adsync",
    version,
    about = "Sync daily ad spend and conversions into the local stats database"
)]
pub struct Cli {
    /// First date to process (YYYY-MM-DD). Filters the fetched feed data.
    #[arg(long, value_parser = parse_date)]
    pub start_date: Option<NaiveDate>,

    /// Last date to process (YYYY-MM-DD). Filters the fetched feed data.
    #[arg(long, value_parser = parse_date)]
    pub end_date: Option<NaiveDate>,

    /// SQLite database file; overrides DB_PATH.
    #[arg(long)]
    pub db_path: Option<String>,
}

impl Cli {
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}
