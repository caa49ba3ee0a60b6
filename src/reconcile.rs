use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::db::StatsStore;
use crate::error::{AppError, Result};
use crate::fetcher::FeedSource;
use crate::freshness::FreshnessTracker;
use crate::types::{CombinedStat, ConversionRecord, DateRange, SpendRecord, MAX_CONVERSIONS};

/// Where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Both feeds came back empty.
    NoData,
    /// Every date was out of range or already fresh.
    NothingToProcess,
    /// Dates were selected but no records fell on them.
    NoStats,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub dates_processed: Vec<NaiveDate>,
    pub stats_written: usize,
    pub outcome: Outcome,
}

impl ReconcileSummary {
    fn stopped(outcome: Outcome) -> Self {
        Self { dates_processed: Vec::new(), stats_written: 0, outcome }
    }
}

/// Running totals for one (date, campaign_id) key.
#[derive(Debug, Default)]
struct Accumulator {
    spend: f64,
    conversions: u64,
}

/// Merges the spend and conversions feeds into per-campaign daily stats.
pub struct Reconciler<'a, S> {
    source: S,
    stats: &'a StatsStore,
    freshness: &'a FreshnessTracker,
}

impl<'a, S: FeedSource> Reconciler<'a, S> {
    pub fn new(source: S, stats: &'a StatsStore, freshness: &'a FreshnessTracker) -> Self {
        Self { source, stats, freshness }
    }

    pub async fn reconcile(&self, range: DateRange) -> Result<ReconcileSummary> {
        self.reconcile_at(range, Utc::now()).await
    }

    /// One full pass with `now` as the clock for freshness checks and updates.
    /// Persistence errors abort the pass; rows already written stay written.
    pub async fn reconcile_at(
        &self,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> Result<ReconcileSummary> {
        info!("Fetching spend feed...");
        let spend = self.source.fetch_spend().await;
        info!("Fetching conversions feed...");
        let conversions = self.source.fetch_conversions().await;

        if spend.is_empty() && conversions.is_empty() {
            warn!("Neither feed returned data, skipping reconciliation");
            return Ok(ReconcileSummary::stopped(Outcome::NoData));
        }

        let dates = self.select_dates(&spend, &conversions, range, now).await?;
        if dates.is_empty() {
            info!("No new or stale dates to process in {range}");
            return Ok(ReconcileSummary::stopped(Outcome::NothingToProcess));
        }
        info!(
            "Processing dates: {}",
            dates.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        );

        let combined = aggregate(&spend, &conversions, &dates)?;
        if combined.is_empty() {
            info!("No records left to store after filtering");
            return Ok(ReconcileSummary::stopped(Outcome::NoStats));
        }

        info!("Saving {} combined stats", combined.len());
        for stat in &combined {
            self.stats.upsert(stat).await?;
        }

        // Completeness is recorded unconditionally, even when one feed came
        // back empty because it failed. See DESIGN.md.
        for date in &dates {
            self.freshness.mark_synced(*date, true, now).await?;
        }

        info!("Reconciliation complete: {} dates, {} stats", dates.len(), combined.len());
        Ok(ReconcileSummary {
            dates_processed: dates.into_iter().collect(),
            stats_written: combined.len(),
            outcome: Outcome::Completed,
        })
    }

    /// Distinct feed dates, in ascending order, that are in `range` and need a sync.
    async fn select_dates(
        &self,
        spend: &[SpendRecord],
        conversions: &[ConversionRecord],
        range: DateRange,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<NaiveDate>> {
        let all_dates: BTreeSet<NaiveDate> = spend
            .iter()
            .map(|r| r.date)
            .chain(conversions.iter().map(|r| r.date))
            .collect();

        let mut selected = BTreeSet::new();
        for date in all_dates {
            if !range.contains(date) {
                debug!(%date, "Outside requested range, skipping");
                continue;
            }
            if self.freshness.needs_sync(date, now).await? {
                selected.insert(date);
            }
        }
        Ok(selected)
    }
}

/// Sum both feeds per (date, campaign_id) over `dates` and derive CPA.
/// Duplicate keys add up. Output is ordered by (date, campaign_id).
/// A conversion total beyond `MAX_CONVERSIONS` is an error.
pub fn aggregate(
    spend: &[SpendRecord],
    conversions: &[ConversionRecord],
    dates: &BTreeSet<NaiveDate>,
) -> Result<Vec<CombinedStat>> {
    let mut totals: BTreeMap<(NaiveDate, &str), Accumulator> = BTreeMap::new();

    for r in spend.iter().filter(|r| dates.contains(&r.date)) {
        totals.entry((r.date, r.campaign_id.as_str())).or_default().spend += r.spend;
    }
    for r in conversions.iter().filter(|r| dates.contains(&r.date)) {
        let acc = totals.entry((r.date, r.campaign_id.as_str())).or_default();
        acc.conversions = acc
            .conversions
            .checked_add(r.conversions)
            .filter(|total| *total <= MAX_CONVERSIONS)
            .ok_or_else(|| AppError::ConversionOverflow {
                date: r.date,
                campaign_id: r.campaign_id.clone(),
            })?;
    }

    Ok(totals
        .into_iter()
        .map(|((date, campaign_id), acc)| {
            CombinedStat::new(date, campaign_id.to_string(), acc.spend, acc.conversions)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, StoredStat};
    use chrono::Duration;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        "2025-06-07T09:00:00Z".parse().unwrap()
    }

    fn sp(date: &str, campaign: &str, spend: f64) -> SpendRecord {
        SpendRecord { date: d(date), campaign_id: campaign.to_string(), spend }
    }

    fn cv(date: &str, campaign: &str, conversions: u64) -> ConversionRecord {
        ConversionRecord { date: d(date), campaign_id: campaign.to_string(), conversions }
    }

    struct StaticFeed {
        spend: Vec<SpendRecord>,
        conversions: Vec<ConversionRecord>,
    }

    impl FeedSource for StaticFeed {
        async fn fetch_spend(&self) -> Vec<SpendRecord> {
            self.spend.clone()
        }

        async fn fetch_conversions(&self) -> Vec<ConversionRecord> {
            self.conversions.clone()
        }
    }

    struct Harness {
        db: Database,
        stats: StatsStore,
        freshness: FreshnessTracker,
    }

    impl Harness {
        async fn new() -> Self {
            let db = Database::in_memory().await.unwrap();
            let stats = StatsStore::new(db.pool().clone());
            let freshness = FreshnessTracker::new(db.pool().clone());
            Self { db, stats, freshness }
        }

        async fn run(
            &self,
            spend: Vec<SpendRecord>,
            conversions: Vec<ConversionRecord>,
            range: DateRange,
            at: DateTime<Utc>,
        ) -> ReconcileSummary {
            let feed = StaticFeed { spend, conversions };
            Reconciler::new(feed, &self.stats, &self.freshness)
                .reconcile_at(range, at)
                .await
                .unwrap()
        }

        async fn rows(&self) -> Vec<StoredStat> {
            self.stats.list_all().await.unwrap()
        }
    }

    // -- aggregation ---------------------------------------------------------

    #[test]
    fn duplicate_keys_sum_instead_of_overwrite() {
        let dates = BTreeSet::from([d("2025-06-04")]);
        let out = aggregate(
            &[sp("2025-06-04", "A", 10.0), sp("2025-06-04", "A", 5.5), sp("2025-06-04", "B", 1.0)],
            &[cv("2025-06-04", "A", 2), cv("2025-06-04", "A", 3)],
            &dates,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].campaign_id, "A");
        assert!((out[0].spend - 15.5).abs() < 1e-9);
        assert_eq!(out[0].conversions, 5);
        assert!((out[0].cpa.unwrap() - 3.1).abs() < 1e-9);
        assert_eq!(out[1].campaign_id, "B");
        assert_eq!(out[1].conversions, 0);
        assert_eq!(out[1].cpa, None);
    }

    #[test]
    fn one_sided_keys_get_defaults() {
        let dates = BTreeSet::from([d("2025-06-05"), d("2025-06-06")]);
        let out = aggregate(&[sp("2025-06-05", "S", 0.0)], &[cv("2025-06-06", "C", 0)], &dates)
            .unwrap();
        assert_eq!(out.len(), 2, "zero-valued keys still produce a stat");
        assert_eq!((out[0].spend, out[0].conversions, out[0].cpa), (0.0, 0, None));
        assert_eq!((out[1].spend, out[1].conversions, out[1].cpa), (0.0, 0, None));
    }

    #[test]
    fn records_on_unselected_dates_are_ignored() {
        let dates = BTreeSet::from([d("2025-06-05")]);
        let out = aggregate(
            &[sp("2025-06-04", "A", 1.0), sp("2025-06-05", "A", 2.0)],
            &[cv("2025-06-06", "A", 9)],
            &dates,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].date, d("2025-06-05"));
        assert_eq!(out[0].conversions, 0);
    }

    #[test]
    fn conversion_total_beyond_storable_range_is_an_error() {
        let dates = BTreeSet::from([d("2025-06-04")]);
        let at_limit = aggregate(
            &[],
            &[cv("2025-06-04", "A", MAX_CONVERSIONS - 1), cv("2025-06-04", "A", 1)],
            &dates,
        )
        .unwrap();
        assert_eq!(at_limit[0].conversions, MAX_CONVERSIONS);

        for extra in [MAX_CONVERSIONS, u64::MAX] {
            match aggregate(&[], &[cv("2025-06-04", "A", extra), cv("2025-06-04", "A", 1)], &dates) {
                Err(AppError::ConversionOverflow { date, campaign_id }) => {
                    assert_eq!(date, d("2025-06-04"));
                    assert_eq!(campaign_id, "A");
                }
                other => panic!("expected ConversionOverflow, got {other:?}"),
            }
        }
    }

    // -- scenarios -----------------------------------------------------------

    #[tokio::test]
    async fn scenario_matching_spend_and_conversions() {
        let h = Harness::new().await;
        let summary = h
            .run(
                vec![sp("2025-06-04", "CAMP-123", 37.50)],
                vec![cv("2025-06-04", "CAMP-123", 14)],
                DateRange::unbounded(),
                now(),
            )
            .await;
        assert_eq!(summary.outcome, Outcome::Completed);

        let rows = h.rows().await;
        assert_eq!(rows.len(), 1);
        assert!((rows[0].spend - 37.50).abs() < 1e-9);
        assert_eq!(rows[0].conversions, 14);
        assert!((rows[0].cpa.unwrap() - 2.679).abs() < 1e-3);
    }

    #[tokio::test]
    async fn scenario_spend_only() {
        let h = Harness::new().await;
        h.run(vec![sp("2025-06-05", "CAMP-789", 11.00)], vec![], DateRange::unbounded(), now())
            .await;

        let rows = h.rows().await;
        assert_eq!(rows.len(), 1);
        assert!((rows[0].spend - 11.0).abs() < 1e-9);
        assert_eq!(rows[0].conversions, 0);
        assert_eq!(rows[0].cpa, None);
    }

    #[tokio::test]
    async fn scenario_conversions_only() {
        let h = Harness::new().await;
        h.run(vec![], vec![cv("2025-06-06", "CAMP-888", 7)], DateRange::unbounded(), now())
            .await;

        let rows = h.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].spend, 0.0);
        assert_eq!(rows[0].conversions, 7);
        assert_eq!(rows[0].cpa, Some(0.0));
    }

    #[tokio::test]
    async fn scenario_single_day_range() {
        let h = Harness::new().await;
        let range = DateRange::new(Some(d("2025-06-05")), Some(d("2025-06-05")));
        let summary = h
            .run(
                vec![sp("2025-06-04", "A", 1.0), sp("2025-06-05", "A", 2.0), sp("2025-06-06", "A", 3.0)],
                vec![cv("2025-06-04", "B", 1), cv("2025-06-05", "B", 2), cv("2025-06-06", "B", 3)],
                range,
                now(),
            )
            .await;
        assert_eq!(summary.dates_processed, vec![d("2025-06-05")]);

        let rows = h.rows().await;
        assert!(rows.iter().all(|r| r.date == d("2025-06-05")));
        assert_eq!(rows.len(), 2);

        assert!(h.freshness.get(d("2025-06-04")).await.unwrap().is_none());
        assert!(h.freshness.get(d("2025-06-06")).await.unwrap().is_none());
        assert!(h.freshness.get(d("2025-06-05")).await.unwrap().unwrap().is_complete);
    }

    #[tokio::test]
    async fn scenario_fresh_date_is_skipped() {
        let h = Harness::new().await;
        let prior = h.freshness.mark_synced(d("2025-06-04"), true, now()).await.unwrap();

        let summary = h
            .run(
                vec![sp("2025-06-04", "CAMP-123", 37.5), sp("2025-06-05", "CAMP-123", 4.0)],
                vec![cv("2025-06-04", "CAMP-123", 14)],
                DateRange::unbounded(),
                now() + Duration::minutes(5),
            )
            .await;
        assert_eq!(summary.dates_processed, vec![d("2025-06-05")]);

        let rows = h.rows().await;
        assert!(rows.iter().all(|r| r.date != d("2025-06-04")));
        // The skipped date's freshness record is left exactly as it was.
        assert_eq!(h.freshness.get(d("2025-06-04")).await.unwrap(), Some(prior));
    }

    // -- freshness gating ----------------------------------------------------

    #[tokio::test]
    async fn rerun_within_ttl_is_a_noop() {
        let h = Harness::new().await;
        let spend = vec![sp("2025-06-04", "A", 5.0)];
        h.run(spend.clone(), vec![], DateRange::unbounded(), now()).await;

        let summary = h
            .run(spend, vec![], DateRange::unbounded(), now() + Duration::hours(1))
            .await;
        assert_eq!(summary.outcome, Outcome::NothingToProcess);
        assert!(summary.dates_processed.is_empty());
    }

    #[tokio::test]
    async fn stale_date_is_reprocessed_and_overwritten() {
        let h = Harness::new().await;
        h.run(vec![sp("2025-06-04", "A", 5.0)], vec![cv("2025-06-04", "A", 1)], DateRange::unbounded(), now())
            .await;

        let later = now() + Duration::hours(25);
        let summary = h
            .run(vec![sp("2025-06-04", "A", 8.0)], vec![cv("2025-06-04", "A", 4)], DateRange::unbounded(), later)
            .await;
        assert_eq!(summary.outcome, Outcome::Completed);

        let rows = h.rows().await;
        assert_eq!(rows.len(), 1);
        assert!((rows[0].spend - 8.0).abs() < 1e-9);
        assert_eq!(rows[0].conversions, 4);
        assert!((rows[0].cpa.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(h.freshness.get(d("2025-06-04")).await.unwrap().unwrap().last_synced_at, later);
    }

    #[tokio::test]
    async fn incomplete_date_is_reprocessed() {
        let h = Harness::new().await;
        h.freshness.mark_synced(d("2025-06-04"), false, now()).await.unwrap();

        let summary = h
            .run(vec![sp("2025-06-04", "A", 2.0)], vec![], DateRange::unbounded(), now())
            .await;
        assert_eq!(summary.dates_processed, vec![d("2025-06-04")]);
        assert!(h.freshness.get(d("2025-06-04")).await.unwrap().unwrap().is_complete);
    }

    // -- stop points ---------------------------------------------------------

    #[tokio::test]
    async fn empty_feeds_write_nothing() {
        let h = Harness::new().await;
        let summary = h.run(vec![], vec![], DateRange::unbounded(), now()).await;
        assert_eq!(summary.outcome, Outcome::NoData);
        assert!(h.rows().await.is_empty());
    }

    #[tokio::test]
    async fn all_dates_out_of_range_write_nothing() {
        let h = Harness::new().await;
        let range = DateRange::new(Some(d("2025-07-01")), None);
        let summary = h.run(vec![sp("2025-06-04", "A", 1.0)], vec![], range, now()).await;
        assert_eq!(summary.outcome, Outcome::NothingToProcess);
        assert!(h.rows().await.is_empty());
        assert!(h.freshness.get(d("2025-06-04")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_ended_bounds_filter_one_side() {
        let h = Harness::new().await;
        let spend = vec![sp("2025-06-04", "A", 1.0), sp("2025-06-05", "A", 1.0), sp("2025-06-06", "A", 1.0)];

        let summary = h
            .run(spend.clone(), vec![], DateRange::new(None, Some(d("2025-06-05"))), now())
            .await;
        assert_eq!(summary.dates_processed, vec![d("2025-06-04"), d("2025-06-05")]);

        let summary = h
            .run(spend, vec![], DateRange::new(Some(d("2025-06-05")), None), now())
            .await;
        // 06-05 is already fresh from the first run.
        assert_eq!(summary.dates_processed, vec![d("2025-06-06")]);
    }

    // Pins current behavior: a date is marked complete even when one feed
    // returned nothing (possibly because it failed).
    #[tokio::test]
    async fn one_empty_feed_still_marks_date_complete() {
        let h = Harness::new().await;
        h.run(vec![sp("2025-06-05", "CAMP-789", 11.0)], vec![], DateRange::unbounded(), now())
            .await;

        let record = h.freshness.get(d("2025-06-05")).await.unwrap().unwrap();
        assert!(record.is_complete);
        assert_eq!(record.last_synced_at, now());
    }

    #[tokio::test]
    async fn store_failure_aborts_before_marking_dates() {
        let h = Harness::new().await;
        sqlx::query("DROP TABLE daily_stats").execute(h.db.pool()).await.unwrap();

        let feed = StaticFeed {
            spend: vec![sp("2025-06-04", "A", 1.0), sp("2025-06-05", "A", 2.0)],
            conversions: vec![cv("2025-06-04", "A", 1)],
        };
        let result = Reconciler::new(feed, &h.stats, &h.freshness)
            .reconcile_at(DateRange::unbounded(), now())
            .await;
        assert!(matches!(result, Err(AppError::Database(_))), "got {result:?}");

        let (marked,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_freshness")
            .fetch_one(h.db.pool())
            .await
            .unwrap();
        assert_eq!(marked, 0, "no date may be marked synced after a failed write");
    }

    #[tokio::test]
    async fn tracker_failure_propagates() {
        let h = Harness::new().await;
        h.db.close().await;

        let feed = StaticFeed { spend: vec![sp("2025-06-04", "A", 1.0)], conversions: vec![] };
        let result = Reconciler::new(feed, &h.stats, &h.freshness)
            .reconcile_at(DateRange::unbounded(), now())
            .await;
        assert!(matches!(result, Err(AppError::Database(_))), "got {result:?}");
    }
}
