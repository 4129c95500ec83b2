//! Job to roll raw samples up into hourly, daily, weekly and monthly KPIs.
//!
//! Only active buckets are recomputed: the trailing hourly window, the current
//! day, the current ISO week and the current month. Everything older is
//! finalized and never touched again.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::db::{
    models::{GameId, RawSample, Rollup, RollupUpdateResult, Source, Watermark},
    KpiStore, RollupCommit,
};
use crate::error::PipelineError;
use crate::utils::{Granularity, Windows};

/// Running avg/peak/min/count over one bucket.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: u64,
    peak: u64,
    min: u64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            peak: 0,
            min: u64::MAX,
        }
    }
}

impl Accumulator {
    fn add_sample(&mut self, value: u64) {
        self.sum += value as f64;
        self.count += 1;
        self.peak = self.peak.max(value);
        self.min = self.min.min(value);
    }

    /// Folds in a finer rollup, weighting its average by its sample count.
    fn add_rollup(&mut self, rollup: &Rollup) {
        self.sum += rollup.avg_metric * rollup.sample_count as f64;
        self.count += rollup.sample_count;
        self.peak = self.peak.max(rollup.peak_metric);
        self.min = self.min.min(rollup.min_metric);
    }

    fn into_rollup(
        self,
        source: Source,
        game_id: GameId,
        granularity: Granularity,
        bucket_start: DateTime<Utc>,
    ) -> Option<Rollup> {
        // Sparse: empty buckets are never written
        if self.count == 0 {
            return None;
        }
        Some(Rollup {
            source,
            game_id,
            granularity,
            bucket_start,
            avg_metric: self.sum / self.count as f64,
            peak_metric: self.peak,
            min_metric: self.min,
            sample_count: self.count,
            periods_tracked: None,
        })
    }
}

/// Recomputes the active rollup buckets of `source` as of `as_of`.
///
/// - hourly: every hour bucket inside the trailing window, from raw samples
/// - daily: the current day, from raw samples
/// - weekly/monthly: the current week/month, from the daily rollups of the
///   period (with today's freshly computed values)
///
/// Samples newer than the watermark but captured before the current day
/// belong to a finalized day; they are marked discarded and excluded from
/// every rollup, including later recomputations of the hourly window.
///
/// The first run of a source (no watermark yet) has nothing finalized: it
/// bootstraps every bucket covered by the retained raw samples.
///
/// Running this twice with the same inputs and `as_of` yields the same
/// stored state. Nothing is written unless every read succeeded.
pub fn update_rollups(
    store: &dyn KpiStore,
    windows: &Windows,
    source: Source,
    as_of: DateTime<Utc>,
) -> Result<RollupUpdateResult, PipelineError> {
    info!("Starting update_rollups job for {} (as of {})...", source, as_of);

    let start = std::time::Instant::now();
    let unavailable = |reason| PipelineError::TransientSourceUnavailable {
        platform: source,
        reason,
    };

    let watermark = store.watermark(source).map_err(unavailable)?;
    let last_seq = watermark.as_ref().map(|w| w.last_seq);
    let bootstrap = watermark.is_none();

    let hour_window_start = windows.hourly_window_start(as_of);
    let hour_window_end = Granularity::Hourly.bucket_end(Granularity::Hourly.bucket_start(as_of));
    let day_start = Granularity::Daily.bucket_start(as_of);
    let day_end = Granularity::Daily.bucket_end(day_start);

    // The current day must be read whole even when the hourly window is shorter
    let samples = store
        .fetch_samples(source, hour_window_start.min(day_start), last_seq)
        .map_err(unavailable)?;

    let mut accepted: Vec<&RawSample> = Vec::with_capacity(samples.len());
    let mut discarded = Vec::new();
    for sample in &samples {
        let is_new = last_seq.map_or(true, |seq| sample.seq > seq);
        if !bootstrap && is_new && sample.captured_at < day_start {
            debug!(
                "Discarding late {} sample for game {} captured at {} (day finalized)",
                source, sample.game_id, sample.captured_at
            );
            discarded.push(sample.seq);
        } else {
            accepted.push(sample);
        }
    }

    if bootstrap {
        info!(
            "First rollup run for {}, bootstrapping from {} retained samples",
            source,
            accepted.len()
        );
    }

    if !discarded.is_empty() {
        warn!(
            "Discarded {} late {} samples captured before {} (finalized days are immutable)",
            discarded.len(),
            source,
            day_start
        );
    }

    let (hourly_from, daily_from) = if bootstrap {
        (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MIN_UTC)
    } else {
        (hour_window_start, day_start)
    };

    let hourly = aggregate_samples(
        source,
        Granularity::Hourly,
        accepted
            .iter()
            .copied()
            .filter(|s| s.captured_at >= hourly_from && s.captured_at < hour_window_end),
    );

    let daily = aggregate_samples(
        source,
        Granularity::Daily,
        accepted
            .iter()
            .copied()
            .filter(|s| s.captured_at >= daily_from && s.captured_at < day_end),
    );

    let weekly = aggregate_periods(store, source, Granularity::Weekly, as_of, &daily)?;
    let monthly = aggregate_periods(store, source, Granularity::Monthly, as_of, &daily)?;

    let mut peaks: BTreeMap<GameId, u64> = BTreeMap::new();
    for rollup in hourly.iter().chain(daily.iter()) {
        let peak = peaks.entry(rollup.game_id.clone()).or_insert(0);
        *peak = (*peak).max(rollup.peak_metric);
    }

    let result = RollupUpdateResult {
        hourly_written: hourly.len(),
        daily_written: daily.len(),
        weekly_written: weekly.len(),
        monthly_written: monthly.len(),
        late_discarded: discarded.len(),
    };

    let max_seq = samples.iter().map(|s| s.seq).max();
    let next_seq = match (last_seq, max_seq) {
        (Some(a), Some(b)) => a.max(b),
        (a, b) => a.or(b).unwrap_or(0),
    };

    let mut rollups = hourly;
    rollups.extend(daily);
    rollups.extend(weekly);
    rollups.extend(monthly);

    store.commit(RollupCommit {
        source,
        rollups,
        discarded,
        peaks: peaks.into_iter().collect(),
        watermark: Watermark::new(source, next_seq, as_of),
    })?;

    info!(
        "Completed update_rollups job for {} in {:?} ({} hourly, {} daily, {} weekly, {} monthly, {} late)",
        source,
        start.elapsed(),
        result.hourly_written,
        result.daily_written,
        result.weekly_written,
        result.monthly_written,
        result.late_discarded
    );
    Ok(result)
}

/// Groups raw samples by (game, bucket) and aggregates each group.
fn aggregate_samples<'a>(
    source: Source,
    granularity: Granularity,
    samples: impl Iterator<Item = &'a RawSample>,
) -> Vec<Rollup> {
    let mut buckets: BTreeMap<(DateTime<Utc>, GameId), Accumulator> = BTreeMap::new();
    for sample in samples {
        let bucket_start = granularity.bucket_start(sample.captured_at);
        buckets
            .entry((bucket_start, sample.game_id.clone()))
            .or_default()
            .add_sample(sample.value);
    }

    buckets
        .into_iter()
        .filter_map(|((bucket_start, game_id), acc)| {
            acc.into_rollup(source, game_id, granularity, bucket_start)
        })
        .collect()
}

/// Rebuilds the current week or month, plus any earlier period touched by
/// `fresh` (only on bootstrap), from the daily rollups of each period.
fn aggregate_periods(
    store: &dyn KpiStore,
    source: Source,
    granularity: Granularity,
    as_of: DateTime<Utc>,
    fresh: &[Rollup],
) -> Result<Vec<Rollup>, PipelineError> {
    let mut periods: BTreeSet<DateTime<Utc>> = fresh
        .iter()
        .map(|r| granularity.bucket_start(r.bucket_start))
        .collect();
    periods.insert(granularity.bucket_start(as_of));

    let mut rollups = Vec::new();
    for period_start in periods {
        rollups.extend(aggregate_period(store, source, granularity, period_start, fresh)?);
    }
    Ok(rollups)
}

/// Aggregates one week or month from its daily rollups.
///
/// Stored dailies of the period are used as-is (finalized days), except that
/// rows present in `fresh` replace them. `periods_tracked` counts the days
/// (weekly) or ISO weeks (monthly) with data.
fn aggregate_period(
    store: &dyn KpiStore,
    source: Source,
    granularity: Granularity,
    period_start: DateTime<Utc>,
    fresh: &[Rollup],
) -> Result<Vec<Rollup>, PipelineError> {
    let period_end = granularity.bucket_end(period_start);
    let in_period = |r: &Rollup| r.bucket_start >= period_start && r.bucket_start < period_end;

    let mut days: BTreeMap<(GameId, DateTime<Utc>), Rollup> = store
        .rollups(source, Granularity::Daily, Some(period_start))
        .map_err(|reason| PipelineError::TransientSourceUnavailable {
            platform: source,
            reason,
        })?
        .into_iter()
        .filter(|r| in_period(r))
        .map(|r| ((r.game_id.clone(), r.bucket_start), r))
        .collect();
    for rollup in fresh.iter().filter(|r| in_period(*r)) {
        days.insert((rollup.game_id.clone(), rollup.bucket_start), rollup.clone());
    }

    let mut per_game: FxHashMap<GameId, (Accumulator, BTreeSet<DateTime<Utc>>)> =
        FxHashMap::default();
    for ((game_id, day), rollup) in &days {
        let (acc, tracked) = per_game.entry(game_id.clone()).or_default();
        acc.add_rollup(rollup);
        tracked.insert(match granularity {
            Granularity::Monthly => Granularity::Weekly.bucket_start(*day),
            _ => *day,
        });
    }

    let mut rollups: Vec<Rollup> = per_game
        .into_iter()
        .filter_map(|(game_id, (acc, tracked))| {
            let mut rollup = acc.into_rollup(source, game_id, granularity, period_start)?;
            rollup.periods_tracked = Some(tracked.len() as u32);
            Some(rollup)
        })
        .collect();
    rollups.sort_by(|a, b| a.game_id.cmp(&b.game_id));
    Ok(rollups)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::db::{models::NewSample, MemoryStore, StoreError};

    fn ts(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, h, m, 0).unwrap()
    }

    fn stored(store: &MemoryStore, granularity: Granularity) -> Vec<Rollup> {
        store.rollups(Source::Steam, granularity, None).unwrap()
    }

    fn seed(store: &MemoryStore, game: u64, at: DateTime<Utc>, values: &[u64]) {
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, v)| NewSample::new(Source::Steam, game, at + TimeDelta::minutes(i as i64), *v))
            .collect();
        store.append_samples(samples).unwrap();
    }

    #[test]
    fn test_hourly_rollup_from_raw() {
        let store = MemoryStore::new();
        seed(&store, 730, ts(15, 10, 0), &[100, 150, 120]);

        let result =
            update_rollups(&store, &Windows::default(), Source::Steam, ts(15, 10, 30)).unwrap();
        assert_eq!(result.hourly_written, 1);
        assert_eq!(result.daily_written, 1);
        assert_eq!(result.weekly_written, 1);
        assert_eq!(result.monthly_written, 1);

        let hourly = stored(&store, Granularity::Hourly);
        assert_eq!(hourly[0].bucket_start, ts(15, 10, 0));
        assert!((hourly[0].avg_metric - 123.333).abs() < 0.01);
        assert_eq!(hourly[0].peak_metric, 150);
        assert_eq!(hourly[0].min_metric, 100);
        assert_eq!(hourly[0].sample_count, 3);
    }

    #[test]
    fn test_update_is_idempotent() {
        let store = MemoryStore::new();
        seed(&store, 730, ts(15, 9, 0), &[10, 20]);
        seed(&store, 570, ts(15, 10, 0), &[5, 7, 9]);
        let as_of = ts(15, 10, 45);

        update_rollups(&store, &Windows::default(), Source::Steam, as_of).unwrap();
        let first = store.snapshot_json().unwrap();
        update_rollups(&store, &Windows::default(), Source::Steam, as_of).unwrap();
        assert_eq!(first, store.snapshot_json().unwrap());
    }

    #[test]
    fn test_late_sample_does_not_change_finalized_day() {
        let store = MemoryStore::new();
        let windows = Windows::default();
        seed(&store, 730, ts(15, 10, 0), &[100, 150, 120]);
        update_rollups(&store, &windows, Source::Steam, ts(15, 11, 0)).unwrap();
        let day_before = stored(&store, Granularity::Daily);

        let later = ts(17, 11, 0);
        update_rollups(&store, &windows, Source::Steam, later).unwrap();

        store
            .append_samples(vec![NewSample::new(Source::Steam, 730, ts(15, 10, 30), 500)])
            .unwrap();
        let result = update_rollups(&store, &windows, Source::Steam, later).unwrap();
        assert_eq!(result.late_discarded, 1);

        let day_after = stored(&store, Granularity::Daily);
        assert_eq!(day_before, day_after);
        assert_eq!(day_after[0].peak_metric, 150);
        assert_eq!(day_after[0].sample_count, 3);
    }

    #[test]
    fn test_late_sample_excluded_from_hourly_window() {
        let store = MemoryStore::new();
        let windows = Windows::default();
        seed(&store, 730, ts(15, 22, 0), &[100]);
        update_rollups(&store, &windows, Source::Steam, ts(15, 22, 30)).unwrap();

        // Yesterday's hour is still inside the 48h window, but the day is finalized
        store
            .append_samples(vec![NewSample::new(Source::Steam, 730, ts(15, 22, 40), 900)])
            .unwrap();
        let result = update_rollups(&store, &windows, Source::Steam, ts(16, 1, 0)).unwrap();
        assert_eq!(result.late_discarded, 1);

        // And stays excluded on the following run
        update_rollups(&store, &windows, Source::Steam, ts(16, 2, 0)).unwrap();
        let hourly = stored(&store, Granularity::Hourly);
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].peak_metric, 100);

        let daily = stored(&store, Granularity::Daily);
        let hourly_max = hourly.iter().map(|r| r.peak_metric).max().unwrap();
        assert_eq!(daily[0].peak_metric, hourly_max);
    }

    #[test]
    fn test_weekly_and_monthly_merge_daily_rollups() {
        let store = MemoryStore::new();
        let windows = Windows::default();
        // Wednesday and Thursday of the same ISO week
        seed(&store, 730, ts(15, 10, 0), &[100, 200]);
        update_rollups(&store, &windows, Source::Steam, ts(15, 23, 0)).unwrap();
        seed(&store, 730, ts(16, 10, 0), &[400]);
        update_rollups(&store, &windows, Source::Steam, ts(16, 12, 0)).unwrap();

        let weekly = stored(&store, Granularity::Weekly);
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].bucket_start, ts(13, 0, 0));
        assert_eq!(weekly[0].peak_metric, 400);
        assert_eq!(weekly[0].min_metric, 100);
        assert_eq!(weekly[0].sample_count, 3);
        assert!((weekly[0].avg_metric - 700.0 / 3.0).abs() < 1e-9);
        assert_eq!(weekly[0].periods_tracked, Some(2));

        let monthly = stored(&store, Granularity::Monthly);
        assert_eq!(monthly[0].bucket_start, ts(1, 0, 0));
        assert_eq!(monthly[0].peak_metric, 400);
        assert_eq!(monthly[0].sample_count, 3);
        assert_eq!(monthly[0].periods_tracked, Some(1));
        assert_eq!(stored(&store, Granularity::Daily)[0].periods_tracked, None);
    }

    #[test]
    fn test_short_hourly_window_keeps_whole_day() {
        let store = MemoryStore::new();
        let windows = Windows {
            hourly_window_hours: 6,
            retention_days: 7,
        };
        seed(&store, 730, ts(15, 2, 0), &[900]);
        update_rollups(&store, &windows, Source::Steam, ts(15, 2, 0)).unwrap();
        seed(&store, 730, ts(15, 20, 0), &[100]);
        update_rollups(&store, &windows, Source::Steam, ts(15, 20, 0)).unwrap();

        let daily = stored(&store, Granularity::Daily);
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].peak_metric, 900);
        assert_eq!(daily[0].min_metric, 100);
        assert_eq!(daily[0].sample_count, 2);

        let weekly = stored(&store, Granularity::Weekly);
        assert_eq!(weekly[0].peak_metric, 900);
        assert_eq!(weekly[0].sample_count, 2);
    }

    #[test]
    fn test_first_run_bootstraps_retained_days() {
        let store = MemoryStore::new();
        // Sunday 12th closes the previous ISO week; 13th-15th are this week
        seed(&store, 730, ts(12, 23, 0), &[50]);
        seed(&store, 730, ts(14, 9, 0), &[300, 100]);
        seed(&store, 730, ts(15, 10, 0), &[200]);

        let result =
            update_rollups(&store, &Windows::default(), Source::Steam, ts(15, 11, 0)).unwrap();
        assert_eq!(result.late_discarded, 0);
        assert_eq!(result.daily_written, 3);
        assert_eq!(result.weekly_written, 2);
        assert_eq!(result.monthly_written, 1);

        let weekly = stored(&store, Granularity::Weekly);
        assert_eq!(weekly[0].bucket_start, ts(6, 0, 0));
        assert_eq!(weekly[0].peak_metric, 50);
        assert_eq!(weekly[1].bucket_start, ts(13, 0, 0));
        assert_eq!(weekly[1].peak_metric, 300);
        assert_eq!(weekly[1].periods_tracked, Some(2));

        let monthly = stored(&store, Granularity::Monthly);
        assert_eq!(monthly[0].sample_count, 4);
        assert_eq!(monthly[0].periods_tracked, Some(2));
        assert_eq!(store.all_time_peaks(Source::Steam).unwrap().get(&GameId::from(730)), Some(&300));

        // Once bootstrapped, later samples for past days are late again
        store
            .append_samples(vec![NewSample::new(Source::Steam, 730, ts(14, 9, 30), 999)])
            .unwrap();
        let next =
            update_rollups(&store, &Windows::default(), Source::Steam, ts(15, 12, 0)).unwrap();
        assert_eq!(next.late_discarded, 1);
    }

    #[test]
    fn test_empty_buckets_are_not_written() {
        let store = MemoryStore::new();
        let result =
            update_rollups(&store, &Windows::default(), Source::Steam, ts(15, 10, 0)).unwrap();
        assert_eq!(result.total_written(), 0);
        assert!(stored(&store, Granularity::Daily).is_empty());
        assert_eq!(store.watermark(Source::Steam).unwrap().unwrap().last_seq, 0);
    }

    #[test]
    fn test_all_time_peak_is_running_max() {
        let store = MemoryStore::new();
        let windows = Windows::default();
        seed(&store, 730, ts(15, 10, 0), &[900]);
        update_rollups(&store, &windows, Source::Steam, ts(15, 10, 30)).unwrap();
        seed(&store, 730, ts(16, 10, 0), &[300]);
        update_rollups(&store, &windows, Source::Steam, ts(16, 10, 30)).unwrap();

        let peaks = store.all_time_peaks(Source::Steam).unwrap();
        assert_eq!(peaks.get(&GameId::from(730)), Some(&900));
    }

    /// Delegates to a [`MemoryStore`] but cannot read raw samples.
    struct UnavailableStore(MemoryStore);

    impl KpiStore for UnavailableStore {
        fn append_samples(&self, samples: Vec<NewSample>) -> Result<usize, StoreError> {
            self.0.append_samples(samples)
        }
        fn fetch_samples(
            &self,
            _source: Source,
            _captured_since: DateTime<Utc>,
            _after_seq: Option<u64>,
        ) -> Result<Vec<RawSample>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn rollups(
            &self,
            source: Source,
            granularity: Granularity,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Rollup>, StoreError> {
            self.0.rollups(source, granularity, since)
        }
        fn watermark(&self, source: Source) -> Result<Option<Watermark>, StoreError> {
            self.0.watermark(source)
        }
        fn all_time_peaks(&self, source: Source) -> Result<FxHashMap<GameId, u64>, StoreError> {
            self.0.all_time_peaks(source)
        }
        fn commit(&self, commit: RollupCommit) -> Result<(), StoreError> {
            self.0.commit(commit)
        }
        fn prune_samples(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
            self.0.prune_samples(before)
        }
        fn prune_rollups(
            &self,
            granularity: Granularity,
            before: DateTime<Utc>,
        ) -> Result<usize, StoreError> {
            self.0.prune_rollups(granularity, before)
        }
        fn metadata(&self) -> Result<Vec<crate::db::models::GameMetadata>, StoreError> {
            self.0.metadata()
        }
        fn upsert_metadata(
            &self,
            records: Vec<crate::db::models::GameMetadata>,
        ) -> Result<usize, StoreError> {
            self.0.upsert_metadata(records)
        }
    }

    #[test]
    fn test_unavailable_source_writes_nothing() {
        let store = UnavailableStore(MemoryStore::new());
        seed(&store.0, 730, ts(15, 10, 0), &[100]);
        let before = store.0.snapshot_json().unwrap();

        let err = update_rollups(&store, &Windows::default(), Source::Steam, ts(15, 10, 30))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TransientSourceUnavailable {
                platform: Source::Steam,
                ..
            }
        ));
        assert!(err.is_transient());
        assert_eq!(before, store.0.snapshot_json().unwrap());
    }
}
