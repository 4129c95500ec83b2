//! Job to build per-game leaderboards from the rollup history.
//!
//! Rankings are fully recomputed on every cycle and only persisted through
//! the export job.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::db::{
    models::{GameId, GameMetadata, Ranking, RankingCriterion, RankingScope, Source},
    KpiStore,
};
use crate::error::PipelineError;
use crate::utils::Granularity;

/// Builds the leaderboard for `scope`, sorted by `criterion` descending with
/// ties broken by ascending game id.
///
/// Single source:
/// - avg_peak: mean of the monthly peak over every monthly bucket so far
/// - all_time_peak: running extremum kept by the rollup job
/// - days_tracked: distinct finalized days (before the day of `as_of`) with a
///   daily rollup
///
/// Unified: per-source entries merged by canonical id. Peaks are summed
/// across platforms, so Steam players and Twitch viewers add up into one
/// approximate popularity signal. days_tracked is the max across platforms.
pub fn build_rankings(
    store: &dyn KpiStore,
    scope: RankingScope,
    criterion: RankingCriterion,
    as_of: DateTime<Utc>,
) -> Result<Vec<Ranking>, PipelineError> {
    let start = std::time::Instant::now();
    let metadata = store.metadata()?;

    let mut rankings = match scope {
        RankingScope::Source(source) => source_rankings(store, source, &metadata, as_of)?,
        RankingScope::Unified => unified_rankings(store, &metadata, as_of)?,
    };
    sort_rankings(&mut rankings, criterion);

    info!(
        "Built {} ranking with {} games in {:?}",
        scope,
        rankings.len(),
        start.elapsed()
    );
    Ok(rankings)
}

fn source_rankings(
    store: &dyn KpiStore,
    source: Source,
    metadata: &[GameMetadata],
    as_of: DateTime<Utc>,
) -> Result<Vec<Ranking>, PipelineError> {
    let today = Granularity::Daily.bucket_start(as_of);

    let mut monthly_peaks: BTreeMap<GameId, Vec<u64>> = BTreeMap::new();
    for rollup in store.rollups(source, Granularity::Monthly, None)? {
        monthly_peaks
            .entry(rollup.game_id)
            .or_default()
            .push(rollup.peak_metric);
    }

    let mut finalized_days: FxHashMap<GameId, BTreeSet<DateTime<Utc>>> = FxHashMap::default();
    for rollup in store.rollups(source, Granularity::Daily, None)? {
        if rollup.bucket_start < today {
            finalized_days
                .entry(rollup.game_id)
                .or_default()
                .insert(rollup.bucket_start);
        }
    }

    let all_time_peaks = store.all_time_peaks(source)?;
    let names: FxHashMap<&GameId, &str> = metadata
        .iter()
        .filter_map(|m| m.platform_id(source).map(|id| (id, m.display_name.as_str())))
        .collect();

    let rankings = monthly_peaks
        .into_iter()
        .map(|(game_id, peaks)| {
            let avg_peak = peaks.iter().sum::<u64>() as f64 / peaks.len() as f64;
            let monthly_max = peaks.iter().copied().max().unwrap_or(0);
            let all_time_peak = all_time_peaks
                .get(&game_id)
                .copied()
                .unwrap_or(0)
                .max(monthly_max);
            let days_tracked = finalized_days.get(&game_id).map_or(0, |d| d.len() as u32);
            Ranking {
                display_name: names.get(&game_id).map(|n| n.to_string()),
                game_id,
                avg_peak,
                all_time_peak,
                days_tracked,
            }
        })
        .collect();

    Ok(rankings)
}

fn unified_rankings(
    store: &dyn KpiStore,
    metadata: &[GameMetadata],
    as_of: DateTime<Utc>,
) -> Result<Vec<Ranking>, PipelineError> {
    let mut merged: BTreeMap<GameId, Ranking> = BTreeMap::new();
    let mut misses = 0usize;

    for source in Source::ALL {
        let canonical: FxHashMap<&GameId, &GameMetadata> = metadata
            .iter()
            .filter_map(|m| m.platform_id(source).map(|id| (id, m)))
            .collect();

        for ranking in source_rankings(store, source, metadata, as_of)? {
            let (key, display_name) = match canonical.get(&ranking.game_id) {
                Some(meta) => (meta.canonical_id.clone(), Some(meta.display_name.clone())),
                None => {
                    debug!(
                        "No metadata for {} game {}, ranking without descriptive fields",
                        source, ranking.game_id
                    );
                    misses += 1;
                    (GameId::new(format!("{}:{}", source, ranking.game_id)), None)
                },
            };

            let entry = merged.entry(key.clone()).or_insert_with(|| Ranking {
                game_id: key,
                display_name,
                avg_peak: 0.0,
                all_time_peak: 0,
                days_tracked: 0,
            });
            entry.avg_peak += ranking.avg_peak;
            entry.all_time_peak += ranking.all_time_peak;
            entry.days_tracked = entry.days_tracked.max(ranking.days_tracked);
        }
    }

    if misses > 0 {
        warn!(
            "{} games have no metadata row; unified ranking keeps them under source-scoped ids",
            misses
        );
    }

    Ok(merged.into_values().collect())
}

fn sort_rankings(rankings: &mut [Ranking], criterion: RankingCriterion) {
    rankings.sort_by(|a, b| {
        let primary = match criterion {
            RankingCriterion::AvgPeak => b.avg_peak.total_cmp(&a.avg_peak),
            RankingCriterion::AllTimePeak => b.all_time_peak.cmp(&a.all_time_peak),
        };
        primary.then_with(|| a.game_id.cmp(&b.game_id))
    });
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::db::{models::Rollup, models::Watermark, MemoryStore, RollupCommit};

    fn ts(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, m, d, 0, 0, 0).unwrap()
    }

    fn rollup(
        source: Source,
        game: &str,
        granularity: Granularity,
        start: DateTime<Utc>,
        peak: u64,
    ) -> Rollup {
        Rollup {
            source,
            game_id: GameId::from(game),
            granularity,
            bucket_start: start,
            avg_metric: peak as f64,
            peak_metric: peak,
            min_metric: peak,
            sample_count: 1,
            periods_tracked: None,
        }
    }

    fn commit(store: &MemoryStore, source: Source, rollups: Vec<Rollup>) {
        store
            .commit(RollupCommit {
                source,
                rollups,
                discarded: vec![],
                peaks: vec![],
                watermark: Watermark::new(source, 0, ts(1, 1)),
            })
            .unwrap();
    }

    #[test]
    fn test_source_ranking_metrics() {
        let store = MemoryStore::new();
        commit(
            &store,
            Source::Steam,
            vec![
                rollup(Source::Steam, "730", Granularity::Monthly, ts(1, 1), 1000),
                rollup(Source::Steam, "730", Granularity::Monthly, ts(2, 1), 2000),
                rollup(Source::Steam, "730", Granularity::Daily, ts(2, 3), 2000),
                rollup(Source::Steam, "730", Granularity::Daily, ts(2, 4), 1500),
                // In progress, not finalized yet
                rollup(Source::Steam, "730", Granularity::Daily, ts(2, 5), 1200),
            ],
        );

        let rankings = build_rankings(
            &store,
            RankingScope::Source(Source::Steam),
            RankingCriterion::AvgPeak,
            ts(2, 5),
        )
        .unwrap();
        assert_eq!(rankings.len(), 1);
        assert_eq!(rankings[0].avg_peak, 1500.0);
        assert_eq!(rankings[0].all_time_peak, 2000);
        assert_eq!(rankings[0].days_tracked, 2);
        assert_eq!(rankings[0].display_name, None);
    }

    #[test]
    fn test_ties_break_by_ascending_game_id() {
        let store = MemoryStore::new();
        commit(
            &store,
            Source::Steam,
            vec![
                rollup(Source::Steam, "1000", Granularity::Monthly, ts(1, 1), 500),
                rollup(Source::Steam, "730", Granularity::Monthly, ts(1, 1), 500),
                rollup(Source::Steam, "570", Granularity::Monthly, ts(1, 1), 900),
            ],
        );

        let scope = RankingScope::Source(Source::Steam);
        let first = build_rankings(&store, scope, RankingCriterion::AvgPeak, ts(1, 20)).unwrap();
        let ids: Vec<&str> = first.iter().map(|r| r.game_id.as_str()).collect();
        assert_eq!(ids, vec!["570", "730", "1000"]);

        let second = build_rankings(&store, scope, RankingCriterion::AvgPeak, ts(1, 20)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unified_sums_peaks_across_sources() {
        let store = MemoryStore::new();
        store
            .upsert_metadata(vec![GameMetadata::new(1905, "Counter-Strike 2")
                .with_platform_id(Source::Steam, 730)
                .with_platform_id(Source::Twitch, "32399")])
            .unwrap();
        commit(
            &store,
            Source::Steam,
            vec![rollup(Source::Steam, "730", Granularity::Monthly, ts(1, 1), 1000)],
        );
        commit(
            &store,
            Source::Twitch,
            vec![rollup(Source::Twitch, "32399", Granularity::Monthly, ts(1, 1), 5000)],
        );

        let rankings = build_rankings(
            &store,
            RankingScope::Unified,
            RankingCriterion::AllTimePeak,
            ts(1, 20),
        )
        .unwrap();
        assert_eq!(rankings.len(), 1);
        assert_eq!(rankings[0].game_id, GameId::from(1905));
        assert_eq!(rankings[0].all_time_peak, 6000);
        assert_eq!(rankings[0].avg_peak, 6000.0);
        assert_eq!(rankings[0].display_name.as_deref(), Some("Counter-Strike 2"));
    }

    #[test]
    fn test_unified_keeps_games_without_metadata() {
        let store = MemoryStore::new();
        commit(
            &store,
            Source::Twitch,
            vec![rollup(Source::Twitch, "509658", Granularity::Monthly, ts(1, 1), 42)],
        );

        let rankings = build_rankings(
            &store,
            RankingScope::Unified,
            RankingCriterion::AvgPeak,
            ts(1, 20),
        )
        .unwrap();
        assert_eq!(rankings.len(), 1);
        assert_eq!(rankings[0].game_id.as_str(), "twitch:509658");
        assert_eq!(rankings[0].display_name, None);
    }
}
