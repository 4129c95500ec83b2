//! Job to export rollups and rankings as static JSON for the dashboard.
//!
//! Artifacts written to the destination directory:
//! - `<source>_<granularity>_kpis.json` for every exported source and
//!   granularity
//! - `rankings_<scope>.json` for every ranking view
//! - `latest_kpis.json`: daily KPIs of the last N days, all sources
//! - `game-metadata.json`
//!
//! Every file is an ordered array of flat objects. All files are staged as
//! temporaries and renamed into place only once every one of them was written,
//! so the dashboard never reads a half-written export.

use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use log::info;
use serde::Serialize;

use crate::db::models::{
    GameId, GameMetadata, Ranking, RankingScope, Rollup, Source,
};
use crate::error::PipelineError;
use crate::utils::{Granularity, StagedFiles};

/// Inputs for the artifacts beyond the per-granularity and ranking files.
#[derive(Debug, Clone, Copy)]
pub struct DashboardExtras<'a> {
    pub metadata: &'a [GameMetadata],
    pub as_of: DateTime<Utc>,
    /// Days of daily KPIs in `latest_kpis.json`, today included.
    pub latest_days: u32,
}

#[derive(Debug, Serialize)]
struct RollupRecord<'a> {
    game_id: &'a GameId,
    bucket_start: DateTime<Utc>,
    avg_metric: f64,
    peak_metric: u64,
    min_metric: u64,
    sample_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    periods_tracked: Option<u32>,
}

impl<'a> From<&'a Rollup> for RollupRecord<'a> {
    fn from(rollup: &'a Rollup) -> Self {
        Self {
            game_id: &rollup.game_id,
            bucket_start: rollup.bucket_start,
            avg_metric: rollup.avg_metric,
            peak_metric: rollup.peak_metric,
            min_metric: rollup.min_metric,
            sample_count: rollup.sample_count,
            periods_tracked: rollup.periods_tracked,
        }
    }
}

#[derive(Debug, Serialize)]
struct LatestRecord<'a> {
    date: String,
    source: Source,
    metric: &'static str,
    #[serde(flatten)]
    kpis: RollupRecord<'a>,
}

#[derive(Debug, Serialize)]
struct RankingRecord<'a> {
    rank: usize,
    #[serde(flatten)]
    ranking: &'a Ranking,
}

/// Writes every dashboard artifact into `destination`.
///
/// Only `sources` get per-granularity files; artifacts of other sources
/// already in `destination` are left as they are. Returns the number of
/// files written. On error nothing in `destination`
/// has been replaced.
pub fn export(
    rollups: &[Rollup],
    rankings: &[(RankingScope, Vec<Ranking>)],
    sources: &[Source],
    extras: Option<DashboardExtras<'_>>,
    destination: &Path,
) -> Result<usize, PipelineError> {
    info!("Starting export job to {}...", destination.display());

    let start = std::time::Instant::now();
    let mut staged = StagedFiles::default();

    for &source in sources {
        for granularity in Granularity::ALL {
            let mut rows: Vec<&Rollup> = rollups
                .iter()
                .filter(|r| r.source == source && r.granularity == granularity)
                .collect();
            rows.sort_by(|a, b| {
                a.bucket_start
                    .cmp(&b.bucket_start)
                    .then_with(|| a.game_id.cmp(&b.game_id))
            });
            let records: Vec<RollupRecord> = rows.into_iter().map(RollupRecord::from).collect();
            let name = format!("{}_{}_kpis.json", source, granularity);
            stage_json(&mut staged, &destination.join(name), &records)?;
        }
    }

    for (scope, entries) in rankings {
        let records: Vec<RankingRecord> = entries
            .iter()
            .enumerate()
            .map(|(i, ranking)| RankingRecord {
                rank: i + 1,
                ranking,
            })
            .collect();
        let name = format!("rankings_{}.json", scope);
        stage_json(&mut staged, &destination.join(name), &records)?;
    }

    if let Some(extras) = extras {
        let latest = latest_records(rollups, extras.as_of, extras.latest_days);
        stage_json(&mut staged, &destination.join("latest_kpis.json"), &latest)?;

        let mut metadata: Vec<&GameMetadata> = extras.metadata.iter().collect();
        metadata.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.canonical_id.cmp(&b.canonical_id))
        });
        stage_json(&mut staged, &destination.join("game-metadata.json"), &metadata)?;
    }

    let written = staged
        .commit()
        .map_err(|source| PipelineError::ExportWriteFailure {
            path: destination.to_path_buf(),
            source,
        })?;

    info!(
        "Completed export job in {:?} ({} files)",
        start.elapsed(),
        written
    );
    Ok(written)
}

/// Daily rollups of the last `days` days, newest first, then by peak.
fn latest_records(rollups: &[Rollup], as_of: DateTime<Utc>, days: u32) -> Vec<LatestRecord<'_>> {
    let today = Granularity::Daily.bucket_start(as_of);
    let since = today - TimeDelta::days(i64::from(days.max(1)) - 1);

    let mut rows: Vec<&Rollup> = rollups
        .iter()
        .filter(|r| r.granularity == Granularity::Daily && r.bucket_start >= since)
        .collect();
    rows.sort_by(|a, b| {
        b.bucket_start
            .cmp(&a.bucket_start)
            .then_with(|| b.peak_metric.cmp(&a.peak_metric))
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.game_id.cmp(&b.game_id))
    });

    rows.into_iter()
        .map(|r| LatestRecord {
            date: r.bucket_start.format("%Y-%m-%d").to_string(),
            source: r.source,
            metric: r.source.metric_name(),
            kpis: RollupRecord::from(r),
        })
        .collect()
}

fn stage_json<T: Serialize>(
    staged: &mut StagedFiles,
    path: &Path,
    value: &T,
) -> Result<(), PipelineError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| PipelineError::ExportEncode {
        path: path.to_path_buf(),
        source,
    })?;
    staged
        .stage(path, &bytes)
        .map_err(|source| PipelineError::ExportWriteFailure {
            path: path.to_path_buf(),
            source,
        })
}
