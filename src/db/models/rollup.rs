use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GameId, Source};
use crate::utils::Granularity;

/// Store key of a rollup row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RollupKey {
    pub source: Source,
    pub granularity: Granularity,
    pub game_id: GameId,
    pub bucket_start: DateTime<Utc>,
}

/// Aggregated KPIs of one game over one bucket.
///
/// Hourly, daily, weekly and monthly rollups share this shape and are told
/// apart by `granularity`.
///
/// Population: the rollup job upserts active buckets every cycle.
///
/// Query Patterns:
///   - "Daily peak history for game X"
///   - "All monthly buckets of source Y" (rankings)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub source: Source,
    pub game_id: GameId,
    pub granularity: Granularity,
    pub bucket_start: DateTime<Utc>,
    pub avg_metric: f64,
    pub peak_metric: u64,
    pub min_metric: u64,
    pub sample_count: u64,
    /// Weekly: days with data. Monthly: ISO weeks with data. Unset on finer
    /// granularities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periods_tracked: Option<u32>,
}

impl Rollup {
    pub fn key(&self) -> RollupKey {
        RollupKey {
            source: self.source,
            granularity: self.granularity,
            game_id: self.game_id.clone(),
            bucket_start: self.bucket_start,
        }
    }
}

/// Result of one `update_rollups` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollupUpdateResult {
    pub hourly_written: usize,
    pub daily_written: usize,
    pub weekly_written: usize,
    pub monthly_written: usize,
    /// Samples that arrived for an already finalized day.
    pub late_discarded: usize,
}

impl RollupUpdateResult {
    pub fn total_written(&self) -> usize {
        self.hourly_written + self.daily_written + self.weekly_written + self.monthly_written
    }
}
