use std::fmt;

use serde::{Deserialize, Serialize};

use super::{GameId, Source};

/// Leaderboard entry for one game.
///
/// For a single source `game_id` is the platform id; for the unified view it
/// is the canonical id (or `<source>:<platform id>` when no metadata row
/// exists).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub game_id: GameId,
    pub display_name: Option<String>,
    pub avg_peak: f64,
    pub all_time_peak: u64,
    pub days_tracked: u32,
}

/// Which leaderboard to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankingScope {
    Source(Source),
    /// All sources merged by canonical game id.
    Unified,
}

impl RankingScope {
    pub fn name(&self) -> &'static str {
        match self {
            RankingScope::Source(source) => source.as_str(),
            RankingScope::Unified => "unified",
        }
    }
}

impl fmt::Display for RankingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sort key of a leaderboard. Always descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingCriterion {
    #[default]
    AvgPeak,
    AllTimePeak,
}
