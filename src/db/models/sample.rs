use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GameId, Source};

/// Raw sample as emitted by a collector, before the store assigns it a
/// sequence number.
///
/// One JSON object per line in the raw partition files:
/// `{"source":"steam","game_id":730,"captured_at":"2025-01-15T10:00:00Z","value":1250000}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSample {
    pub source: Source,
    pub game_id: GameId,
    pub captured_at: DateTime<Utc>,
    pub value: u64,
}

impl NewSample {
    pub fn new(
        source: Source,
        game_id: impl Into<GameId>,
        captured_at: DateTime<Utc>,
        value: u64,
    ) -> Self {
        Self {
            source,
            game_id: game_id.into(),
            captured_at,
            value,
        }
    }
}

/// Raw concurrent player/viewer count stored for a game.
///
/// Immutable once written. `seq` is assigned by the store in insertion order
/// and is what the rollup watermark refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub seq: u64,
    pub source: Source,
    pub game_id: GameId,
    pub captured_at: DateTime<Utc>,
    pub value: u64,
}
