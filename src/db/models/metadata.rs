use serde::{Deserialize, Serialize};

use super::{GameId, Source};

/// Descriptive game record maintained by the enrichment collector.
///
/// `canonical_id` is the IGDB id and is the join key across platforms.
/// Rankings only read this table; a game without a row still ranks, with
/// empty descriptive fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub canonical_id: GameId,
    pub display_name: String,
    #[serde(default)]
    pub steam_app_id: Option<GameId>,
    #[serde(default)]
    pub twitch_game_id: Option<GameId>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub cover_url: Option<String>,
}

impl GameMetadata {
    pub fn new(canonical_id: impl Into<GameId>, display_name: impl Into<String>) -> Self {
        Self {
            canonical_id: canonical_id.into(),
            display_name: display_name.into(),
            steam_app_id: None,
            twitch_game_id: None,
            genres: Vec::new(),
            themes: Vec::new(),
            rating: None,
            cover_url: None,
        }
    }

    pub fn with_platform_id(mut self, source: Source, id: impl Into<GameId>) -> Self {
        match source {
            Source::Steam => self.steam_app_id = Some(id.into()),
            Source::Twitch => self.twitch_game_id = Some(id.into()),
        }
        self
    }

    /// Identifier of this game on `source`, if it is tracked there.
    pub fn platform_id(&self, source: Source) -> Option<&GameId> {
        match source {
            Source::Steam => self.steam_app_id.as_ref(),
            Source::Twitch => self.twitch_game_id.as_ref(),
        }
    }
}
