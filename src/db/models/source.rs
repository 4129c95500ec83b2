use std::fmt;

use serde::{Deserialize, Serialize};

/// Platform a raw sample was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Steam,
    Twitch,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Steam, Source::Twitch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Steam => "steam",
            Source::Twitch => "twitch",
        }
    }

    /// Name of the primary metric carried by samples of this source.
    ///
    /// Steam reports concurrent players, Twitch concurrent viewers.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Source::Steam => "player_count",
            Source::Twitch => "viewer_count",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Source::Twitch).unwrap();
        assert_eq!(json, "\"twitch\"");
        let parsed: Source = serde_json::from_str("\"steam\"").unwrap();
        assert_eq!(parsed, Source::Steam);
    }
}
