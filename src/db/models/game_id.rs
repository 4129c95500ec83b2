use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Deserializer, Serialize};

/// Source-scoped game identifier (Steam app id, Twitch game id, IGDB id).
///
/// Collectors emit Steam ids as integers and Twitch ids as strings, so both
/// forms are accepted on input and stored as text. Ordering compares two
/// numeric ids by value and falls back to byte order otherwise, which keeps
/// `"730" < "1000"` for tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for GameId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for GameId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u64> for GameId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for GameId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(GameId::from(n)),
            Raw::Text(s) => Ok(GameId::new(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_order_by_value() {
        let mut ids = vec![GameId::from(1000), GameId::from(730), GameId::from(570)];
        ids.sort();
        assert_eq!(ids, vec![GameId::from(570), GameId::from(730), GameId::from(1000)]);
    }

    #[test]
    fn test_numeric_before_text() {
        assert!(GameId::from(99999) < GameId::from("steam:730"));
        assert!(GameId::from("a") < GameId::from("b"));
    }

    #[test]
    fn test_deserialize_number_or_string() {
        let a: GameId = serde_json::from_str("730").unwrap();
        let b: GameId = serde_json::from_str("\"730\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"730\"");
    }
}
