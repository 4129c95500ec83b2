use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

/// Rollup progress checkpoint for one source.
///
/// Tracks the last raw sample sequence number incorporated into rollups.
/// Samples above `last_seq` are new on the next run, which is how late
/// arrivals for finalized days are detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    pub source: Source,
    pub last_seq: u64,
    /// `as_of` of the run that wrote this checkpoint.
    pub as_of: DateTime<Utc>,
}

impl Watermark {
    pub fn new(source: Source, last_seq: u64, as_of: DateTime<Utc>) -> Self {
        Self {
            source,
            last_seq,
            as_of,
        }
    }
}
