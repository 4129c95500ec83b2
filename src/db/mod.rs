use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::utils::Granularity;

pub mod models;
mod state;
mod store;

pub use state::RollupCommit;
pub use store::{FileStore, MemoryStore, StateStore};

use models::{GameId, GameMetadata, NewSample, RawSample, Rollup, Source, Watermark};

/// Errors surfaced by a [`KpiStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for raw samples, rollups, rollup checkpoints and game metadata.
///
/// Raw samples are append-only; rollups are only ever upserted through
/// [`KpiStore::commit`], which applies a whole rollup run or nothing.
/// Deletion is reserved for retention.
pub trait KpiStore: Send + Sync {
    /// Appends collector records, skipping any whose
    /// (source, game_id, captured_at) is already stored. Returns how many
    /// were inserted.
    fn append_samples(&self, samples: Vec<NewSample>) -> Result<usize, StoreError>;

    /// Raw samples of `source` with `captured_at >= captured_since` or
    /// `seq > after_seq`, ordered by `seq`. Samples previously discarded as
    /// late are never returned.
    fn fetch_samples(
        &self,
        source: Source,
        captured_since: DateTime<Utc>,
        after_seq: Option<u64>,
    ) -> Result<Vec<RawSample>, StoreError>;

    /// Rollups of one source and granularity with `bucket_start >= since`,
    /// ordered by bucket then game id.
    fn rollups(
        &self,
        source: Source,
        granularity: Granularity,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Rollup>, StoreError>;

    fn watermark(&self, source: Source) -> Result<Option<Watermark>, StoreError>;

    /// Running all-time peak per game of `source`.
    fn all_time_peaks(&self, source: Source) -> Result<FxHashMap<GameId, u64>, StoreError>;

    /// Applies one rollup run atomically.
    fn commit(&self, commit: RollupCommit) -> Result<(), StoreError>;

    /// Deletes raw samples with `captured_at < before`.
    fn prune_samples(&self, before: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Deletes rollups of `granularity` with `bucket_start < before`.
    fn prune_rollups(
        &self,
        granularity: Granularity,
        before: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Game metadata ordered by canonical id.
    fn metadata(&self) -> Result<Vec<GameMetadata>, StoreError>;

    /// Inserts or replaces metadata rows keyed by canonical id.
    fn upsert_metadata(&self, records: Vec<GameMetadata>) -> Result<usize, StoreError>;
}
