use std::{
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard},
};

use chrono::{DateTime, Utc};
use log::info;
use rustc_hash::FxHashMap;

use super::{
    models::{GameId, GameMetadata, NewSample, RawSample, Rollup, Source, Watermark},
    state::{Snapshot, StoreState},
    KpiStore, RollupCommit, StoreError,
};
use crate::utils::{write_atomic, Granularity};

/// How a [`StateStore`] makes a mutation durable.
pub trait Persistence: Send + Sync {
    fn persist(&self, state: &StoreState) -> Result<(), StoreError>;
}

/// Keeps everything in memory. Used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct Volatile;

impl Persistence for Volatile {
    fn persist(&self, _state: &StoreState) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Persists the whole state as one JSON document, replaced atomically on
/// every mutation.
#[derive(Debug)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl Persistence for JsonSnapshot {
    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&state.to_snapshot())?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }
}

/// Store backend over [`StoreState`].
///
/// Every mutation runs against a copy of the state, is persisted, and only
/// then replaces the live state, so a failed write leaves both the file and
/// the in-memory tables unchanged.
pub struct StateStore<P> {
    state: RwLock<StoreState>,
    persistence: P,
}

pub type MemoryStore = StateStore<Volatile>;
pub type FileStore = StateStore<JsonSnapshot>;

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            persistence: Volatile,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    /// Opens the snapshot at `path`, starting empty when it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read(&path) {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                info!("Loaded store snapshot from {}", path.display());
                StoreState::from_snapshot(snapshot)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No store snapshot at {}, starting empty", path.display());
                StoreState::default()
            },
            Err(e) => return Err(StoreError::Io(e)),
        };

        Ok(Self {
            state: RwLock::new(state),
            persistence: JsonSnapshot { path },
        })
    }
}

impl<P: Persistence> StateStore<P> {
    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut StoreState) -> T) -> Result<T, StoreError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        let mut next = guard.clone();
        let out = apply(&mut next);
        self.persistence.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    /// Serialized state, for inspection and state comparisons in tests.
    pub fn snapshot_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.read()?.to_snapshot())?)
    }
}

impl<P: Persistence> KpiStore for StateStore<P> {
    fn append_samples(&self, samples: Vec<NewSample>) -> Result<usize, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }
        self.mutate(|state| state.append_samples(samples))
    }

    fn fetch_samples(
        &self,
        source: Source,
        captured_since: DateTime<Utc>,
        after_seq: Option<u64>,
    ) -> Result<Vec<RawSample>, StoreError> {
        Ok(self.read()?.fetch_samples(source, captured_since, after_seq))
    }

    fn rollups(
        &self,
        source: Source,
        granularity: Granularity,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Rollup>, StoreError> {
        Ok(self.read()?.rollups(source, granularity, since))
    }

    fn watermark(&self, source: Source) -> Result<Option<Watermark>, StoreError> {
        Ok(self.read()?.watermark(source))
    }

    fn all_time_peaks(&self, source: Source) -> Result<FxHashMap<GameId, u64>, StoreError> {
        Ok(self.read()?.all_time_peaks(source))
    }

    fn commit(&self, commit: RollupCommit) -> Result<(), StoreError> {
        self.mutate(|state| state.commit(commit))
    }

    fn prune_samples(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        self.mutate(|state| state.prune_samples(before))
    }

    fn prune_rollups(
        &self,
        granularity: Granularity,
        before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.mutate(|state| state.prune_rollups(granularity, before))
    }

    fn metadata(&self) -> Result<Vec<GameMetadata>, StoreError> {
        Ok(self.read()?.metadata())
    }

    fn upsert_metadata(&self, records: Vec<GameMetadata>) -> Result<usize, StoreError> {
        self.mutate(|state| state.upsert_metadata(records))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/playstats.json");
        let captured = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();

        {
            let store = FileStore::open(&path).unwrap();
            store
                .append_samples(vec![NewSample::new(Source::Steam, 730, captured, 100)])
                .unwrap();
            store
                .upsert_metadata(vec![GameMetadata::new(1, "Counter-Strike 2")])
                .unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        let samples = store.fetch_samples(Source::Steam, captured, None).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 100);
        assert_eq!(store.metadata().unwrap()[0].display_name, "Counter-Strike 2");
    }

    #[test]
    fn test_failed_persist_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        // A directory where the snapshot file should be makes every write fail
        let path = dir.path().join("blocked");
        std::fs::create_dir_all(path.join("playstats.json.tmp")).unwrap();
        let store = FileStore::open(path.join("playstats.json")).unwrap();

        let captured = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let result = store.append_samples(vec![NewSample::new(Source::Steam, 730, captured, 1)]);
        assert!(result.is_err());
        assert!(store.fetch_samples(Source::Steam, captured, None).unwrap().is_empty());
    }
}
