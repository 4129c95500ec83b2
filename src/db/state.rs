use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::models::{
    GameId, GameMetadata, NewSample, RawSample, Rollup, RollupKey, Source, Watermark,
};
use crate::utils::Granularity;

/// Everything one rollup run writes, applied in a single step.
#[derive(Debug, Clone)]
pub struct RollupCommit {
    pub source: Source,
    /// Rows to upsert (full overwrite by key).
    pub rollups: Vec<Rollup>,
    /// Sequence numbers of late samples to exclude from now on.
    pub discarded: Vec<u64>,
    /// Candidate all-time peaks; merged with `max`.
    pub peaks: Vec<(GameId, u64)>,
    pub watermark: Watermark,
}

/// In-memory tables behind every store backend.
///
/// All maps are ordered so a serialized snapshot is byte-stable for equal
/// contents.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    next_seq: u64,
    samples: BTreeMap<u64, RawSample>,
    identities: FxHashSet<(Source, GameId, DateTime<Utc>)>,
    discarded: BTreeSet<u64>,
    rollups: BTreeMap<RollupKey, Rollup>,
    watermarks: BTreeMap<Source, Watermark>,
    peaks: BTreeMap<(Source, GameId), u64>,
    metadata: BTreeMap<GameId, GameMetadata>,
}

impl StoreState {
    pub(crate) fn append_samples(&mut self, samples: Vec<NewSample>) -> usize {
        let mut inserted = 0;
        for sample in samples {
            let identity = (sample.source, sample.game_id.clone(), sample.captured_at);
            if !self.identities.insert(identity) {
                continue;
            }
            self.next_seq += 1;
            let seq = self.next_seq;
            self.samples.insert(
                seq,
                RawSample {
                    seq,
                    source: sample.source,
                    game_id: sample.game_id,
                    captured_at: sample.captured_at,
                    value: sample.value,
                },
            );
            inserted += 1;
        }
        inserted
    }

    pub(crate) fn fetch_samples(
        &self,
        source: Source,
        captured_since: DateTime<Utc>,
        after_seq: Option<u64>,
    ) -> Vec<RawSample> {
        self.samples
            .values()
            .filter(|s| s.source == source && !self.discarded.contains(&s.seq))
            .filter(|s| {
                s.captured_at >= captured_since || after_seq.map_or(true, |seq| s.seq > seq)
            })
            .cloned()
            .collect()
    }

    pub(crate) fn rollups(
        &self,
        source: Source,
        granularity: Granularity,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Rollup> {
        let mut rows: Vec<Rollup> = self
            .rollups
            .values()
            .filter(|r| r.source == source && r.granularity == granularity)
            .filter(|r| since.map_or(true, |since| r.bucket_start >= since))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.bucket_start
                .cmp(&b.bucket_start)
                .then_with(|| a.game_id.cmp(&b.game_id))
        });
        rows
    }

    pub(crate) fn watermark(&self, source: Source) -> Option<Watermark> {
        self.watermarks.get(&source).cloned()
    }

    pub(crate) fn all_time_peaks(&self, source: Source) -> FxHashMap<GameId, u64> {
        self.peaks
            .iter()
            .filter(|((s, _), _)| *s == source)
            .map(|((_, game_id), peak)| (game_id.clone(), *peak))
            .collect()
    }

    pub(crate) fn commit(&mut self, commit: RollupCommit) {
        for rollup in commit.rollups {
            self.rollups.insert(rollup.key(), rollup);
        }
        self.discarded.extend(commit.discarded);
        for (game_id, peak) in commit.peaks {
            let entry = self.peaks.entry((commit.source, game_id)).or_insert(0);
            *entry = (*entry).max(peak);
        }
        self.watermarks.insert(commit.source, commit.watermark);
    }

    pub(crate) fn prune_samples(&mut self, before: DateTime<Utc>) -> usize {
        let expired: Vec<u64> = self
            .samples
            .values()
            .filter(|s| s.captured_at < before)
            .map(|s| s.seq)
            .collect();
        for seq in &expired {
            if let Some(sample) = self.samples.remove(seq) {
                self.identities
                    .remove(&(sample.source, sample.game_id, sample.captured_at));
            }
            self.discarded.remove(seq);
        }
        expired.len()
    }

    pub(crate) fn prune_rollups(&mut self, granularity: Granularity, before: DateTime<Utc>) -> usize {
        let count = self.rollups.len();
        self.rollups
            .retain(|key, _| key.granularity != granularity || key.bucket_start >= before);
        count - self.rollups.len()
    }

    pub(crate) fn metadata(&self) -> Vec<GameMetadata> {
        self.metadata.values().cloned().collect()
    }

    pub(crate) fn upsert_metadata(&mut self, records: Vec<GameMetadata>) -> usize {
        let count = records.len();
        for record in records {
            self.metadata.insert(record.canonical_id.clone(), record);
        }
        count
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            next_seq: self.next_seq,
            samples: self.samples.values().cloned().collect(),
            discarded: self.discarded.iter().copied().collect(),
            rollups: self.rollups.values().cloned().collect(),
            watermarks: self.watermarks.values().cloned().collect(),
            peaks: self
                .peaks
                .iter()
                .map(|((source, game_id), peak)| PeakRecord {
                    source: *source,
                    game_id: game_id.clone(),
                    peak: *peak,
                })
                .collect(),
            metadata: self.metadata.values().cloned().collect(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = StoreState {
            next_seq: snapshot.next_seq,
            discarded: snapshot.discarded.into_iter().collect(),
            ..Default::default()
        };
        for sample in snapshot.samples {
            state.next_seq = state.next_seq.max(sample.seq);
            state
                .identities
                .insert((sample.source, sample.game_id.clone(), sample.captured_at));
            state.samples.insert(sample.seq, sample);
        }
        for rollup in snapshot.rollups {
            state.rollups.insert(rollup.key(), rollup);
        }
        for watermark in snapshot.watermarks {
            state.watermarks.insert(watermark.source, watermark);
        }
        for record in snapshot.peaks {
            state.peaks.insert((record.source, record.game_id), record.peak);
        }
        for record in snapshot.metadata {
            state.metadata.insert(record.canonical_id.clone(), record);
        }
        state
    }
}

/// Serialized form of [`StoreState`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    next_seq: u64,
    #[serde(default)]
    samples: Vec<RawSample>,
    #[serde(default)]
    discarded: Vec<u64>,
    #[serde(default)]
    rollups: Vec<Rollup>,
    #[serde(default)]
    watermarks: Vec<Watermark>,
    #[serde(default)]
    peaks: Vec<PeakRecord>,
    #[serde(default)]
    metadata: Vec<GameMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PeakRecord {
    source: Source,
    game_id: GameId,
    peak: u64,
}
