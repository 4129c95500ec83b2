//! Job to load collector output into the store.
//!
//! Collectors append one JSON object per line to
//! `<raw_dir>/<source>/<YYYY-MM-DD>.jsonl`. Every cycle re-reads the
//! partitions still inside the retention window; records already stored are
//! skipped by (source, game_id, captured_at), so re-reading is harmless.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, info};

use super::retention::partition_date;
use crate::db::{
    models::{GameMetadata, NewSample, Source},
    KpiStore,
};
use crate::error::PipelineError;
use crate::utils::Windows;

/// Counts reported by [`ingest_partitions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestResult {
    pub files_read: usize,
    pub records_read: usize,
    pub inserted: usize,
}

/// Reads the partitions of `sources` and appends new samples.
///
/// Partitions are parsed completely before anything is appended: one bad
/// line aborts the ingest with nothing written. Records captured before the
/// retention cutoff are ignored, since retention would drop them anyway.
pub fn ingest_partitions(
    store: &dyn KpiStore,
    raw_dir: &Path,
    sources: &[Source],
    windows: &Windows,
    as_of: DateTime<Utc>,
) -> Result<IngestResult, PipelineError> {
    info!("Starting ingest job from {}...", raw_dir.display());

    let start = std::time::Instant::now();
    let cutoff = windows.retention_cutoff(as_of);
    let cutoff_date = cutoff.date_naive();

    let mut result = IngestResult::default();
    let mut samples = Vec::new();

    for source in sources {
        for path in partition_files(&raw_dir.join(source.as_str()))? {
            match partition_date(&path) {
                Some(date) if date >= cutoff_date => {},
                _ => continue,
            }

            let parsed = parse_partition(&path, *source)?;
            result.files_read += 1;
            result.records_read += parsed.len();
            samples.extend(parsed.into_iter().filter(|s| s.captured_at >= cutoff));
        }
    }

    result.inserted = store.append_samples(samples)?;

    info!(
        "Completed ingest job in {:?} ({} files, {} records, {} new)",
        start.elapsed(),
        result.files_read,
        result.records_read,
        result.inserted
    );
    Ok(result)
}

/// Partition files of one source directory, sorted by name (= by date).
fn partition_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.is_dir() {
        debug!("No raw partitions at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::Ingest {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::Ingest {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn parse_partition(path: &Path, source: Source) -> Result<Vec<NewSample>, PipelineError> {
    let content = fs::read_to_string(path).map_err(|e| PipelineError::Ingest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut samples = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample: NewSample = serde_json::from_str(line).map_err(|e| PipelineError::Ingest {
            path: path.to_path_buf(),
            reason: format!("line {}: {}", line_no + 1, e),
        })?;
        if sample.source != source {
            return Err(PipelineError::Ingest {
                path: path.to_path_buf(),
                reason: format!(
                    "line {}: {} record in {} partition",
                    line_no + 1,
                    sample.source,
                    source
                ),
            });
        }
        samples.push(sample);
    }
    Ok(samples)
}

/// Loads the metadata table exported by the enrichment collector (a JSON
/// array of [`GameMetadata`]) and upserts it. A missing file is not an
/// error: rankings then run without descriptive fields.
pub fn load_metadata(store: &dyn KpiStore, path: &Path) -> Result<usize, PipelineError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No metadata file at {}, skipping", path.display());
            return Ok(0);
        },
        Err(e) => {
            return Err(PipelineError::Ingest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        },
    };

    let records: Vec<GameMetadata> =
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::Ingest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let count = store.upsert_metadata(records)?;
    info!("Loaded {} game metadata records from {}", count, path.display());
    Ok(count)
}
