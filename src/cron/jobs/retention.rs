//! Job to enforce the raw data retention policy.
//!
//! Keeps only recent raw samples and hourly rollups while preserving every
//! daily, weekly and monthly rollup. Must run after the rollup job of the
//! same cycle so the current day is already captured.

use std::{fs, path::Path};

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::db::KpiStore;
use crate::error::PipelineError;
use crate::utils::{Granularity, Windows};

/// Rows removed by one [`prune`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneResult {
    pub raw_deleted: usize,
    pub hourly_deleted: usize,
}

/// Deletes raw samples and hourly rollups strictly older than the retention
/// horizon. Pruning an already pruned range is a no-op.
pub fn prune(
    store: &dyn KpiStore,
    windows: &Windows,
    as_of: DateTime<Utc>,
) -> Result<PruneResult, PipelineError> {
    info!("Starting retention job...");

    let cutoff = windows.retention_cutoff(as_of);

    let raw_deleted = store.prune_samples(cutoff)?;
    let hourly_deleted = store.prune_rollups(Granularity::Hourly, cutoff)?;

    if raw_deleted > 0 || hourly_deleted > 0 {
        info!(
            "Cleaned up {} raw samples and {} hourly rollups older than {}",
            raw_deleted, hourly_deleted, cutoff
        );
    } else {
        info!("No data older than {} to clean up", cutoff);
    }

    Ok(PruneResult {
        raw_deleted,
        hourly_deleted,
    })
}

/// Deletes collector partition files `<raw_dir>/<source>/<YYYY-MM-DD>.jsonl`
/// whose date lies strictly before the retention cutoff date, then removes
/// source directories left empty.
///
/// Files that do not follow the naming scheme are left alone.
pub fn prune_partitions(
    raw_dir: &Path,
    windows: &Windows,
    as_of: DateTime<Utc>,
) -> Result<usize, PipelineError> {
    if !raw_dir.exists() {
        return Ok(0);
    }

    let cutoff_date = windows.retention_cutoff(as_of).date_naive();
    let io_err = |path: &Path, e: std::io::Error| PipelineError::Ingest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut files_deleted = 0;
    for source_dir in fs::read_dir(raw_dir).map_err(|e| io_err(raw_dir, e))? {
        let source_dir = source_dir.map_err(|e| io_err(raw_dir, e))?.path();
        if !source_dir.is_dir() {
            continue;
        }

        for entry in fs::read_dir(&source_dir).map_err(|e| io_err(&source_dir, e))? {
            let path = entry.map_err(|e| io_err(&source_dir, e))?.path();
            let Some(date) = partition_date(&path) else {
                continue;
            };
            if date < cutoff_date {
                fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                debug!("Deleted expired partition {}", path.display());
                files_deleted += 1;
            }
        }

        let is_empty = fs::read_dir(&source_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            fs::remove_dir(&source_dir).map_err(|e| io_err(&source_dir, e))?;
        }
    }

    if files_deleted > 0 {
        info!(
            "Deleted {} raw partition files older than {}",
            files_deleted, cutoff_date
        );
    }
    Ok(files_deleted)
}

/// Date encoded in a partition file name, if it is one.
pub(crate) fn partition_date(path: &Path) -> Option<NaiveDate> {
    if path.extension()? != "jsonl" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}
