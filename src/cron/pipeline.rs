//! One pipeline cycle: ingest → rollups → retention → rankings → export.
//!
//! Stages run strictly in that order and a failing stage aborts the cycle.
//! Nothing is rolled back: every stage is idempotent, so the next cycle
//! converges to the same state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;

use super::jobs::{self, DashboardExtras, IngestResult, PruneResult};
use crate::config::Settings;
use crate::db::{
    models::{Ranking, RankingScope, Rollup, RollupUpdateResult, Source},
    KpiStore,
};
use crate::error::PipelineError;
use crate::utils::{Granularity, Windows};

/// What one cycle did, stage by stage.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub ingest: IngestResult,
    pub rollups: Vec<(Source, RollupUpdateResult)>,
    pub prune: PruneResult,
    pub partitions_deleted: usize,
    pub rankings: Vec<(RankingScope, usize)>,
    pub files_exported: usize,
}

pub struct Pipeline {
    store: Arc<dyn KpiStore>,
    settings: Arc<Settings>,
    windows: Windows,
}

impl Pipeline {
    pub fn new(store: Arc<dyn KpiStore>, settings: Arc<Settings>) -> Self {
        let windows = settings.windows.windows();
        Self {
            store,
            settings,
            windows,
        }
    }

    /// Runs every stage for `as_of`. The clock is never read here.
    pub fn run_cycle(&self, as_of: DateTime<Utc>) -> Result<CycleReport, PipelineError> {
        info!("Starting pipeline cycle as of {}", as_of);

        let start = std::time::Instant::now();
        let store = self.store.as_ref();
        let storage = &self.settings.storage;
        let mut report = CycleReport::default();

        if let Some(path) = &storage.metadata_path {
            jobs::load_metadata(store, path)?;
        }

        report.ingest = jobs::ingest_partitions(
            store,
            &storage.raw_dir,
            &self.settings.sources,
            &self.windows,
            as_of,
        )?;

        for source in &self.settings.sources {
            let result = jobs::update_rollups(store, &self.windows, *source, as_of)?;
            report.rollups.push((*source, result));
        }

        // Only after every source is rolled up: retention drops hourly detail
        report.prune = jobs::prune(store, &self.windows, as_of)?;
        report.partitions_deleted =
            jobs::prune_partitions(&storage.raw_dir, &self.windows, as_of)?;

        let criterion = self.settings.export.ranking_criterion;
        let mut scopes: Vec<RankingScope> =
            self.settings.sources.iter().map(|s| RankingScope::Source(*s)).collect();
        scopes.push(RankingScope::Unified);

        let mut rankings: Vec<(RankingScope, Vec<Ranking>)> = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let entries = jobs::build_rankings(store, scope, criterion, as_of)?;
            report.rankings.push((scope, entries.len()));
            rankings.push((scope, entries));
        }

        let mut rollups: Vec<Rollup> = Vec::new();
        for source in &self.settings.sources {
            for granularity in Granularity::ALL {
                rollups.extend(store.rollups(*source, granularity, None)?);
            }
        }

        let metadata = store.metadata()?;
        report.files_exported = jobs::export(
            &rollups,
            &rankings,
            &self.settings.sources,
            Some(DashboardExtras {
                metadata: &metadata,
                as_of,
                latest_days: self.settings.export.latest_days,
            }),
            &self.settings.export.output_dir,
        )?;

        let rollups_written: usize = report.rollups.iter().map(|(_, r)| r.total_written()).sum();
        info!(
            "Completed pipeline cycle in {:?} ({} new samples, {} rollups written, {} files exported)",
            start.elapsed(),
            report.ingest.inserted,
            rollups_written,
            report.files_exported
        );
        Ok(report)
    }
}
