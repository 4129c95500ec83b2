//! Cron scheduler for the periodic pipeline cycle.
//!
//! A single repeated job drives the whole pipeline. Cycles never overlap: a
//! tick that fires while the previous cycle is still running is skipped.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use super::Pipeline;
use crate::config::CronSettings;

/// Cron scheduler that runs the pipeline on a fixed interval.
pub struct CronScheduler {
    pipeline: Arc<Pipeline>,
    settings: CronSettings,
    running: Arc<AtomicBool>,
}

impl CronScheduler {
    pub fn new(pipeline: Arc<Pipeline>, settings: CronSettings) -> Self {
        Self {
            pipeline,
            settings,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_pipeline_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started");

        if self.settings.run_on_start {
            run_guarded(self.pipeline.clone(), self.running.clone()).await;
        }

        // Wait for cancellation
        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_pipeline_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let running = self.running.clone();
        let interval = self.settings.interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let pipeline = pipeline.clone();
                let running = running.clone();
                Box::pin(async move {
                    run_guarded(pipeline, running).await;
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered pipeline job (every {}s)", interval);
        Ok(())
    }
}

/// Runs one cycle on the blocking pool unless another one is in flight.
async fn run_guarded(pipeline: Arc<Pipeline>, running: Arc<AtomicBool>) {
    if running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        warn!("Previous pipeline cycle still running, skipping this tick");
        return;
    }

    let as_of = Utc::now();
    let outcome = tokio::task::spawn_blocking(move || pipeline.run_cycle(as_of)).await;
    running.store(false, Ordering::Release);

    match outcome {
        Ok(Ok(_)) => {},
        Ok(Err(e)) if e.is_transient() => {
            warn!("Pipeline cycle skipped, will retry next tick: {}", e);
        },
        Ok(Err(e)) => error!("Pipeline cycle failed: {:#}", anyhow::Error::from(e)),
        Err(e) => error!("Pipeline cycle panicked: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::Settings;
    use crate::db::{KpiStore, MemoryStore};

    fn pipeline(dir: &TempDir) -> (Arc<Pipeline>, Arc<MemoryStore>) {
        let mut settings = Settings::default();
        settings.storage.raw_dir = dir.path().join("raw");
        settings.export.output_dir = dir.path().join("out");
        let store = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(Pipeline::new(store.clone(), Arc::new(settings)));
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_guard_skips_overlapping_cycle() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store) = pipeline(&dir);

        let running = Arc::new(AtomicBool::new(true));
        run_guarded(pipeline, running.clone()).await;

        assert!(running.load(Ordering::Acquire));
        assert!(store.watermark(crate::db::models::Source::Steam).unwrap().is_none());
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_guarded_cycle_exports_and_releases() {
        let dir = TempDir::new().unwrap();
        let (pipeline, store) = pipeline(&dir);

        let running = Arc::new(AtomicBool::new(false));
        run_guarded(pipeline, running.clone()).await;

        assert!(!running.load(Ordering::Acquire));
        let watermark = store.watermark(crate::db::models::Source::Twitch).unwrap().unwrap();
        assert!(watermark.as_of <= Utc::now());
        assert!(dir.path().join("out/rankings_unified.json").exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let dir = TempDir::new().unwrap();
        let (pipeline, _store) = pipeline(&dir);
        let scheduler = CronScheduler::new(
            pipeline,
            CronSettings {
                interval_secs: 3600,
                run_on_start: true,
            },
        );

        let token = CancellationToken::new();
        token.cancel();
        scheduler.run(token).await.unwrap();
        assert!(dir.path().join("out/steam_daily_kpis.json").exists());
    }
}
