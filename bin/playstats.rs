use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use playstats::{CronScheduler, FileStore, Pipeline, Settings};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    // Load configuration
    let settings = Arc::new(
        Settings::new().context("Failed to load config.yaml. Please ensure it is valid")?,
    );

    let store = FileStore::open(&settings.storage.state_path).with_context(|| {
        format!(
            "Failed to open KPI store at {}",
            settings.storage.state_path.display()
        )
    })?;
    info!(
        "KPI store loaded from {}",
        settings.storage.state_path.display()
    );

    let pipeline = Arc::new(Pipeline::new(Arc::new(store), settings.clone()));
    let cancellation_token = CancellationToken::new();

    run_pipeline(settings, pipeline, cancellation_token).await
}

async fn run_pipeline(
    settings: Arc<Settings>,
    pipeline: Arc<Pipeline>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let cron_scheduler = CronScheduler::new(pipeline, settings.cron.clone());

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!(
        "Cron scheduler started - pipeline runs every {}s",
        settings.cron.interval_secs
    );

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Pipeline running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    cancellation_token.cancel();

    // An in-flight cycle finishes on the blocking pool before the runtime exits
    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Pipeline stopped");
    Ok(())
}
