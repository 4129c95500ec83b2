pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod utils;

pub use config::Settings;
pub use cron::{CronScheduler, CycleReport, Pipeline};
pub use db::{FileStore, KpiStore, MemoryStore};
pub use error::PipelineError;
