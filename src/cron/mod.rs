pub mod jobs;
mod pipeline;
mod scheduler;

pub use pipeline::{CycleReport, Pipeline};
pub use scheduler::CronScheduler;
