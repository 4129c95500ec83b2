#[allow(clippy::module_inception)]
mod config;

pub use self::config::{CronSettings, ExportSettings, Settings, StorageSettings, WindowSettings};
