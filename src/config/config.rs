use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::db::models::{RankingCriterion, Source};
use crate::utils::{Windows, DEFAULT_LATEST_DAYS};

/// Where raw samples, store state and metadata live on disk.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    /// JSON snapshot of the KPI store.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Root of the collector partitions: `<raw_dir>/<source>/<YYYY-MM-DD>.jsonl`.
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    /// Optional JSON array of game metadata written by the enrichment collector.
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/state/playstats.json")
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            raw_dir: default_raw_dir(),
            metadata_path: None,
        }
    }
}

/// Dashboard export configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ExportSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Days of daily KPIs included in `latest_kpis.json`.
    #[serde(default = "default_latest_days")]
    pub latest_days: u32,
    /// Sort key of every exported leaderboard.
    #[serde(default)]
    pub ranking_criterion: RankingCriterion,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("src/data")
}

fn default_latest_days() -> u32 {
    DEFAULT_LATEST_DAYS
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            latest_days: default_latest_days(),
            ranking_criterion: RankingCriterion::default(),
        }
    }
}

/// Rollup and retention windows.
///
/// Read once into [`Windows`] so the rollup job and the retention job can
/// never disagree on the horizon.
#[derive(Debug, Deserialize, Clone)]
pub struct WindowSettings {
    #[serde(default = "default_hourly_window_hours")]
    pub hourly_window_hours: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_hourly_window_hours() -> u32 {
    48
}

fn default_retention_days() -> u32 {
    7
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            hourly_window_hours: default_hourly_window_hours(),
            retention_days: default_retention_days(),
        }
    }
}

impl WindowSettings {
    pub fn windows(&self) -> Windows {
        Windows {
            hourly_window_hours: self.hourly_window_hours,
            retention_days: self.retention_days,
        }
    }
}

/// Pipeline schedule.
#[derive(Debug, Deserialize, Clone)]
pub struct CronSettings {
    /// Interval between pipeline cycles - default 1 hour
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run one cycle immediately at startup instead of waiting a full interval
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_run_on_start() -> bool {
    true
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_start: default_run_on_start(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from `config.{yaml,toml,json}` (optional) and `PLAYSTATS_*`
/// environment variables, e.g. `PLAYSTATS_EXPORT__OUTPUT_DIR=public/data`.
/// Every section has defaults so an empty configuration is valid.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub windows: WindowSettings,
    #[serde(default)]
    pub cron: CronSettings,
    #[serde(default = "default_sources")]
    pub sources: Vec<Source>,
}

fn default_sources() -> Vec<Source> {
    Source::ALL.to_vec()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageSettings::default(),
            export: ExportSettings::default(),
            windows: WindowSettings::default(),
            cron: CronSettings::default(),
            sources: default_sources(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load("config")
    }

    /// Loads settings from the file stem `name` plus the environment.
    pub fn load(name: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(name).required(false))
            .add_source(
                Environment::with_prefix("PLAYSTATS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings
            .windows
            .windows()
            .validate()
            .map_err(ConfigError::Message)?;

        Ok(settings)
    }
}
