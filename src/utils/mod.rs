//! Utility functions for the playstats pipeline.
//!
//! - [`buckets`] - Bucket boundaries per granularity and the shared window sizes
//! - [`atomic`] - Temp file + rename writes for artifacts and store snapshots

mod atomic;
mod buckets;

// ============================================
// Common Constants
// ============================================

/// Number of days of daily KPIs written to `latest_kpis.json` by default.
pub const DEFAULT_LATEST_DAYS: u32 = 7;

// ============================================
// Re-exports
// ============================================

pub use atomic::{write_atomic, StagedFiles};
pub use buckets::{Granularity, Windows};
