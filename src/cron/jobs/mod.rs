//! Pipeline stages, in the order a cycle runs them.

pub mod ingest;
pub mod rollup;
pub mod retention;
pub mod ranking;
pub mod export;

pub use export::{export, DashboardExtras};
pub use ingest::{ingest_partitions, load_metadata, IngestResult};
pub use ranking::build_rankings;
pub use retention::{prune, prune_partitions, PruneResult};
pub use rollup::update_rollups;
