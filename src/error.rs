//! Error types for pipeline stages.

use std::path::PathBuf;

use crate::db::{models::Source, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Raw sample retrieval failed; the stage wrote nothing and the next
    /// scheduled cycle retries.
    #[error("Raw samples for {platform} unavailable: {reason}")]
    TransientSourceUnavailable {
        platform: Source,
        #[source]
        reason: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Export destination unwritable. Previously exported files are intact.
    #[error("Failed to write export {}: {source}", .path.display())]
    ExportWriteFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize export {}: {source}", .path.display())]
    ExportEncode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid raw partition {}: {reason}", .path.display())]
    Ingest { path: PathBuf, reason: String },
}

impl PipelineError {
    /// Whether the scheduler can expect the next cycle to succeed without
    /// operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientSourceUnavailable { .. } | PipelineError::Store(_)
        )
    }
}
