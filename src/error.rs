//! Error taxonomy for the ingestion pipeline.
//!
//! Command-level code uses `anyhow`; everything the orchestrator must
//! distinguish (retryable vs fatal, pre-run vs in-run) goes through
//! [`IngestError`].

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Input path missing. Raised before any run is created.
    #[error("document not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The parser cannot handle this file. Fatal for the document.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Checksum, MIME, parse or OCR failure that may succeed on retry.
    #[error("transient I/O failure during {stage}: {message}")]
    TransientIo { stage: &'static str, message: String },

    /// A collaborator call exceeded its time budget.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    /// Malformed input reaching the classifier, graph or store.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("knowledge graph update failed: {0}")]
    Graph(String),

    #[error("retrieval index rebuild failed: {0}")]
    Index(String),
}

impl IngestError {
    pub fn transient(stage: &'static str, err: impl std::fmt::Display) -> Self {
        IngestError::TransientIo {
            stage,
            message: err.to_string(),
        }
    }

    /// Whether the orchestrator may retry the failing step.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::TransientIo { .. } | IngestError::Timeout { .. }
        )
    }
}
