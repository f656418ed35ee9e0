//! Error taxonomy
//!
//! Classifies failures into the categories the retry policy and the ingest
//! loop care about: transient errors are retried, per-file content errors are
//! reported and skipped, everything else aborts the session.

use thiserror::Error;

/// Typed failure categories for the retrieval core.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid or inconsistent configuration. Surfaced before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required model or index file is absent.
    #[error("missing resource: {0}")]
    Resource(String),

    /// Local I/O failure that is worth retrying (file locks, disk busy).
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Remote request failure that is worth retrying (timeouts, 5xx).
    #[error("transient remote failure: {0}")]
    TransientRemote(String),

    /// GPU was requested strictly but no accelerator is available.
    #[error("accelerator unavailable: {0}")]
    AcceleratorUnavailable(String),

    /// Corrupt index file, dimension mismatch, or incomplete vocabulary.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Unsupported or empty input content. Reported per file, never fatal
    /// for the whole ingest session.
    #[error("unsupported content: {0}")]
    UserContent(String),

    /// Cooperative cancellation was observed.
    #[error("operation cancelled")]
    Cancelled,
}

impl RagError {
    /// Whether the retry policy should attempt this failure again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::TransientRemote(_))
    }

    /// Whether the ingest loop may skip the current file and continue.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::UserContent(_))
    }
}

/// Inspect an error chain for a transient [`RagError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<RagError>())
        .any(RagError::is_transient)
}

/// Inspect an error chain for a cancellation marker.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<RagError>())
        .any(|cause| matches!(cause, RagError::Cancelled))
}
