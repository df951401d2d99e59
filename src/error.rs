//! Error types for the indexer.
//!
//! [`IndexError`] covers every caller-visible failure of the library:
//! registration problems, run conflicts, collaborator failures (extraction,
//! embedding, vector store) and the underlying catalog / filesystem errors.
//! Bootstrap code (`main`, config loading) keeps using `anyhow`.

use thiserror::Error;

/// Main error type for indexer operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Another watch target is already registered for this path.
    #[error("a watch target already exists for path: {0}")]
    DuplicatePath(String),

    /// The path lies inside another target's folder, or contains another
    /// target. A file belongs to at most one target.
    #[error("path {path} overlaps watch target {existing}")]
    OverlappingPath { path: String, existing: String },

    /// The path did not exist on disk when it was registered.
    #[error("path does not exist: {0}")]
    PathNotFound(String),

    /// Unknown watch target id.
    #[error("watch target not found: {0}")]
    NotFound(String),

    /// The target already has a run in `indexing` state.
    #[error("indexing is already running for target: {0}")]
    AlreadyRunning(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("extraction failed for {path}: {reason}")]
    ExtractionFailed { path: String, reason: String },

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding provider error: {0}")]
    ProviderError(String),

    /// An embedding call did not return within the configured deadline.
    #[error("embedding call exceeded deadline of {0}s")]
    Deadline(u64),

    /// The run was stopped between files by a cancellation request.
    #[error("indexing cancelled")]
    Cancelled,

    #[error("vector store error: {0}")]
    Store(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    /// Machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::NotFound(_) => "not_found",
            IndexError::DuplicatePath(_) => "duplicate_path",
            IndexError::OverlappingPath { .. } => "overlapping_path",
            IndexError::AlreadyRunning(_) => "already_running",
            IndexError::PathNotFound(_) => "path_not_found",
            IndexError::InvalidConfig(_) | IndexError::InvalidInput(_) => "bad_request",
            IndexError::ProviderUnavailable(_) => "embeddings_unavailable",
            IndexError::Deadline(_) => "timeout",
            _ => "internal",
        }
    }

    pub(crate) fn extraction(path: &std::path::Path, reason: impl ToString) -> Self {
        IndexError::ExtractionFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, IndexError>;
