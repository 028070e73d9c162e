//! Error types for the embedding search engine
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.
//!
//! Errors are `Clone` so a single failed index fetch can be handed to every
//! caller that was coalesced onto it.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for index storage, caching and search operations
#[derive(Error, Debug, Clone)]
pub enum EmbeddingsError {
    /// No embedding index has been computed for the repository yet
    #[error(
        "No embeddings index found for repository '{repo_name}'\nSuggestion: Schedule an embeddings job for the repository and retry once it has finished"
    )]
    NotFound { repo_name: String },

    /// Query and index were embedded with different models
    #[error(
        "Embeddings model mismatch for repository '{repo_name}': index was built with '{index_model}', query uses '{query_model}'\nSuggestion: Re-index the repository with the current embeddings model"
    )]
    ModelMismatch {
        repo_name: String,
        index_model: String,
        query_model: String,
    },

    /// Malformed search request
    #[error("Invalid search request: {reason}")]
    InvalidRequest { reason: String },

    /// Persisted index could not be decoded
    #[error(
        "Invalid embeddings index format: {0}\nSuggestion: The stored index may be corrupted, recompute it"
    )]
    InvalidFormat(String),

    /// Blob store or stream I/O failure
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The query-embedding provider failed
    #[error("Failed to embed query: {0}")]
    Embedding(String),

    /// The remote vector-search backend failed
    #[error("Remote search failed for repository '{repo_name}': {reason}")]
    Remote { repo_name: String, reason: String },

    /// The caller's request was cancelled before a result was available
    #[error("Request cancelled")]
    Cancelled,

    /// A background fetch or search task panicked or was aborted
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl EmbeddingsError {
    /// Get a stable status code for this error type.
    ///
    /// Transports map these to their own status space, e.g. `NOT_FOUND` to a
    /// 4xx instead of a 5xx.
    pub fn status_code(&self) -> String {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ModelMismatch { .. } => "MODEL_MISMATCH",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::Io(_) => "IO_ERROR",
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::TaskFailed(_) => "TASK_FAILED",
        }
        .to_string()
    }

    /// True when the repository simply has no index yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for errors the caller can fix without a code change.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::ModelMismatch { .. } | Self::InvalidRequest { .. }
        )
    }
}

impl From<io::Error> for EmbeddingsError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<tokio::task::JoinError> for EmbeddingsError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EmbeddingsError>;
