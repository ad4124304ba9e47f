//! Error types for building and querying the index

use rag_embed::EmbedError;
use std::path::{Path, PathBuf};

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, RetrieverError>;

/// Every way a build or a query can fail.
///
/// Files that cannot be read or decoded during a walk are not errors; they
/// are tallied as [`SkipReason`](crate::retrieval::corpus_walker::SkipReason)s.
/// Everything here ends the operation in progress.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// A required path was not configured
    #[error("Missing configuration: {field} is not set")]
    ConfigMissing { field: &'static str },

    /// A configured value is unusable
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The configuration file could not be read or parsed
    #[error("Invalid configuration file {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },

    /// The corpus root does not exist or is not a directory
    #[error("Codebase directory not found: {path}")]
    CodebaseNotFound { path: PathBuf },

    /// The ignore file contains a pattern that cannot be compiled
    #[error("Invalid ignore file {path} (line {line}): {message}")]
    IgnoreFileParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// The embedding gateway failed, including `ModelUnavailable`
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    /// The gateway returned a result that violates its contract
    #[error("Inconsistent embeddings: {message}")]
    InconsistentEmbeddings { message: String },

    /// No eligible file was found, nothing was written
    #[error("No readable files found under {root} after filtering")]
    EmptyCorpus { root: PathBuf },

    /// The index directory or one of its artifacts is missing
    #[error("Index not found: {path}")]
    IndexNotFound { path: PathBuf },

    /// An index artifact exists but cannot be decoded
    #[error("Index corrupt ({path}): {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    /// The query vector and the stored matrix disagree on dimensionality
    #[error("Dimension mismatch: index has {expected} columns, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Filesystem errors outside of per-file corpus reads
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking task panicked or was cancelled
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl RetrieverError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether the embedding backend could not be used at all
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, Self::Embedding(e) if e.is_model_unavailable())
    }
}
