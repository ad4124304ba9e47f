//! Error types for the embedding gateway

/// Result type for embedding operations.
///
/// Convenience alias that uses [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Callers must treat every variant as fatal to the operation in progress.
/// The gateway never substitutes a fallback vector when the model fails.
///
/// # Error Categories
///
/// - **Availability**: the model cannot be resolved, downloaded or loaded
/// - **Configuration**: invalid settings such as a zero batch size
/// - **Runtime**: the loaded model failed while embedding
/// - **Async**: blocking task failures
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The model identifier does not name any supported model
    #[error("Unknown embedding model: {model}")]
    UnknownModel { model: String },

    /// The model could not be downloaded, loaded or initialized
    #[error("Embedding model '{model}' is unavailable: {source}")]
    ModelUnavailable {
        model: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl EmbedError {
    /// Wrap a loading failure for `model` into [`EmbedError::ModelUnavailable`].
    ///
    /// fastembed reports failures as `anyhow::Error`, which is converted into
    /// a boxed error so the original chain stays visible through `source()`.
    pub fn model_unavailable<E>(model: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::ModelUnavailable {
            model: model.into(),
            source: source.into(),
        }
    }

    /// Create an embedding generation error from any error type.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::EmbeddingGeneration {
            source: source.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this error means the model backend cannot be used at all.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable { .. } | Self::UnknownModel { .. }
        )
    }
}
