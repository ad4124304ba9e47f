//! # rag-embed
//!
//! The embedding gateway of the codebase index: turns text into fixed-length
//! `f32` vectors. The default backend runs local ONNX models through
//! FastEmbed; a deterministic mock backend is available for tests and
//! offline use.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rag_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // sentence-transformers/all-MiniLM-L6-v2, 384 dimensions, unit-normalized
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let texts = vec!["fn main() {}".to_string(), "def main(): pass".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//! println!("{} embeddings of dimension {}", result.len(), result.dimension);
//!
//! let query = provider.embed_text("program entry point").await?;
//! assert_eq!(query.len(), provider.embedding_dimension());
//! # Ok(())
//! # }
//! ```
//!
//! ## Normalization
//!
//! Downstream ranking uses a plain dot product, which equals cosine
//! similarity only for unit-length vectors. [`EmbedConfig::normalize`] is on
//! by default; switch it off only for models whose output is already
//! normalized or when raw scores are wanted.
//!
//! ## Modules
//!
//! - [`config`]: model configuration
//! - [`provider`]: the [`EmbeddingProvider`] trait and its implementations
//! - [`error`]: error types

pub mod config;
pub mod error;
pub mod provider;

pub use config::{DEFAULT_MODEL_NAME, EmbedConfig};
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingResult, FastEmbedProvider, MockEmbeddingProvider,
    normalize_in_place, resolve_model,
};
