//! rag-retriever: semantic file search over a codebase
//!
//! Builds a dense vector index with one embedding per text file and answers
//! free-text queries by ranking files against the query embedding.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: exclusion rules, corpus walk, ranking, build and search pipelines
//! - **[`storage`]**: the on-disk index (`embeddings.npy` + `file_paths.txt`)
//! - **[`config`]**: layered configuration (TOML file, environment, flags)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rag_embed::FastEmbedProvider;
//! use rag_retriever::config::RetrieverConfig;
//! use rag_retriever::retrieval::{index_builder::IndexBuilder, searcher::Searcher};
//! use std::sync::Arc;
//!
//! # async fn example() -> rag_retriever::Result<()> {
//! let config = RetrieverConfig {
//!     codebase_path: Some("./my-project".into()),
//!     storage_path: Some("./my-project-index".into()),
//!     ..Default::default()
//! };
//! let provider = Arc::new(FastEmbedProvider::create(config.embed_config()).await?);
//!
//! IndexBuilder::for_config(&config, provider.clone())?.build().await?;
//!
//! let searcher = Searcher::open(config.require_storage()?, provider).await?;
//! for hit in searcher.search("where are sessions created", 3).await? {
//!     println!("File: {}, Score: {}", hit.file_path, hit.score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Codebase → ExclusionMatcher → CorpusWalker → EmbeddingProvider → IndexStore
//!                                                     ↑                ↓
//!                                 query ──────────────┘      Searcher → ranked files
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use error::{Result, RetrieverError};
