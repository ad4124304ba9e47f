//! Query side: embed the question, rank the stored files.

use super::ranker::{SearchHit, rank};
use crate::error::Result;
use crate::storage::{IndexStore, VectorIndex};
use rag_embed::EmbeddingProvider;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of results returned when the caller does not ask for more.
pub const DEFAULT_TOP_K: usize = 3;

/// A loaded index paired with the provider that embeds queries for it.
///
/// The provider must be the one the index was built with; a different model
/// is only caught when its dimension differs.
pub struct Searcher {
    index: VectorIndex,
    provider: Arc<dyn EmbeddingProvider>,
}

impl Searcher {
    pub fn new(index: VectorIndex, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, provider }
    }

    /// Load the index stored in `storage_dir`.
    pub async fn open(
        storage_dir: impl AsRef<Path>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let store = IndexStore::new(storage_dir.as_ref());
        let index = tokio::task::spawn_blocking(move || store.load()).await??;
        info!(
            "Loaded index: {} files, {} dimensions",
            index.len(),
            index.dimension()
        );
        Ok(Self::new(index, provider))
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// The `top_k` files most similar to `query`, best first.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        debug!("Searching for {:?} (top {})", query, top_k);
        let vector = self.provider.embed_text(query).await?;
        rank(&vector, &self.index, top_k)
    }

    /// Like [`search`](Self::search), dropping hits that score below `min_score`.
    pub async fn search_with_threshold(
        &self,
        query: &str,
        top_k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let hits = self.search(query, top_k).await?;
        Ok(match min_score {
            Some(min) => hits.into_iter().filter(|h| h.score >= min).collect(),
            None => hits,
        })
    }
}
