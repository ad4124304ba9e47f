//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Result of embedding generation
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector and defaults
    /// to 0 for an empty result.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Scale `vector` to unit length. Zero vectors are left untouched.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn lock_model_cache() -> MutexGuard<'static, HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Both methods are pure functions of their input and the provider's fixed
/// configuration. Implementations that normalize must do so here: similarity
/// ranking downstream is a plain dot product.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text (query time)
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::embedding_gen("no embedding generated for text"))
    }

    /// Generate embeddings for multiple texts (build time, batched)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Strip the organisation prefix and the `-onnx` suffix so upstream names and
/// fastembed model codes compare equal.
fn model_stem(name: &str) -> String {
    let last = name.rsplit('/').next().unwrap_or(name);
    last.trim_end_matches("-onnx").to_ascii_lowercase()
}

/// Resolve a model identifier to a fastembed model and its output dimension.
///
/// Accepts fastembed model codes (`Qdrant/all-MiniLM-L6-v2-onnx`) as well as
/// the upstream repository names (`sentence-transformers/all-MiniLM-L6-v2`).
pub fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    let wanted = model_stem(name);
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| info.model_code.eq_ignore_ascii_case(name))
        .or_else(|| {
            TextEmbedding::list_supported_models()
                .into_iter()
                .find(|info| model_stem(&info.model_code) == wanted)
        })
        .map(|info| (info.model, info.dim))
        .ok_or_else(|| EmbedError::UnknownModel {
            model: name.to_string(),
        })
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`initialize`](Self::initialize)
    /// or use [`create`](Self::create) before embedding.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 384, // all-MiniLM-L6-v2
        }
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Downloads (if needed) and loads the embedding model, reusing a cached
    /// instance when the same configuration was loaded before.
    pub async fn initialize(&mut self) -> Result<()> {
        self.config.validate()?;
        let model_name = self.config.model_name().to_string();
        tracing::info!("Initializing FastEmbed provider for model: {}", model_name);

        let (model_kind, expected_dimension) = resolve_model(&model_name)?;
        let cache_key = self.create_cache_key(&model_kind);

        let cached = lock_model_cache()
            .get(&cache_key)
            .map(|(model, dim)| (Arc::clone(model), *dim));
        if let Some((model, dimension)) = cached {
            tracing::info!("Using cached model for: {}", model_name);
            self.model = Some(model);
            self.dimension = dimension;
            return Ok(());
        }

        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let mut init_options = InitOptions::new(model_kind)
                    .with_show_download_progress(config.show_download_progress);
                if let Some(cache_dir) = &config.cache_dir {
                    init_options = init_options.with_cache_dir(cache_dir.clone());
                }

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::model_unavailable(config.model_name(), e))?;

                // Probe once so a broken model fails here rather than mid-build
                let probe = model
                    .embed(vec!["test".to_string()], None)
                    .map_err(|e| EmbedError::model_unavailable(config.model_name(), e))?;
                let dimension = probe
                    .first()
                    .map(|emb| emb.len())
                    .unwrap_or(expected_dimension);

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        if dimension != expected_dimension {
            tracing::warn!(
                "Model {} reported dimension {} but produced {}",
                model_name,
                expected_dimension,
                dimension
            );
        }

        let model = Arc::new(Mutex::new(model));
        lock_model_cache().insert(cache_key, (Arc::clone(&model), dimension));

        self.model = Some(model);
        self.dimension = dimension;
        Ok(())
    }

    /// Create a cache key from the settings that affect the loaded model
    fn create_cache_key(&self, model: &EmbeddingModel) -> String {
        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(format!("{model:?}").as_bytes());
        if let Some(cache_dir) = &self.config.cache_dir {
            hasher.write(cache_dir.to_string_lossy().as_bytes());
        }
        format!("v1:{:x}", hasher.finish())
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        lock_model_cache().clear();
        tracing::info!("Model cache cleared");
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        lock_model_cache().len()
    }

    /// The configuration this provider was created with
    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size) {
            let chunk = chunk.to_vec();
            let model = Arc::clone(model);

            let batch = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", chunk.len());
                let mut guard = model
                    .lock()
                    .map_err(|_| EmbedError::embedding_gen("embedding model lock poisoned"))?;
                guard.embed(chunk, None).map_err(EmbedError::embedding_gen)
            })
            .await??;

            all_embeddings.extend(batch);
        }

        if all_embeddings.len() != texts.len() {
            return Err(EmbedError::embedding_gen(format!(
                "model returned {} embeddings for {} texts",
                all_embeddings.len(),
                texts.len()
            )));
        }

        if self.config.normalize {
            for embedding in &mut all_embeddings {
                normalize_in_place(embedding);
            }
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

/// Deterministic provider for tests and offline runs.
///
/// Hashes lowercase character trigrams into `dimension` signed buckets, so
/// identical texts get identical vectors and texts sharing substrings score
/// higher than unrelated ones. It records how often it was called.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    normalize: bool,
    batch_calls: AtomicUsize,
    texts_embedded: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            normalize: true,
            batch_calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
        }
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Number of `embed_texts` calls so far (including those made through `embed_text`)
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Total number of texts embedded so far
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    /// Embed one text synchronously
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        let chars: Vec<char> = text.to_lowercase().chars().collect();
        let grams: Vec<&[char]> = if chars.len() < 3 {
            vec![&chars[..]]
        } else {
            chars.windows(3).collect()
        };

        for gram in grams.into_iter().filter(|g| !g.is_empty()) {
            let mut hasher = FnvHasher::default();
            for c in gram {
                hasher.write_u32(*c as u32);
            }
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        if self.normalize {
            normalize_in_place(&mut vector);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        let embeddings = texts.iter().map(|t| self.embed_sync(t)).collect();
        Ok(EmbeddingResult {
            embeddings,
            dimension: self.dimension,
        })
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
        assert!(EmbeddingResult::new(vec![]).is_empty());
        assert_eq!(EmbeddingResult::new(vec![]).dimension, 0);
    }

    #[test]
    fn test_normalize_in_place() {
        let mut v = vec![3.0, 4.0];
        normalize_in_place(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize_in_place(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_fastembed_provider_creation() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());

        assert_eq!(provider.provider_name(), "fastembed");
        assert_eq!(provider.embedding_dimension(), 384);
    }

    #[test]
    fn test_resolve_model_accepts_upstream_and_fastembed_names() {
        let (_, dim) = resolve_model("sentence-transformers/all-MiniLM-L6-v2").unwrap();
        assert_eq!(dim, 384);

        let (_, dim) = resolve_model("Qdrant/all-MiniLM-L6-v2-onnx").unwrap();
        assert_eq!(dim, 384);
    }

    #[test]
    fn test_resolve_unknown_model() {
        let err = resolve_model("acme/definitely-not-a-model").unwrap_err();
        assert!(matches!(err, EmbedError::UnknownModel { .. }));
        assert!(err.is_model_unavailable());
    }

    #[tokio::test]
    async fn test_uninitialized_provider_refuses_to_embed() {
        let provider = FastEmbedProvider::new(EmbedConfig::default());
        let err = provider
            .embed_texts(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidConfig { .. }));

        // Empty input never touches the model
        let empty = provider.embed_texts(&[]).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_fails_initialization() {
        let err = FastEmbedProvider::create(EmbedConfig::new("acme/nope"))
            .await
            .unwrap_err();
        assert!(err.is_model_unavailable());
    }

    fn cache_key_for(config: EmbedConfig) -> String {
        let (model, _) = resolve_model(config.model_name()).unwrap();
        FastEmbedProvider::new(config).create_cache_key(&model)
    }

    #[test]
    fn test_cache_key_generation() {
        let key1 = cache_key_for(EmbedConfig::default());
        let key2 = cache_key_for(EmbedConfig::default());
        assert_eq!(key1, key2, "Same config should produce same cache key");
        assert!(key1.starts_with("v1:"));

        // Upstream name and fastembed code load the same model
        let key3 = cache_key_for(EmbedConfig::new("Qdrant/all-MiniLM-L6-v2-onnx"));
        assert_eq!(key1, key3);

        let key4 = cache_key_for(EmbedConfig::new("BAAI/bge-small-en-v1.5"));
        assert_ne!(key1, key4);

        let key5 = cache_key_for(EmbedConfig::default().with_cache_dir("/tmp/other-models"));
        assert_ne!(key1, key5);
    }

    #[test]
    fn test_mock_provider_is_deterministic_and_normalized() {
        let provider = MockEmbeddingProvider::new(64);
        let a = provider.embed_sync("fn main() {}");
        let b = provider.embed_sync("fn main() {}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mock_provider_similarity() {
        let provider = MockEmbeddingProvider::new(256);
        let query = provider.embed_sync("parse the config file");
        let related = provider.embed_sync("parse config file from disk");
        let unrelated = provider.embed_sync("zebra xylophone quartz");
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn test_mock_provider_short_and_empty_text() {
        let provider = MockEmbeddingProvider::new(8);
        assert_eq!(provider.embed_sync(""), vec![0.0; 8]);
        let short = provider.embed_sync("ab");
        assert!((dot(&short, &short) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mock_provider_counts_calls() {
        let provider = MockEmbeddingProvider::new(16);
        let texts = vec!["alpha".to_string(), "beta".to_string()];

        let result = tokio_test::block_on(provider.embed_texts(&texts)).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 16);

        let single = tokio_test::block_on(provider.embed_text("alpha")).unwrap();
        assert_eq!(single, result.embeddings[0]);

        assert_eq!(provider.batch_calls(), 2);
        assert_eq!(provider.texts_embedded(), 3);
    }

    #[tokio::test]
    #[ignore] // Downloads the real model: cargo test -p rag-embed -- --ignored
    async fn test_minilm_download_and_embedding() -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();

        let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
        assert_eq!(provider.embedding_dimension(), 384);

        let texts = vec![
            "Machine learning models process natural language efficiently.".to_string(),
            "Deep neural networks enable semantic understanding of text.".to_string(),
            "The recipe calls for two cups of flour.".to_string(),
        ];
        let batch = provider.embed_texts(&texts).await?;
        assert_eq!(batch.len(), 3);
        for embedding in &batch.embeddings {
            assert_eq!(embedding.len(), 384);
            assert!((dot(embedding, embedding) - 1.0).abs() < 1e-3);
        }

        let related = dot(&batch.embeddings[0], &batch.embeddings[1]);
        let unrelated = dot(&batch.embeddings[0], &batch.embeddings[2]);
        assert!(related > unrelated, "{related} <= {unrelated}");

        let single = provider.embed_text(&texts[0]).await?;
        assert!((dot(&single, &batch.embeddings[0]) - 1.0).abs() < 1e-3);

        // Second provider with the same config reuses the cached model
        let before = FastEmbedProvider::cache_size();
        let _again = FastEmbedProvider::create(EmbedConfig::default()).await?;
        assert_eq!(FastEmbedProvider::cache_size(), before);

        Ok(())
    }
}
