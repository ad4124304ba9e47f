//! Full index build: walk, embed, persist.
//!
//! ```text
//! CorpusWalker ─(texts, paths)─▶ EmbeddingProvider ─(rows)─▶ IndexStore::save
//! ```
//!
//! Every step completes before the next starts. A failure at any step
//! leaves the previous index (or no index) in place.

use super::corpus_walker::{CorpusWalker, SkipTally};
use super::exclusion::{ExclusionMatcher, ExclusionOptions};
use crate::config::RetrieverConfig;
use crate::error::{Result, RetrieverError};
use crate::storage::{EmbeddingMatrix, IndexStore, VectorIndex};
use rag_embed::EmbeddingProvider;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub indexed_files: usize,
    pub dimension: usize,
    pub skipped: SkipTally,
    pub pruned_dirs: Vec<String>,
    pub storage_dir: PathBuf,
    /// Ignore file the rules were read from, if any
    pub ignore_file: Option<PathBuf>,
}

pub struct IndexBuilder {
    walker: CorpusWalker,
    store: IndexStore,
    provider: Arc<dyn EmbeddingProvider>,
}

impl IndexBuilder {
    pub fn new(
        walker: CorpusWalker,
        store: IndexStore,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            walker,
            store,
            provider,
        }
    }

    /// Assemble a builder from configuration.
    ///
    /// Reads the corpus root's ignore file. When the storage directory lies
    /// inside the corpus it is excluded from the walk; a storage directory
    /// that contains the corpus root is refused, since saving replaces it.
    pub fn for_config(
        config: &RetrieverConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let root = config.require_codebase()?;
        let storage = config.require_storage()?;
        if !root.is_dir() {
            return Err(RetrieverError::CodebaseNotFound {
                path: root.to_path_buf(),
            });
        }

        let root_abs = resolve_path(root)?;
        let storage_abs = resolve_path(storage)?;
        if root_abs.starts_with(&storage_abs) {
            return Err(RetrieverError::InvalidConfig {
                message: format!(
                    "storage path {} contains the codebase {}; saving would replace it",
                    storage.display(),
                    root.display()
                ),
            });
        }

        let mut options = ExclusionOptions::default();
        if let Ok(inside) = storage_abs.strip_prefix(&root_abs) {
            let rule = anchored_dir_rule(inside);
            debug!("Storage directory is inside the codebase, excluding {}", rule);
            options = options.with_extra_rule(rule);
        }

        let matcher = ExclusionMatcher::discover(root, &options)?;
        let walker = CorpusWalker::new(root, matcher).with_max_file_size(config.max_file_size);
        Ok(Self::new(walker, IndexStore::new(storage), provider))
    }

    pub fn walker(&self) -> &CorpusWalker {
        &self.walker
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Build the index and replace whatever the store held before.
    pub async fn build(&self) -> Result<BuildReport> {
        let root = self.walker.root().to_path_buf();
        // Refuse a foreign storage directory before paying for the embeddings
        self.store.check_replaceable()?;
        info!("Indexing {}", root.display());

        let walker = self.walker.clone();
        let outcome = tokio::task::spawn_blocking(move || walker.walk()).await??;
        info!(
            "Found {} files ({} skipped, {} directories pruned)",
            outcome.len(),
            outcome.skipped.total(),
            outcome.pruned_dirs.len()
        );

        if outcome.is_empty() {
            warn!("No readable files under {}, index not written", root.display());
            return Err(RetrieverError::EmptyCorpus { root });
        }

        let skipped = outcome.skipped.clone();
        let pruned_dirs = outcome.pruned_dirs.clone();
        let (contents, paths) = outcome.into_parts();

        info!(
            "Embedding {} files with {}",
            contents.len(),
            self.provider.provider_name()
        );
        let result = self.provider.embed_texts(&contents).await?;
        if result.len() != paths.len() {
            return Err(RetrieverError::InconsistentEmbeddings {
                message: format!(
                    "{} embeddings returned for {} files",
                    result.len(),
                    paths.len()
                ),
            });
        }

        let matrix = EmbeddingMatrix::from_rows(result.embeddings)?;
        if matrix.dimension() == 0 {
            return Err(RetrieverError::InconsistentEmbeddings {
                message: "embeddings are empty".to_string(),
            });
        }
        let dimension = matrix.dimension();
        let index = VectorIndex::new(matrix, paths)?;
        let indexed_files = index.len();

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&index)).await??;

        Ok(BuildReport {
            indexed_files,
            dimension,
            skipped,
            pruned_dirs,
            storage_dir: self.store.dir().to_path_buf(),
            ignore_file: self.walker.matcher().source().map(Path::to_path_buf),
        })
    }
}

/// Absolute form of `path` with symlinks resolved as far as the path exists.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| RetrieverError::io(path, e))?;
    let absolute = normalize_lexically(&absolute);
    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return Ok(rest.iter().rev().fold(canonical, |acc, part| acc.join(part)));
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(absolute),
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Gitignore rule matching exactly the directory `relative` under the root.
fn anchored_dir_rule(relative: &Path) -> String {
    let mut rule = String::from("/");
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            rule.push('/');
        }
        for ch in part.chars() {
            if matches!(ch, '*' | '?' | '[' | ']' | '\\' | '!' | '#') {
                rule.push('\\');
            }
            rule.push(ch);
        }
    }
    rule.push('/');
    rule
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::load_index;
    use rag_embed::MockEmbeddingProvider;
    use std::fs;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn config(root: &Path, storage: &Path) -> RetrieverConfig {
        RetrieverConfig {
            codebase_path: Some(root.to_path_buf()),
            storage_path: Some(storage.to_path_buf()),
            ..Default::default()
        }
    }

    fn mock() -> Arc<dyn EmbeddingProvider> {
        Arc::new(MockEmbeddingProvider::new(32))
    }

    #[tokio::test]
    async fn test_build_writes_index() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("README.md"), "# hello").unwrap();
        let storage = dir.path().join("index");

        let builder = IndexBuilder::for_config(&config(&root, &storage), mock()).unwrap();
        let report = builder.build().await.unwrap();

        assert_eq!(report.indexed_files, 2);
        assert_eq!(report.dimension, 32);
        assert_eq!(report.ignore_file, None);
        let index = load_index(&storage).unwrap();
        assert_eq!(index.file_paths(), &["README.md", "src/main.rs"]);
    }

    #[tokio::test]
    async fn test_storage_inside_codebase_is_not_indexed() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("lib.rs"), "pub fn f() {}").unwrap();
        let storage = root.join(".rag").join("index");

        let builder = IndexBuilder::for_config(&config(root, &storage), mock()).unwrap();
        builder.build().await.unwrap();
        // Second build must not pick up the first build's artifacts
        let report = builder.build().await.unwrap();

        assert_eq!(report.indexed_files, 1);
        assert_eq!(report.pruned_dirs, vec![".rag/index".to_string()]);
    }

    #[test]
    fn test_storage_containing_codebase_is_refused() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).unwrap();

        let result = IndexBuilder::for_config(&config(&root, dir.path()), mock());
        assert!(matches!(result, Err(RetrieverError::InvalidConfig { .. })));
        let result = IndexBuilder::for_config(&config(&root, &root), mock());
        assert!(matches!(result, Err(RetrieverError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_foreign_storage_directory_is_left_alone() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        let storage = dir.path().join("documents");
        fs::create_dir_all(storage.join("notes")).unwrap();
        fs::write(storage.join("notes/important.txt"), "keep me").unwrap();

        let builder = IndexBuilder::for_config(&config(&root, &storage), mock()).unwrap();
        let err = builder.build().await.unwrap_err();

        assert!(matches!(err, RetrieverError::InvalidConfig { .. }));
        assert!(storage.join("notes/important.txt").is_file());
        assert!(!storage.join(crate::storage::EMBEDDINGS_FILE).exists());
    }

    #[test]
    fn test_missing_codebase() {
        let dir = tempdir().unwrap();
        let result = IndexBuilder::for_config(
            &config(&dir.path().join("absent"), &dir.path().join("index")),
            mock(),
        );
        assert!(matches!(result, Err(RetrieverError::CodebaseNotFound { .. })));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_empty_corpus_writes_nothing() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("blob.bin"), [0xffu8, 0xfe, 0x00]).unwrap();
        let storage = dir.path().join("index");

        let builder = IndexBuilder::for_config(&config(&root, &storage), mock()).unwrap();
        let err = builder.build().await.unwrap_err();

        assert!(matches!(err, RetrieverError::EmptyCorpus { .. }));
        assert!(!storage.exists());
        assert!(logs_contain("index not written"));
    }

    #[test]
    fn test_anchored_dir_rule() {
        assert_eq!(anchored_dir_rule(Path::new("index")), "/index/");
        assert_eq!(anchored_dir_rule(Path::new(".rag/v[1]")), "/.rag/v\\[1\\]/");
    }

    #[test]
    fn test_resolve_path_handles_missing_tail() {
        let dir = tempdir().unwrap();
        let resolved = resolve_path(&dir.path().join("a/../b/c")).unwrap();
        let base = dir.path().canonicalize().unwrap();
        assert_eq!(resolved, base.join("b").join("c"));
    }
}
