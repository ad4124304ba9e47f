//! Layered runtime configuration.
//!
//! Values come from three layers, later ones winning: an optional TOML file,
//! environment variables (a `.env` file is loaded into the environment by
//! the binary), and command-line flags. Each layer is a [`RetrieverConfig`]
//! with every field optional; [`RetrieverConfig::merge`] stacks them.

use crate::error::{Result, RetrieverError};
use rag_embed::{DEFAULT_MODEL_NAME, EmbedConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CODEBASE_PATH_ENV: &str = "CODEBASE_PATH";
pub const STORAGE_PATH_ENV: &str = "RAG_STORAGE_PATH";
pub const MODEL_NAME_ENV: &str = "RAG_MODEL_NAME";
pub const MODEL_CACHE_ENV: &str = "RAG_MODEL_CACHE";
pub const MAX_FILE_SIZE_ENV: &str = "RAG_MAX_FILE_SIZE";

/// Settings for building and querying an index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrieverConfig {
    /// Root of the tree to index
    pub codebase_path: Option<PathBuf>,
    /// Directory holding `embeddings.npy` and `file_paths.txt`
    pub storage_path: Option<PathBuf>,
    /// Embedding model identifier
    pub model_name: Option<String>,
    /// Where model files are downloaded
    pub model_cache_dir: Option<PathBuf>,
    /// Files above this many bytes are skipped
    pub max_file_size: Option<u64>,
    /// Texts per embedding call
    pub batch_size: Option<usize>,
    /// Scale embeddings to unit length
    pub normalize: Option<bool>,
}

impl RetrieverConfig {
    /// Parse a TOML file using the same keys as the struct fields.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RetrieverError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| RetrieverError::ConfigFile {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })
    }

    /// Read the environment layer from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the environment layer through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let max_file_size = get(MAX_FILE_SIZE_ENV)
            .map(|v| {
                v.trim().parse::<u64>().map_err(|_| RetrieverError::InvalidConfig {
                    message: format!("{MAX_FILE_SIZE_ENV} must be a byte count, got {v:?}"),
                })
            })
            .transpose()?;

        Ok(Self {
            codebase_path: get(CODEBASE_PATH_ENV).map(PathBuf::from),
            storage_path: get(STORAGE_PATH_ENV).map(PathBuf::from),
            model_name: get(MODEL_NAME_ENV),
            model_cache_dir: get(MODEL_CACHE_ENV).map(PathBuf::from),
            max_file_size,
            ..Self::default()
        })
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: Self) -> Self {
        Self {
            codebase_path: other.codebase_path.or(self.codebase_path),
            storage_path: other.storage_path.or(self.storage_path),
            model_name: other.model_name.or(self.model_name),
            model_cache_dir: other.model_cache_dir.or(self.model_cache_dir),
            max_file_size: other.max_file_size.or(self.max_file_size),
            batch_size: other.batch_size.or(self.batch_size),
            normalize: other.normalize.or(self.normalize),
        }
    }

    /// File layer (if any), then environment, then `overrides`.
    pub fn resolve(config_file: Option<&Path>, overrides: Self) -> Result<Self> {
        let base = match config_file {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        Ok(base.merge(Self::from_env()?).merge(overrides))
    }

    pub fn require_codebase(&self) -> Result<&Path> {
        self.codebase_path
            .as_deref()
            .ok_or(RetrieverError::ConfigMissing {
                field: "codebase_path",
            })
    }

    pub fn require_storage(&self) -> Result<&Path> {
        self.storage_path
            .as_deref()
            .ok_or(RetrieverError::ConfigMissing {
                field: "storage_path",
            })
    }

    pub fn model_name(&self) -> &str {
        self.model_name.as_deref().unwrap_or(DEFAULT_MODEL_NAME)
    }

    /// Embedding settings derived from this configuration.
    pub fn embed_config(&self) -> EmbedConfig {
        let mut config = EmbedConfig::new(self.model_name());
        if let Some(dir) = &self.model_cache_dir {
            config = config.with_cache_dir(dir);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(normalize) = self.normalize {
            config = config.with_normalize(normalize);
        }
        config
    }
}
