//! Persistence of a [`VectorIndex`] as `embeddings.npy` + `file_paths.txt`.

use super::{VectorIndex, npy};
use crate::error::{Result, RetrieverError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Embedding matrix artifact, NumPy `.npy` v1.0, `<f4`, shape `(N, D)`
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";
/// Path list artifact, one relative path per line, no trailing newline
pub const FILE_PATHS_FILE: &str = "file_paths.txt";

/// Reads and writes one index directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether both artifacts are present.
    pub fn exists(&self) -> bool {
        self.dir.join(EMBEDDINGS_FILE).is_file() && self.dir.join(FILE_PATHS_FILE).is_file()
    }

    /// Check that [`save`](Self::save) may replace the directory.
    ///
    /// The directory must be absent, empty, or hold nothing but the two index
    /// artifacts. Anything else means the path points somewhere that is not
    /// an index, and it is refused rather than overwritten.
    pub fn check_replaceable(&self) -> Result<()> {
        let metadata = match fs::symlink_metadata(&self.dir) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RetrieverError::io(&self.dir, e)),
        };
        if !metadata.is_dir() {
            return Err(RetrieverError::InvalidConfig {
                message: format!(
                    "storage path {} exists and is not a directory",
                    self.dir.display()
                ),
            });
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| RetrieverError::io(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| RetrieverError::io(&self.dir, e))?;
            let name = entry.file_name();
            let is_file = entry.file_type().is_ok_and(|t| t.is_file());
            if !is_file || (name != EMBEDDINGS_FILE && name != FILE_PATHS_FILE) {
                return Err(RetrieverError::InvalidConfig {
                    message: format!(
                        "storage path {} holds {}, which is not part of an index; \
                         choose an empty or dedicated directory",
                        self.dir.display(),
                        entry.path().display()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Replace the index directory with `index`.
    ///
    /// Both artifacts are written to a staging directory next to the
    /// destination which is then renamed into place, so the directory never
    /// holds a matrix from one build and paths from another. A directory
    /// holding anything besides the artifacts is left untouched and the
    /// save fails with [`RetrieverError::InvalidConfig`].
    pub fn save(&self, index: &VectorIndex) -> Result<()> {
        self.check_replaceable()?;
        let name = self
            .dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RetrieverError::io(
                    &self.dir,
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "storage path must end in a directory name",
                    ),
                )
            })?;
        let parent = match self.dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| RetrieverError::io(&parent, e))?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{name}.staging-"))
            .tempdir_in(&parent)
            .map_err(|e| RetrieverError::io(&parent, e))?;
        write_synced(
            &staging.path().join(EMBEDDINGS_FILE),
            &npy::encode(index.matrix()),
        )?;
        write_synced(
            &staging.path().join(FILE_PATHS_FILE),
            index.file_paths().join("\n").as_bytes(),
        )?;
        let staged = staging.keep();
        debug!("Staged index in {}", staged.display());

        if let Err(e) = self.swap_in(&staged, &parent, name) {
            let _ = fs::remove_dir_all(&staged);
            return Err(e);
        }

        info!(
            "Saved index with {} files ({} dimensions) to {}",
            index.len(),
            index.dimension(),
            self.dir.display()
        );
        Ok(())
    }

    fn swap_in(&self, staged: &Path, parent: &Path, name: &str) -> Result<()> {
        if fs::symlink_metadata(&self.dir).is_err() {
            return fs::rename(staged, &self.dir).map_err(|e| RetrieverError::io(&self.dir, e));
        }

        let retired = parent.join(format!(".{}.retired-{}", name, std::process::id()));
        if retired.exists() {
            fs::remove_dir_all(&retired).map_err(|e| RetrieverError::io(&retired, e))?;
        }
        fs::rename(&self.dir, &retired).map_err(|e| RetrieverError::io(&self.dir, e))?;
        if let Err(e) = fs::rename(staged, &self.dir) {
            // Put the previous index back
            let _ = fs::rename(&retired, &self.dir);
            return Err(RetrieverError::io(&self.dir, e));
        }

        let removed = if retired.is_dir() {
            fs::remove_dir_all(&retired)
        } else {
            fs::remove_file(&retired)
        };
        if let Err(e) = removed {
            warn!("Could not remove previous index at {}: {}", retired.display(), e);
        }
        Ok(())
    }

    /// Load and validate the index.
    ///
    /// Paths are returned exactly as stored, in row order.
    pub fn load(&self) -> Result<VectorIndex> {
        if !self.dir.is_dir() {
            return Err(RetrieverError::IndexNotFound {
                path: self.dir.clone(),
            });
        }

        let embeddings_path = self.dir.join(EMBEDDINGS_FILE);
        let matrix = npy::decode(&read_artifact(&embeddings_path)?)
            .map_err(|e| RetrieverError::corrupt(&embeddings_path, e.to_string()))?;

        let paths_path = self.dir.join(FILE_PATHS_FILE);
        let text = String::from_utf8(read_artifact(&paths_path)?)
            .map_err(|_| RetrieverError::corrupt(&paths_path, "file list is not valid UTF-8"))?;
        let file_paths = parse_path_list(&text);

        if matrix.rows() != file_paths.len() {
            return Err(RetrieverError::corrupt(
                &self.dir,
                format!(
                    "{} has {} rows but {} lists {} paths",
                    EMBEDDINGS_FILE,
                    matrix.rows(),
                    FILE_PATHS_FILE,
                    file_paths.len()
                ),
            ));
        }

        debug!(
            "Loaded index from {}: {} files, {} dimensions",
            self.dir.display(),
            matrix.rows(),
            matrix.dimension()
        );
        VectorIndex::new(matrix, file_paths)
    }
}

/// Save `index` to `dir`, see [`IndexStore::save`].
pub fn save_index(index: &VectorIndex, dir: impl AsRef<Path>) -> Result<()> {
    IndexStore::new(dir.as_ref()).save(index)
}

/// Load the index in `dir`, see [`IndexStore::load`].
pub fn load_index(dir: impl AsRef<Path>) -> Result<VectorIndex> {
    IndexStore::new(dir.as_ref()).load()
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RetrieverError::IndexNotFound {
            path: path.to_path_buf(),
        },
        _ => RetrieverError::io(path, e),
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).map_err(|e| RetrieverError::io(path, e))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| RetrieverError::io(path, e))
}

/// An empty file holds no paths. A single trailing newline, as left by
/// editors, is tolerated.
fn parse_path_list(text: &str) -> Vec<String> {
    let text = text.strip_suffix('\n').unwrap_or(text);
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n').map(str::to_string).collect()
}
