//! On-disk vector index
//!
//! An index is a directory holding two artifacts that are always written and
//! read as a pair:
//!
//! ```text
//! <storage>/
//!   embeddings.npy   N x D float32 matrix, row i = file i
//!   file_paths.txt   N relative paths joined by '\n'
//! ```
//!
//! ## Key Components
//!
//! - **EmbeddingMatrix**: dense row-major `f32` matrix with a fixed width
//! - **VectorIndex**: a matrix together with the path of every row
//! - **IndexStore**: atomic save and validated load of a [`VectorIndex`]
//! - **npy**: the `.npy` codec used for `embeddings.npy`

use crate::error::{Result, RetrieverError};

pub mod index_store;
pub mod npy;

pub use index_store::{EMBEDDINGS_FILE, FILE_PATHS_FILE, IndexStore, load_index, save_index};

/// Row-major `rows x dimension` matrix of `f32`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingMatrix {
    rows: usize,
    dimension: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Stack rows into a matrix. All rows must have the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = rows.first().map(Vec::len).unwrap_or(0);
        let count = rows.len();
        let mut data = Vec::with_capacity(count * dimension);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dimension {
                return Err(RetrieverError::InconsistentEmbeddings {
                    message: format!(
                        "row {} has {} values, expected {}",
                        i,
                        row.len(),
                        dimension
                    ),
                });
            }
            data.extend(row);
        }
        Ok(Self {
            rows: count,
            dimension,
            data,
        })
    }

    /// Wrap an already flattened buffer. `data.len()` must be `rows * dimension`.
    pub fn from_flat(rows: usize, dimension: usize, data: Vec<f32>) -> Result<Self> {
        let expected = rows.checked_mul(dimension);
        if expected != Some(data.len()) {
            return Err(RetrieverError::InconsistentEmbeddings {
                message: format!(
                    "buffer of {} values does not fit a {}x{} matrix",
                    data.len(),
                    rows,
                    dimension
                ),
            });
        }
        Ok(Self {
            rows,
            dimension,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dimension;
        self.data.get(start..start + self.dimension)
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        let width = self.dimension;
        (0..self.rows).map(move |i| &self.data[i * width..(i + 1) * width])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Embedding matrix plus the file each row belongs to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorIndex {
    matrix: EmbeddingMatrix,
    file_paths: Vec<String>,
}

impl VectorIndex {
    /// Pair a matrix with its paths; the row count must equal the path count.
    pub fn new(matrix: EmbeddingMatrix, file_paths: Vec<String>) -> Result<Self> {
        if matrix.rows() != file_paths.len() {
            return Err(RetrieverError::InconsistentEmbeddings {
                message: format!(
                    "{} embedding rows for {} file paths",
                    matrix.rows(),
                    file_paths.len()
                ),
            });
        }
        Ok(Self { matrix, file_paths })
    }

    pub fn matrix(&self) -> &EmbeddingMatrix {
        &self.matrix
    }

    pub fn file_paths(&self) -> &[String] {
        &self.file_paths
    }

    pub fn len(&self) -> usize {
        self.file_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_paths.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.matrix.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_from_rows() {
        let matrix = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.dimension(), 2);
        assert_eq!(matrix.row(1), Some(&[3.0, 4.0][..]));
        assert_eq!(matrix.row(2), None);
        assert_eq!(matrix.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(matrix.iter_rows().count(), 2);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, RetrieverError::InconsistentEmbeddings { .. }));
    }

    #[test]
    fn test_from_flat_checks_length() {
        assert!(EmbeddingMatrix::from_flat(2, 3, vec![0.0; 6]).is_ok());
        assert!(EmbeddingMatrix::from_flat(2, 3, vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_zero_width_rows_still_iterate() {
        let matrix = EmbeddingMatrix::from_flat(3, 0, Vec::new()).unwrap();
        assert_eq!(matrix.iter_rows().count(), 3);
        assert_eq!(matrix.row(2), Some(&[][..]));
    }

    #[test]
    fn test_index_requires_one_path_per_row() {
        let matrix = EmbeddingMatrix::from_rows(vec![vec![1.0], vec![2.0]]).unwrap();
        assert!(VectorIndex::new(matrix.clone(), vec!["a".into()]).is_err());

        let index = VectorIndex::new(matrix, vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dimension(), 1);
        assert_eq!(index.file_paths()[1], "b");
    }
}
