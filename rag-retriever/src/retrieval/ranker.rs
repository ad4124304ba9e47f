//! Top-k dot-product ranking over a loaded index.
//!
//! Scores are raw dot products. They equal cosine similarity only when the
//! stored rows and the query are unit length, which the embedding provider
//! guarantees when normalization is enabled (the default).

use crate::error::{Result, RetrieverError};
use crate::storage::{EmbeddingMatrix, VectorIndex};
use serde::Serialize;

/// One ranked file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub file_path: String,
    pub score: f32,
}

/// Dot product of two equally long vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Rank every file in `index` against `query` and keep the best `top_k`.
pub fn rank(query: &[f32], index: &VectorIndex, top_k: usize) -> Result<Vec<SearchHit>> {
    rank_rows(query, index.matrix(), index.file_paths(), top_k)
}

/// Rank the rows of `matrix`, labelled by `file_paths`, against `query`.
///
/// Results are sorted by descending score; equal scores keep row order, so
/// the same inputs always produce the same list. NaN scores sort last.
pub fn rank_rows(
    query: &[f32],
    matrix: &EmbeddingMatrix,
    file_paths: &[String],
    top_k: usize,
) -> Result<Vec<SearchHit>> {
    if query.len() != matrix.dimension() {
        return Err(RetrieverError::DimensionMismatch {
            expected: matrix.dimension(),
            actual: query.len(),
        });
    }
    if matrix.rows() != file_paths.len() {
        return Err(RetrieverError::InconsistentEmbeddings {
            message: format!(
                "{} rows but {} file paths",
                matrix.rows(),
                file_paths.len()
            ),
        });
    }
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let mut scored: Vec<(usize, f32)> = matrix
        .iter_rows()
        .map(|row| dot(query, row))
        .enumerate()
        .collect();
    scored.sort_by(|(ia, a), (ib, b)| {
        sort_key(*b)
            .total_cmp(&sort_key(*a))
            .then(ia.cmp(ib))
    });
    scored.truncate(top_k);

    Ok(scored
        .into_iter()
        .map(|(i, score)| SearchHit {
            file_path: file_paths[i].clone(),
            score,
        })
        .collect())
}

/// `total_cmp` orders -0.0 below 0.0 and puts positive NaN above infinity.
/// Neither is wanted for ranking.
fn sort_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else if score == 0.0 {
        0.0
    } else {
        score
    }
}
