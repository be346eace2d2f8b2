//! Exact nearest-neighbour index over chunk embeddings.
//!
//! An exhaustive scan by squared Euclidean distance. Indexes hold a single
//! document's chunks (hundreds of vectors at most), so no approximation or
//! partitioning is needed and results are fully deterministic.

use serde::Serialize;

use crate::embedding::squared_l2;
use crate::error::IndexError;

/// One search result: a chunk position and its squared L2 distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_index: usize,
    pub distance: f32,
}

/// Flat in-memory vector index.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dims: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Build an index from `vectors`; position `i` is chunk `i`.
    ///
    /// All vectors must share one non-zero dimension. An empty input
    /// yields an empty index.
    pub fn build(vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let dims = match vectors.first() {
            Some(v) => v.len(),
            None => return Ok(Self::default()),
        };
        if dims == 0 {
            return Err(IndexError::ZeroDimension);
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                found: bad.len(),
            });
        }
        Ok(Self { dims, vectors })
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Dimensionality of the indexed vectors (0 for an empty index).
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Return the `k` nearest vectors to `query`, ascending by distance.
    ///
    /// Ties are broken by ascending chunk index. When `k` exceeds the
    /// index size every vector is returned.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                found: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(chunk_index, v)| SearchHit {
                chunk_index,
                distance: squared_l2(query, v),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
