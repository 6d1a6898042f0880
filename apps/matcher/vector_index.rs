//! Flat inner-product index over L2-normalized vectors.
//!
//! Vectors are stored contiguously; search is an exhaustive scan, which is
//! the right trade-off for the few thousand records a snapshot holds.

use crate::error::{MatchError, Result};

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// A search hit: row position in the index and its similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a batch of vectors. Every vector must match the index dimension.
    pub fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(MatchError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Top-`k` rows by inner product, best first.
    ///
    /// Returns fewer than `k` hits when the index is smaller. Ties keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(MatchError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                similarity: inner_product(query, row),
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        Ok(hits)
    }
}

/// A vector index paired with the label of every row.
///
/// Row `i` of `index` always belongs to `labels[i]`; the two are only ever
/// built together through [`LabeledIndex::build`].
#[derive(Debug, Clone, Default)]
pub struct LabeledIndex {
    index: VectorIndex,
    labels: Vec<String>,
}

impl LabeledIndex {
    pub fn empty(dimension: usize) -> Self {
        Self {
            index: VectorIndex::new(dimension),
            labels: Vec::new(),
        }
    }

    /// Normalize and insert `vectors` in order, labelling row `i` with
    /// `labels[i]`.
    pub fn build(dimension: usize, labels: Vec<String>, mut vectors: Vec<Vec<f32>>) -> Result<Self> {
        if labels.len() != vectors.len() {
            return Err(MatchError::ConfigurationFault(format!(
                "{} labels for {} vectors",
                labels.len(),
                vectors.len()
            )));
        }
        for vector in vectors.iter_mut() {
            l2_normalize(vector);
        }
        let mut index = VectorIndex::new(dimension);
        index.add_batch(&vectors)?;
        Ok(Self { index, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Nearest labels for `query`, best first. Positions without a label are
    /// dropped rather than dereferenced.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(&str, f32)>> {
        Ok(self
            .index
            .search(query, k)?
            .into_iter()
            .filter_map(|hit| {
                self.labels
                    .get(hit.position)
                    .map(|label| (label.as_str(), hit.similarity))
            })
            .collect())
    }
}
