//! In-memory HNSW index over message embeddings.
//!
//! Cosine distance, fixed dimensionality, bounded capacity. Points are keyed
//! by message id; the graph itself only knows dense internal ids, so the
//! index keeps the mapping both ways. The graph is never persisted: the
//! semantic engine rebuilds it from its snapshot on load.

use std::collections::HashMap;

use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PagingError, Result};

/// Upper bound on HNSW layers.
const MAX_LAYERS: usize = 16;

/// Shape and build parameters of a [`VectorIndex`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    /// Embedding width. Vectors of any other length are rejected.
    pub dimensions: usize,
    /// Capacity. Inserts beyond it are skipped.
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
    /// Candidate list size while building the graph.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Maximum connections per node per layer.
    #[serde(rename = "M", default = "default_m")]
    pub m: usize,
}

fn default_max_elements() -> usize {
    10_000
}

fn default_ef_construction() -> usize {
    200
}

fn default_m() -> usize {
    16
}

impl IndexConfig {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            max_elements: default_max_elements(),
            ef_construction: default_ef_construction(),
            m: default_m(),
        }
    }

    pub fn with_max_elements(mut self, n: usize) -> Self {
        self.max_elements = n;
        self
    }

    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(PagingError::Config("dimensions must be at least 1".into()));
        }
        if self.m == 0 || self.ef_construction == 0 {
            return Err(PagingError::Config(
                "M and ef_construction must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`VectorIndex::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    /// The key already has a point; the graph was left unchanged.
    AlreadyIndexed,
    /// Capacity reached; the vector was dropped.
    Full,
    /// All-zero vector, which has no cosine direction.
    Degenerate,
}

/// Approximate nearest-neighbor index keyed by message id.
pub struct VectorIndex {
    config: IndexConfig,
    hnsw: Hnsw<'static, f32, DistCosine>,
    /// message id -> graph id
    ids: HashMap<String, usize>,
    /// graph id -> message id
    keys: Vec<String>,
}

impl VectorIndex {
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let hnsw = Hnsw::new(
            config.m,
            config.max_elements,
            MAX_LAYERS,
            config.ef_construction,
            DistCosine,
        );
        Ok(Self {
            config,
            hnsw,
            ids: HashMap::new(),
            keys: Vec::new(),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= self.config.max_elements
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ids.contains_key(key)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(PagingError::Dimension {
                expected: self.config.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Add `vector` under `key`.
    ///
    /// Errors only on a dimension mismatch. Duplicates, a full index, and
    /// zero vectors are reported through [`Insertion`].
    pub fn insert(&mut self, key: &str, vector: &[f32]) -> Result<Insertion> {
        self.check_dimensions(vector)?;

        if self.ids.contains_key(key) {
            return Ok(Insertion::AlreadyIndexed);
        }
        if self.is_full() {
            warn!(
                "Vector index full ({} elements), not indexing {key}",
                self.config.max_elements
            );
            return Ok(Insertion::Full);
        }
        if vector.iter().all(|x| *x == 0.0) {
            debug!("Zero embedding for {key}, not indexing");
            return Ok(Insertion::Degenerate);
        }

        let graph_id = self.keys.len();
        self.hnsw.insert((vector, graph_id));
        self.ids.insert(key.to_string(), graph_id);
        self.keys.push(key.to_string());
        Ok(Insertion::Inserted)
    }

    /// Up to `k` nearest keys to `query`, closest first, with cosine
    /// distances. `ef_search` is raised to `k` when smaller.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimensions(query)?;
        if self.is_empty() || k == 0 || query.iter().all(|x| *x == 0.0) {
            return Ok(Vec::new());
        }

        let results = self.hnsw.search(query, k, ef_search.max(k));
        Ok(results
            .into_iter()
            .filter_map(|n| {
                let key = self.keys.get(n.d_id)?;
                Some((key.clone(), n.distance))
            })
            .collect())
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("config", &self.config)
            .field("len", &self.keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(dims: usize, cap: usize) -> VectorIndex {
        VectorIndex::new(
            IndexConfig::new(dims)
                .with_max_elements(cap)
                .with_ef_construction(50)
                .with_m(8),
        )
        .unwrap()
    }

    #[test]
    fn nearest_neighbor_comes_first() {
        let mut index = small(4, 100);
        index.insert("a", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.insert("b", &[0.0, 1.0, 0.0, 0.0]).unwrap();
        index.insert("c", &[0.9, 0.1, 0.0, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0, 0.0], 2, 16).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a");
        assert!(results[0].1 < 1e-4);
        assert_eq!(results[1].0, "c");
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = small(3, 10);
        assert!(index.search(&[1.0, 0.0, 0.0], 5, 16).unwrap().is_empty());
    }

    #[test]
    fn wrong_width_is_rejected() {
        let mut index = small(3, 10);
        assert!(matches!(
            index.insert("a", &[1.0, 0.0]),
            Err(PagingError::Dimension {
                expected: 3,
                actual: 2
            })
        ));
        assert!(index.search(&[1.0; 4], 1, 16).is_err());
    }

    #[test]
    fn duplicate_keys_are_not_reinserted() {
        let mut index = small(2, 10);
        assert_eq!(index.insert("a", &[1.0, 0.0]).unwrap(), Insertion::Inserted);
        assert_eq!(
            index.insert("a", &[0.0, 1.0]).unwrap(),
            Insertion::AlreadyIndexed
        );
        assert_eq!(index.len(), 1);
        let results = index.search(&[1.0, 0.0], 5, 16).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut index = small(2, 2);
        index.insert("a", &[1.0, 0.0]).unwrap();
        index.insert("b", &[0.0, 1.0]).unwrap();
        assert_eq!(index.insert("c", &[1.0, 1.0]).unwrap(), Insertion::Full);
        assert!(!index.contains("c"));
        assert!(index.is_full());
    }

    #[test]
    fn zero_vectors_are_skipped() {
        let mut index = small(2, 10);
        assert_eq!(index.insert("z", &[0.0, 0.0]).unwrap(), Insertion::Degenerate);
        assert!(index.is_empty());
    }

    #[test]
    fn config_serializes_with_capital_m() {
        let json = serde_json::to_value(IndexConfig::new(384)).unwrap();
        assert_eq!(json["dimensions"], 384);
        assert_eq!(json["maxElements"], 10_000);
        assert_eq!(json["efConstruction"], 200);
        assert_eq!(json["M"], 16);
    }
}
