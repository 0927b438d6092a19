//! Exact nearest-neighbour index over chunk embeddings.
//!
//! Every entry shares one `(provider tag, dims)` pair, fixed when the index
//! is created. Search is brute-force over all entries at every size, so
//! results are exact; similarity is `(cos + 1) / 2` in `[0, 1]`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::embedding::similarity_score;
use crate::error::IndexError;

/// One stored embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub provider: String,
}

/// In-memory vector index keyed by chunk id.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    provider: String,
    dims: usize,
    entries: BTreeMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub fn new(provider: impl Into<String>, dims: usize) -> Self {
        Self {
            provider: provider.into(),
            dims,
            entries: BTreeMap::new(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the vector for `entry.chunk_id`.
    ///
    /// Rejects entries from another provider or with the wrong length.
    pub fn upsert(&mut self, entry: VectorEntry) -> Result<(), IndexError> {
        if entry.provider != self.provider {
            return Err(IndexError::ProviderMismatch {
                expected: self.provider.clone(),
                actual: entry.provider,
            });
        }
        self.check_dims(&entry.vector)?;
        self.entries.insert(entry.chunk_id, entry.vector);
        Ok(())
    }

    pub fn delete(&mut self, chunk_id: &str) -> bool {
        self.entries.remove(chunk_id).is_some()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&[f32]> {
        self.entries.get(chunk_id).map(Vec::as_slice)
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.entries.contains_key(chunk_id)
    }

    /// All entries in chunk-id order.
    pub fn entries(&self) -> impl Iterator<Item = VectorEntry> + '_ {
        self.entries.iter().map(|(id, v)| VectorEntry {
            chunk_id: id.clone(),
            vector: v.clone(),
            provider: self.provider.clone(),
        })
    }

    /// Top `k` chunks by similarity to `query`, descending, ties broken by
    /// chunk id ascending.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>, IndexError> {
        self.check_dims(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut hits: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|(id, v)| (id.clone(), similarity_score(query, v)))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn check_dims(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}
