//! Score fusion for hybrid retrieval.
//!
//! # Algorithm
//!
//! 1. Over-fetch `m = max(3k, 20)` candidates from each index
//!    ([`candidate_pool_size`]).
//! 2. Take the union of both candidate sets.
//! 3. `combined = wv × vector_score + wk × keyword_score`, a missing score
//!    counting as `0`.
//! 4. Sort by combined (desc), chunk id (asc); truncate to `k` ([`rank`]).
//!
//! The workspace filter runs between steps 3 and 4 in the engine, since it
//! needs the chunk table and the filesystem.

use std::collections::BTreeMap;

use crate::error::IndexError;

/// Allowed deviation of `vector + keyword` from `1.0`.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Minimum candidate pool fetched from each index.
pub const MIN_CANDIDATES: usize = 20;

/// Validated fusion weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    vector: f64,
    keyword: f64,
}

impl FusionWeights {
    /// Weights must be non-negative and sum to `1.0 ± 1e-6`.
    pub fn new(vector: f64, keyword: f64) -> Result<Self, IndexError> {
        let finite = vector.is_finite() && keyword.is_finite();
        if !finite
            || vector < 0.0
            || keyword < 0.0
            || (vector + keyword - 1.0).abs() > WEIGHT_TOLERANCE
        {
            return Err(IndexError::InvalidWeights { vector, keyword });
        }
        Ok(Self { vector, keyword })
    }

    /// The degraded-mode weights: `wv = 0`, `wk = 1`.
    pub fn keyword_only() -> Self {
        Self {
            vector: 0.0,
            keyword: 1.0,
        }
    }

    pub fn vector(&self) -> f64 {
        self.vector
    }

    pub fn keyword(&self) -> f64 {
        self.keyword
    }
}

/// Candidates fetched per index for a final `k`.
pub fn candidate_pool_size(k: usize) -> usize {
    k.saturating_mul(3).max(MIN_CANDIDATES)
}

/// A chunk that appeared in at least one candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub vector_score: Option<f64>,
    pub keyword_score: Option<f64>,
    pub combined: f64,
}

/// Merge vector and keyword hits into fused candidates, in chunk-id order.
pub fn fuse(
    vector_hits: &[(String, f64)],
    keyword_hits: &[(String, f64)],
    weights: FusionWeights,
) -> Vec<FusedCandidate> {
    let mut merged: BTreeMap<&str, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for (id, score) in vector_hits {
        merged.entry(id.as_str()).or_default().0 = Some(*score);
    }
    for (id, score) in keyword_hits {
        merged.entry(id.as_str()).or_default().1 = Some(*score);
    }

    merged
        .into_iter()
        .map(|(id, (v, k))| FusedCandidate {
            chunk_id: id.to_string(),
            vector_score: v,
            keyword_score: k,
            combined: weights.vector * v.unwrap_or(0.0) + weights.keyword * k.unwrap_or(0.0),
        })
        .collect()
}

/// Sort by combined score (desc), chunk id (asc), and keep the top `k`.
pub fn rank(mut candidates: Vec<FusedCandidate>, k: usize) -> Vec<FusedCandidate> {
    candidates.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(FusionWeights::new(0.6, 0.4).is_ok());
        assert!(FusionWeights::new(1.0, 0.0).is_ok());
        assert_eq!(
            FusionWeights::new(0.5, 0.6),
            Err(IndexError::InvalidWeights {
                vector: 0.5,
                keyword: 0.6
            })
        );
        assert!(FusionWeights::new(1.2, -0.2).is_err());
        assert!(FusionWeights::new(f64::NAN, 1.0).is_err());
        assert!(FusionWeights::new(0.6, 0.4 + 5e-7).is_ok());
    }

    #[test]
    fn pool_size_has_floor() {
        assert_eq!(candidate_pool_size(1), 20);
        assert_eq!(candidate_pool_size(10), 30);
    }

    #[test]
    fn fusion_prefers_balanced_match() {
        // A: vector 0.9, keyword 0.3 -> 0.54 + 0.12 = 0.66
        // B: vector 0.2, keyword 0.7625 -> 0.12 + 0.305 = 0.425
        let weights = FusionWeights::new(0.6, 0.4).unwrap();
        let fused = fuse(
            &hits(&[("A", 0.9), ("B", 0.2)]),
            &hits(&[("A", 0.3), ("B", 0.7625)]),
            weights,
        );
        let ranked = rank(fused, 10);
        assert_eq!(ranked[0].chunk_id, "A");
        assert!((ranked[0].combined - 0.66).abs() < 1e-9);
        assert!((ranked[1].combined - 0.425).abs() < 1e-9);
    }

    #[test]
    fn vector_heavy_weights_rank_semantic_match_first() {
        // A: 0.7 * 0.9 + 0.3 * 0.1 = 0.66
        // B: 0.7 * 0.2 + 0.3 * 0.95 = 0.425
        let weights = FusionWeights::new(0.7, 0.3).unwrap();
        let fused = fuse(
            &hits(&[("A", 0.9), ("B", 0.2)]),
            &hits(&[("A", 0.1), ("B", 0.95)]),
            weights,
        );
        let ranked = rank(fused, 10);
        assert_eq!(ranked[0].chunk_id, "A");
        assert!((ranked[0].combined - 0.66).abs() < 1e-9);
        assert_eq!(ranked[1].chunk_id, "B");
        assert!((ranked[1].combined - 0.425).abs() < 1e-9);
    }

    #[test]
    fn missing_scores_count_as_zero() {
        let weights = FusionWeights::new(0.6, 0.4).unwrap();
        let fused = fuse(&hits(&[("v", 1.0)]), &hits(&[("k", 1.0)]), weights);
        let v = fused.iter().find(|c| c.chunk_id == "v").unwrap();
        let k = fused.iter().find(|c| c.chunk_id == "k").unwrap();
        assert_eq!(v.keyword_score, None);
        assert!((v.combined - 0.6).abs() < 1e-9);
        assert_eq!(k.vector_score, None);
        assert!((k.combined - 0.4).abs() < 1e-9);
    }

    #[test]
    fn keyword_only_ignores_vector_side() {
        let fused = fuse(
            &hits(&[("a", 1.0)]),
            &hits(&[("b", 0.5)]),
            FusionWeights::keyword_only(),
        );
        let ranked = rank(fused, 10);
        assert_eq!(ranked[0].chunk_id, "b");
        assert_eq!(ranked[1].combined, 0.0);
    }

    #[test]
    fn ties_break_by_chunk_id() {
        let weights = FusionWeights::new(0.5, 0.5).unwrap();
        let fused = fuse(&hits(&[("z", 0.5), ("m", 0.5)]), &[], weights);
        let ranked = rank(fused, 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].chunk_id, "m");
    }
}
