//! Hybrid (vector + keyword) query execution.
//!
//! # Algorithm
//!
//! 1. Validate the fusion weights.
//! 2. Tokenize the query and, concurrently, embed it and search the vector
//!    index under the query timeout.
//! 3. Over-fetch `max(3k, 20)` candidates from each index.
//! 4. Fuse scores. If the vector side is unavailable (disabled provider,
//!    embedding error, timeout) fall back to keyword-only weights and flag
//!    the response as degraded.
//! 5. Drop every candidate whose path does not resolve inside the
//!    workspace root; the count is added to the persisted violation
//!    counter.
//! 6. Rank by combined score (desc), chunk id (asc), and keep `k`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use codescope_core::chunk::snap_to_char_boundary;
use codescope_core::models::SearchResult;
use codescope_core::search::{candidate_pool_size, fuse, rank, FusionWeights};
use codescope_core::tokenize::tokenize;

use crate::config::RetrievalConfig;
use crate::error::{EngineError, Result};
use crate::index_store::{Generation, IndexStore};

/// Per-query parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOptions {
    pub k: usize,
    pub vector_weight: f64,
    pub keyword_weight: f64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for QueryOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k: config.k,
            vector_weight: config.vector_weight,
            keyword_weight: config.keyword_weight,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub results: Vec<SearchResult>,
    /// True when the vector side was unavailable and ranking used keyword
    /// scores only.
    pub degraded: bool,
    /// Generation the query read.
    pub generation: u64,
    /// Candidates removed by the workspace filter.
    pub dropped: usize,
}

pub struct HybridQueryEngine {
    index: Arc<IndexStore>,
}

impl HybridQueryEngine {
    pub fn new(index: Arc<IndexStore>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<IndexStore> {
        &self.index
    }

    pub async fn query(&self, text: &str, options: &QueryOptions) -> Result<QueryResponse> {
        let weights = FusionWeights::new(options.vector_weight, options.keyword_weight)?;
        let generation = self
            .index
            .snapshot()
            .ok_or_else(|| EngineError::IndexNotFound(self.index.root().path().to_path_buf()))?;

        let pool = candidate_pool_size(options.k);
        let tokens = tokenize(text);
        let keyword_side = async { generation.keywords().search(&tokens, pool) };
        let vector_side = self.vector_candidates(&generation, text, pool);
        let (keyword_hits, vector_hits) = tokio::join!(keyword_side, vector_side);

        let degraded = vector_hits.is_none();
        let weights = if degraded {
            FusionWeights::keyword_only()
        } else {
            weights
        };
        let vector_hits = vector_hits.unwrap_or_default();
        let candidates = fuse(&vector_hits, &keyword_hits, weights);

        let root = self.index.root();
        let mut dropped = 0usize;
        let mut contained = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(chunk) = generation.chunk(&candidate.chunk_id) else {
                continue;
            };
            match root.resolve(&chunk.path) {
                Ok(_) => contained.push(candidate),
                Err(e) => {
                    tracing::warn!(
                        chunk = %candidate.chunk_id,
                        error = %e,
                        "dropping result outside workspace"
                    );
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            if let Err(e) = self.index.record_violations(dropped as u64).await {
                tracing::warn!(error = %e, "failed to record security violations");
            }
        }

        let snippet_chars = self.index.config().retrieval.snippet_chars;
        let results = rank(contained, options.k)
            .into_iter()
            .filter_map(|candidate| {
                let chunk = generation.chunk(&candidate.chunk_id)?;
                let end = snap_to_char_boundary(&chunk.text, snippet_chars);
                Some(SearchResult {
                    chunk_id: candidate.chunk_id,
                    path: chunk.path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    kind: chunk.kind,
                    snippet: chunk.text[..end].to_string(),
                    vector_score: candidate.vector_score,
                    keyword_score: candidate.keyword_score,
                    combined_score: candidate.combined,
                })
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            query = text,
            results = results.len(),
            degraded,
            dropped,
            generation = generation.number(),
            "query complete"
        );
        Ok(QueryResponse {
            results,
            degraded,
            generation: generation.number(),
            dropped,
        })
    }

    /// Vector hits, or `None` when the vector side is unavailable.
    async fn vector_candidates(
        &self,
        generation: &Generation,
        text: &str,
        pool: usize,
    ) -> Option<Vec<(String, f64)>> {
        let client = self.index.client();
        if !client.is_enabled() || self.index.is_read_only() {
            return None;
        }
        let timeout = Duration::from_millis(self.index.config().retrieval.query_timeout_ms);
        let embedded = match tokio::time::timeout(timeout, client.embed_query(text)).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "query embedding failed; keyword-only");
                return None;
            }
            Err(_) => {
                tracing::warn!(?timeout, "query embedding timed out; keyword-only");
                return None;
            }
        };
        match generation.vectors().search(&embedded, pool) {
            Ok(hits) => Some(hits),
            Err(e) => {
                tracing::warn!(error = %e, "vector search failed; keyword-only");
                None
            }
        }
    }
}
