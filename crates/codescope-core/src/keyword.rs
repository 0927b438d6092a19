//! Inverted TF-IDF index over chunk tokens.
//!
//! Scoring for a query with distinct terms `q`:
//!
//! ```text
//! raw(chunk) = Σ_{t ∈ q, tf(t, chunk) > 0} tf(t, chunk) · ln(N / df(t))
//! score      = raw / max(raw over matching chunks)
//! ```
//!
//! When that maximum is zero (every query term occurs in every chunk) all
//! matching chunks score `1.0`. Chunks that match no query term are never
//! returned.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::Chunk;

/// One `(term, chunk, tf)` row, the persisted form of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub term: String,
    pub chunk_id: String,
    pub tf: u32,
}

#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    /// term → chunk id → term frequency.
    postings: BTreeMap<String, BTreeMap<String, u32>>,
    /// chunk id → distinct terms, for deletion.
    chunk_terms: BTreeMap<String, Vec<String>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `chunk.tokens` under `chunk.id`, replacing any previous entry.
    pub fn upsert(&mut self, chunk: &Chunk) {
        self.upsert_tokens(&chunk.id, &chunk.tokens);
    }

    pub fn upsert_tokens(&mut self, chunk_id: &str, tokens: &[String]) {
        self.delete(chunk_id);
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token.as_str()).or_default() += 1;
        }
        self.register(chunk_id);
        for (term, tf) in counts {
            self.insert_posting(term, chunk_id, tf);
        }
    }

    /// Count `chunk_id` towards `N` even if it has no postings.
    pub fn register(&mut self, chunk_id: &str) {
        self.chunk_terms.entry(chunk_id.to_string()).or_default();
    }

    /// Add a single posting (used when reloading a persisted generation).
    pub fn insert_posting(&mut self, term: &str, chunk_id: &str, tf: u32) {
        if tf == 0 {
            return;
        }
        let terms = self.chunk_terms.entry(chunk_id.to_string()).or_default();
        let previous = self
            .postings
            .entry(term.to_string())
            .or_default()
            .insert(chunk_id.to_string(), tf);
        if previous.is_none() {
            terms.push(term.to_string());
        }
    }

    /// Remove every posting of `chunk_id`. Returns whether it was indexed.
    pub fn delete(&mut self, chunk_id: &str) -> bool {
        let Some(terms) = self.chunk_terms.remove(chunk_id) else {
            return false;
        };
        for term in terms {
            if let Some(docs) = self.postings.get_mut(&term) {
                docs.remove(chunk_id);
                if docs.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        true
    }

    /// Total number of indexed chunks (`N`).
    pub fn chunk_count(&self) -> usize {
        self.chunk_terms.len()
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, BTreeMap::len)
    }

    pub fn term_frequency(&self, term: &str, chunk_id: &str) -> u32 {
        self.postings
            .get(term)
            .and_then(|docs| docs.get(chunk_id))
            .copied()
            .unwrap_or(0)
    }

    /// `(term, df)` for every term, in term order.
    pub fn term_stats(&self) -> Vec<(String, usize)> {
        self.postings
            .iter()
            .map(|(term, docs)| (term.clone(), docs.len()))
            .collect()
    }

    /// Every posting, ordered by term then chunk id.
    pub fn postings(&self) -> impl Iterator<Item = Posting> + '_ {
        self.postings.iter().flat_map(|(term, docs)| {
            docs.iter().map(move |(chunk_id, &tf)| Posting {
                term: term.clone(),
                chunk_id: chunk_id.clone(),
                tf,
            })
        })
    }

    /// Ids of all indexed chunks.
    pub fn chunk_ids(&self) -> impl Iterator<Item = &str> {
        self.chunk_terms.keys().map(String::as_str)
    }

    /// Top `k` chunks for `tokens`, normalized to `[0, 1]`, descending,
    /// ties broken by chunk id ascending.
    pub fn search(&self, tokens: &[String], k: usize) -> Vec<(String, f64)> {
        let n = self.chunk_count() as f64;
        if n == 0.0 || k == 0 {
            return Vec::new();
        }
        let terms: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();

        let mut raw: BTreeMap<&str, f64> = BTreeMap::new();
        for term in terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let idf = (n / docs.len() as f64).ln();
            for (chunk_id, &tf) in docs {
                *raw.entry(chunk_id.as_str()).or_default() += tf as f64 * idf;
            }
        }

        let max = raw.values().copied().fold(0.0f64, f64::max);
        let mut hits: Vec<(String, f64)> = raw
            .into_iter()
            .map(|(id, score)| {
                let normalized = if max > 0.0 { score / max } else { 1.0 };
                (id.to_string(), normalized)
            })
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::tokenize;

    fn index(docs: &[(&str, &str)]) -> KeywordIndex {
        let mut idx = KeywordIndex::new();
        for (id, text) in docs {
            idx.upsert_tokens(id, &tokenize(text));
        }
        idx
    }

    #[test]
    fn rarer_terms_score_higher() {
        let idx = index(&[
            ("a", "retry backoff retry"),
            ("b", "retry config"),
            ("c", "unrelated words here"),
        ]);
        let hits = idx.search(&tokenize("retry backoff"), 10);
        assert_eq!(hits[0].0, "a");
        assert!((hits[0].1 - 1.0).abs() < 1e-9);
        assert_eq!(hits.len(), 2);
        assert!(hits[1].1 < hits[0].1);
    }

    #[test]
    fn zero_matches_are_excluded() {
        let idx = index(&[("a", "alpha"), ("b", "beta")]);
        assert!(idx.search(&tokenize("gamma"), 10).is_empty());
    }

    #[test]
    fn ubiquitous_term_scores_one() {
        let idx = index(&[("b", "shared"), ("a", "shared")]);
        let hits = idx.search(&tokenize("shared"), 10);
        assert_eq!(
            hits,
            vec![("a".to_string(), 1.0), ("b".to_string(), 1.0)]
        );
    }

    #[test]
    fn duplicate_query_terms_count_once() {
        let idx = index(&[("a", "parse"), ("b", "lex"), ("c", "emit")]);
        let once = idx.search(&tokenize("parse"), 10);
        let twice = idx.search(&tokenize("parse parse"), 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn delete_removes_postings_and_count() {
        let mut idx = index(&[("a", "alpha beta"), ("b", "beta")]);
        assert_eq!(idx.document_frequency("beta"), 2);
        assert!(idx.delete("a"));
        assert_eq!(idx.chunk_count(), 1);
        assert_eq!(idx.document_frequency("beta"), 1);
        assert_eq!(idx.document_frequency("alpha"), 0);
        assert_eq!(idx.term_count(), 1);
    }

    #[test]
    fn upsert_replaces_previous_tokens() {
        let mut idx = index(&[("a", "alpha")]);
        idx.upsert_tokens("a", &tokenize("beta beta"));
        assert_eq!(idx.document_frequency("alpha"), 0);
        assert_eq!(idx.term_frequency("beta", "a"), 2);
    }

    #[test]
    fn postings_rebuild_identical_index() {
        let idx = index(&[("a", "alpha beta beta"), ("b", "gamma"), ("c", "")]);
        let mut rebuilt = KeywordIndex::new();
        for id in idx.chunk_ids() {
            rebuilt.register(id);
        }
        for p in idx.postings() {
            rebuilt.insert_posting(&p.term, &p.chunk_id, p.tf);
        }
        assert_eq!(rebuilt.chunk_count(), 3);
        assert_eq!(rebuilt.term_stats(), idx.term_stats());
        assert_eq!(
            rebuilt.search(&tokenize("beta"), 5),
            idx.search(&tokenize("beta"), 5)
        );
    }
}
