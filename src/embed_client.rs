//! Batching, retrying, caching front end over an [`EmbeddingProvider`].
//!
//! [`EmbeddingClient::embed`] never fails as a whole. Texts are split into
//! batches of at most `batch_size` texts and `max_batch_tokens` estimated
//! tokens (4 chars ≈ 1 token); batches run concurrently, bounded by
//! `concurrency`. Each batch gets up to `max_attempts` tries with
//! exponential backoff on transient errors and a per-attempt timeout. A
//! batch that still fails yields `None` for its texts, so those chunks are
//! indexed keyword-only.
//!
//! Vectors are cached in the [`SnapshotStore`] under
//! `sha256(provider tag, text)`, so re-indexing unchanged text costs
//! nothing.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use codescope_core::embedding::{EmbedError, EmbeddingProvider};
use codescope_core::store::SnapshotStore;

use crate::config::EmbeddingConfig;

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
    timeout: Duration,
}

/// Result of one [`EmbeddingClient::embed`] call.
#[derive(Debug, Clone, Default)]
pub struct EmbedOutcome {
    /// One entry per input text, `None` where embedding failed.
    pub vectors: Vec<Option<Vec<f32>>>,
    /// Texts embedded by the provider during this call.
    pub fresh: usize,
    pub cache_hits: usize,
    pub failed_batches: usize,
}

impl EmbedOutcome {
    pub fn embedded(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }
}

pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    store: Option<Arc<dyn SnapshotStore>>,
    batch_size: usize,
    max_batch_tokens: usize,
    concurrency: usize,
    policy: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            store: None,
            batch_size: config.batch_size.max(1),
            max_batch_tokens: config.max_batch_tokens.max(1),
            concurrency: config.concurrency.max(1),
            policy: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                backoff: Duration::from_millis(config.backoff_ms),
                timeout: Duration::from_secs(config.timeout_secs),
            },
        }
    }

    /// Persist and reuse vectors through `store`'s embedding cache.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_enabled()
    }

    /// Cache key for `text` under this client's provider.
    pub fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.provider_tag().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Embed `texts`, one output slot per input.
    pub async fn embed(&self, texts: &[String]) -> EmbedOutcome {
        let mut outcome = EmbedOutcome {
            vectors: vec![None; texts.len()],
            ..Default::default()
        };
        if texts.is_empty() || !self.is_enabled() {
            return outcome;
        }

        let keys: Vec<String> = texts.iter().map(|t| self.cache_key(t)).collect();
        if let Some(store) = &self.store {
            match store.cached_embeddings(&keys).await {
                Ok(cached) => {
                    for (slot, key) in outcome.vectors.iter_mut().zip(&keys) {
                        if let Some(v) = cached.get(key) {
                            if v.len() == self.provider.dims() {
                                *slot = Some(v.clone());
                                outcome.cache_hits += 1;
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "embedding cache lookup failed"),
            }
        }

        let missing: Vec<usize> = (0..texts.len())
            .filter(|&i| outcome.vectors[i].is_none())
            .collect();
        if missing.is_empty() {
            return outcome;
        }
        let pending: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
        let batches = plan_batches(&pending, self.batch_size, self.max_batch_tokens);
        tracing::debug!(
            texts = pending.len(),
            batches = batches.len(),
            cached = outcome.cache_hits,
            "embedding"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        for (batch_index, range) in batches.iter().cloned().enumerate() {
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let batch = pending[range].to_vec();
            let policy = self.policy;
            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => embed_with_retry(provider.as_ref(), &batch, policy).await,
                    Err(_) => Err(EmbedError::Permanent("embedding pool closed".into())),
                };
                (batch_index, result)
            });
        }

        let mut fresh: Vec<(String, Vec<f32>)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (batch_index, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding task failed");
                    outcome.failed_batches += 1;
                    continue;
                }
            };
            let range = batches[batch_index].clone();
            match result {
                Ok(vectors) => {
                    for (offset, vector) in range.zip(vectors) {
                        let original = missing[offset];
                        fresh.push((keys[original].clone(), vector.clone()));
                        outcome.vectors[original] = Some(vector);
                        outcome.fresh += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        batch = batch_index,
                        texts = range.len(),
                        error = %e,
                        "embedding batch failed; chunks stay keyword-only"
                    );
                    outcome.failed_batches += 1;
                }
            }
        }

        if let Some(store) = &self.store {
            if !fresh.is_empty() {
                if let Err(e) = store
                    .cache_embeddings(self.provider.provider_tag(), &fresh)
                    .await
                {
                    tracing::warn!(error = %e, "failed to persist embedding cache");
                }
            }
        }
        outcome
    }

    /// Embed a single query text (uncached).
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if !self.is_enabled() {
            return Err(EmbedError::Permanent("embedding provider is disabled".into()));
        }
        let texts = [text.to_string()];
        embed_with_retry(self.provider.as_ref(), &texts, self.policy)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Permanent("empty embedding response".into()))
    }
}

/// Estimated token count of `text`, at least 1.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Split `texts` into consecutive ranges of at most `batch_size` texts and
/// `max_tokens` estimated tokens. A single oversize text gets its own batch.
pub fn plan_batches(texts: &[String], batch_size: usize, max_tokens: usize) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut tokens = 0;
    for (i, text) in texts.iter().enumerate() {
        let cost = estimate_tokens(text);
        let full = i - start >= batch_size || (i > start && tokens + cost > max_tokens);
        if full {
            batches.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens += cost;
    }
    if start < texts.len() {
        batches.push(start..texts.len());
    }
    batches
}

/// One batch with timeout, retry and output validation.
async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    policy: RetryPolicy,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.timeout, provider.embed_batch(texts)).await {
            Ok(result) => result,
            Err(_) => Err(EmbedError::Transient(format!(
                "timed out after {:?}",
                policy.timeout
            ))),
        };
        match result.and_then(|vectors| validate(provider, texts.len(), vectors)) {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff * 2u32.saturating_pow(attempt - 1);
                tracing::debug!(attempt, ?delay, error = %e, "retrying embedding batch");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn validate(
    provider: &dyn EmbeddingProvider,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::Permanent(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dims()) {
        return Err(EmbedError::Permanent(format!(
            "provider returned a {}-dim vector, expected {}",
            bad.len(),
            provider.dims()
        )));
    }
    Ok(vectors)
}
