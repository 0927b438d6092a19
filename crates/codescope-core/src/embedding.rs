//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that every embedding backend
//! implements, the [`EmbedError`] split between retryable and permanent
//! failures, and pure helpers for vector serialization and similarity.
//!
//! Concrete providers (hash, OpenAI, Ollama, fastembed) and the batching /
//! retry client live in the `codescope` crate.

use async_trait::async_trait;

/// Failure of a single embedding call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbedError {
    /// Timeout, HTTP 429/5xx, or a network error. Worth retrying.
    #[error("transient embedding error: {0}")]
    Transient(String),
    /// Anything else (bad request, malformed response, wrong dimension).
    #[error("embedding error: {0}")]
    Permanent(String),
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

/// An embedding backend with a fixed `(provider tag, dims)` identity.
///
/// `embed_batch` makes exactly one attempt; retries, timeouts and batching
/// are the caller's job.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identity of the model, e.g. `"openai/text-embedding-3-small"`.
    fn provider_tag(&self) -> &str;

    /// Vector dimensionality (`0` for a disabled provider).
    fn dims(&self) -> usize;

    /// `false` for the disabled provider: queries degrade to keyword-only.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Embed `texts`, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use codescope_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}

/// Map cosine similarity onto `[0, 1]`: `(cos + 1) / 2`.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f64 {
    ((cosine_similarity(a, b) as f64 + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Scale `v` to unit length in place (no-op for the zero vector).
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
