//! Persistence abstraction for index generations.
//!
//! An index is persisted as a sequence of immutable [`Snapshot`]s, each
//! under a monotonically increasing generation number. A writer stages a
//! complete snapshot, then commits it; until the commit the previously
//! active generation stays authoritative. Discarding a staged generation
//! (on cancellation or error) leaves no trace.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

pub use crate::keyword::Posting;
use crate::models::{Chunk, FileRecord};
use crate::vector::VectorEntry;

/// Everything needed to reconstruct an index generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub generation: u64,
    pub provider: String,
    pub dims: usize,
    pub files: Vec<FileRecord>,
    pub chunks: Vec<Chunk>,
    pub vectors: Vec<VectorEntry>,
    pub postings: Vec<Posting>,
}

/// Store-level metadata (the `meta` table).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreMeta {
    /// Canonical workspace root the store was created for.
    pub root: Option<String>,
    /// Provider tag of the active generation.
    pub provider: Option<String>,
    pub dims: usize,
    pub active_generation: Option<u64>,
    /// Query results dropped by the workspace filter, all-time.
    pub security_violations: u64,
}

/// Abstract storage backend for index generations and the embedding cache.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`meta`](SnapshotStore::meta) | Read store metadata |
/// | [`load_active`](SnapshotStore::load_active) | Load the committed generation |
/// | [`next_generation`](SnapshotStore::next_generation) | Allocate a generation number |
/// | [`stage`](SnapshotStore::stage) | Write an uncommitted generation |
/// | [`commit`](SnapshotStore::commit) | Atomically make a staged generation active |
/// | [`discard`](SnapshotStore::discard) | Drop a staged generation |
/// | [`cached_embeddings`](SnapshotStore::cached_embeddings) | Look up cached vectors |
/// | [`cache_embeddings`](SnapshotStore::cache_embeddings) | Persist new vectors |
/// | [`retain_embeddings`](SnapshotStore::retain_embeddings) | Drop cache entries no generation uses |
/// | [`add_security_violations`](SnapshotStore::add_security_violations) | Bump the violation counter |
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn meta(&self) -> Result<StoreMeta>;

    /// The committed generation, if any.
    async fn load_active(&self) -> Result<Option<Snapshot>>;

    /// A generation number greater than any committed or staged one.
    async fn next_generation(&self) -> Result<u64>;

    /// Write `snapshot` without making it visible.
    async fn stage(&self, snapshot: &Snapshot) -> Result<()>;

    /// Make a staged generation active under `(provider, dims)` and drop
    /// older ones.
    async fn commit(&self, generation: u64, provider: &str, dims: usize) -> Result<()>;

    /// Remove a staged, uncommitted generation.
    async fn discard(&self, generation: u64) -> Result<()>;

    /// Cached vectors for the given cache keys; missing keys are omitted.
    async fn cached_embeddings(&self, keys: &[String]) -> Result<HashMap<String, Vec<f32>>>;

    async fn cache_embeddings(&self, provider: &str, entries: &[(String, Vec<f32>)]) -> Result<()>;

    /// Keep only the cache entries under `keep`; returns how many were
    /// removed.
    async fn retain_embeddings(&self, keep: &[String]) -> Result<u64>;

    /// Add `n` violations and return the new total.
    async fn add_security_violations(&self, n: u64) -> Result<u64>;
}
