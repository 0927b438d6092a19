//! Generational index: build, incremental update, atomic cutover.
//!
//! An [`IndexStore`] owns the in-memory [`Generation`] that queries read
//! and the [`SnapshotStore`] that persists it. Writers (`rebuild`,
//! `incremental_update`) hold a single writer lock, assemble a complete
//! new generation off to the side, stage it, commit it, and only then swap
//! the `Arc` that readers see. Cancellation or failure before the commit
//! discards the staged generation and leaves the previous one
//! authoritative.
//!
//! # Pipeline
//!
//! ```text
//! scan (blocking) → diff by (path, mtime, size) → extract (blocking, per file)
//!     → embed (async batches) → assemble → stage → commit → swap
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use codescope_core::embedding::EmbeddingProvider;
use codescope_core::keyword::KeywordIndex;
use codescope_core::models::{Chunk, FileRecord, PartialIndexWarning, Relevance};
use codescope_core::store::{Snapshot, SnapshotStore};
use codescope_core::vector::{VectorEntry, VectorIndex};
use codescope_core::IndexError;

use crate::chunker;
use crate::config::{ChunkingConfig, Config};
use crate::embed_client::EmbeddingClient;
use crate::embedding::create_provider;
use crate::error::{EngineError, Result};
use crate::scanner::{self, RelevanceClassifier, ScanOptions, ScanReport};
use crate::sqlite_store::SqliteStore;
use crate::stats::IndexStats;
use crate::workspace::WorkspaceRoot;

/// How [`IndexStore::open`] treats the persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// A committed generation must exist and match the configured
    /// provider. A disabled provider opens a mismatched store read-only.
    Existing,
    /// About to rebuild: no generation required, provider may change.
    Rebuild,
}

/// One immutable, fully assembled index generation.
#[derive(Debug, Clone)]
pub struct Generation {
    number: u64,
    files: BTreeMap<String, FileRecord>,
    chunks: BTreeMap<String, Chunk>,
    file_chunks: BTreeMap<String, Vec<String>>,
    vectors: VectorIndex,
    keywords: KeywordIndex,
}

impl Generation {
    pub fn empty(provider: &str, dims: usize) -> Self {
        Self {
            number: 0,
            files: BTreeMap::new(),
            chunks: BTreeMap::new(),
            file_chunks: BTreeMap::new(),
            vectors: VectorIndex::new(provider, dims),
            keywords: KeywordIndex::new(),
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> std::result::Result<Self, IndexError> {
        let mut generation = Self::empty(&snapshot.provider, snapshot.dims);
        generation.number = snapshot.generation;
        for file in snapshot.files {
            generation.files.insert(file.path.clone(), file);
        }
        for chunk in snapshot.chunks {
            generation
                .file_chunks
                .entry(chunk.path.clone())
                .or_default()
                .push(chunk.id.clone());
            generation.keywords.register(&chunk.id);
            generation.chunks.insert(chunk.id.clone(), chunk);
        }
        for ids in generation.file_chunks.values_mut() {
            let chunks = &generation.chunks;
            ids.sort_by_key(|id| chunks.get(id).map_or(0, |c| c.start_byte));
        }
        for posting in snapshot.postings {
            generation
                .keywords
                .insert_posting(&posting.term, &posting.chunk_id, posting.tf);
        }
        for entry in snapshot.vectors {
            generation.vectors.upsert(entry)?;
        }
        Ok(generation)
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            generation: self.number,
            provider: self.vectors.provider().to_string(),
            dims: self.vectors.dims(),
            files: self.files.values().cloned().collect(),
            chunks: self.chunks.values().cloned().collect(),
            vectors: self.vectors.entries().collect(),
            postings: self.keywords.postings().collect(),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn provider(&self) -> &str {
        self.vectors.provider()
    }

    pub fn dims(&self) -> usize {
        self.vectors.dims()
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// Chunks of `path` in start-byte order.
    pub fn chunks_for<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.file_chunks
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.chunks.get(id))
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn keywords(&self) -> &KeywordIndex {
        &self.keywords
    }

    pub fn stats(&self, security_violations: u64) -> IndexStats {
        let excluded = self
            .files
            .values()
            .filter(|f| !f.relevance.is_indexed())
            .count();
        IndexStats {
            generation: self.number,
            file_count: self.files.len(),
            indexed_file_count: self.files.len() - excluded,
            excluded_file_count: excluded,
            chunk_count: self.chunks.len(),
            vector_count: self.vectors.len(),
            keyword_term_count: self.keywords.term_count(),
            security_violations,
            provider: self.provider().to_string(),
            dims: self.dims(),
        }
    }

    fn remove_file(&mut self, path: &str) {
        self.files.remove(path);
        for id in self.file_chunks.remove(path).unwrap_or_default() {
            self.chunks.remove(&id);
            self.keywords.delete(&id);
            self.vectors.delete(&id);
        }
    }

    fn insert_file(
        &mut self,
        record: FileRecord,
        chunks: Vec<(Chunk, Option<Vec<f32>>)>,
    ) -> std::result::Result<(), IndexError> {
        let path = record.path.clone();
        self.files.insert(path.clone(), record);
        let mut ids = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks {
            self.keywords.upsert(&chunk);
            if let Some(vector) = vector {
                self.vectors.upsert(VectorEntry {
                    chunk_id: chunk.id.clone(),
                    vector,
                    provider: self.vectors.provider().to_string(),
                })?;
            }
            ids.push(chunk.id.clone());
            self.chunks.insert(chunk.id.clone(), chunk);
        }
        if !ids.is_empty() {
            self.file_chunks.insert(path, ids);
        }
        Ok(())
    }
}

/// Outcome of a rebuild or incremental update.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub stats: IndexStats,
    /// Files chunked during this run.
    pub indexed: usize,
    /// Excluded or unreadable files, parse fallbacks, files left
    /// keyword-only by embedding failures, bad ignore lines.
    pub skipped: Vec<PartialIndexWarning>,
    pub files_scanned: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub chunks_embedded: usize,
    pub chunks_keyword_only: usize,
    pub rejected_symlinks: u64,
    /// False when an update found nothing to do.
    pub generation_changed: bool,
    pub duration_ms: u64,
}

/// Exclusion reason for files that cannot be chunked at their on-disk
/// byte offsets.
const NOT_UTF8: &str = "not valid UTF-8";

/// A file after extraction, before embedding.
struct FileExtraction {
    record: FileRecord,
    chunks: Vec<Chunk>,
    warning: Option<PartialIndexWarning>,
}

/// Text sent to the embedding provider for a chunk.
pub fn embedding_text(chunk: &Chunk) -> String {
    format!("{}\n{}", chunk.path, chunk.text)
}

/// Resolve the configured store directory; relative paths live under the
/// workspace root.
pub fn store_dir(config: &Config, root: &WorkspaceRoot) -> PathBuf {
    if config.store.dir.is_absolute() {
        config.store.dir.clone()
    } else {
        root.path().join(&config.store.dir)
    }
}

pub struct IndexStore {
    root: WorkspaceRoot,
    config: Config,
    store: Arc<dyn SnapshotStore>,
    client: EmbeddingClient,
    classifier: Option<Arc<dyn RelevanceClassifier>>,
    current: RwLock<Option<Arc<Generation>>>,
    writer: Mutex<()>,
    read_only: bool,
    store_file: Option<PathBuf>,
}

impl IndexStore {
    /// Open the SQLite store for `root` with the configured provider.
    pub async fn open(config: &Config, root: WorkspaceRoot, mode: OpenMode) -> Result<Self> {
        let dir = store_dir(config, &root);
        if mode == OpenMode::Existing && !SqliteStore::exists(&dir, &root) {
            return Err(EngineError::IndexNotFound(root.path().to_path_buf()));
        }
        let sqlite = SqliteStore::open(&dir, &root).await?;
        let file = sqlite.path().to_path_buf();
        let provider = create_provider(&config.embedding)?;
        let mut index = Self::open_with(config, root, Arc::new(sqlite), provider, mode).await?;
        index.store_file = Some(file);
        Ok(index)
    }

    /// Open over an explicit store and provider.
    pub async fn open_with(
        config: &Config,
        root: WorkspaceRoot,
        store: Arc<dyn SnapshotStore>,
        provider: Arc<dyn EmbeddingProvider>,
        mode: OpenMode,
    ) -> Result<Self> {
        let meta = store.meta().await?;
        let active = store.load_active().await?;

        let mut read_only = false;
        if let (Some(stored), Some(_), OpenMode::Existing) = (&meta.provider, &active, mode) {
            if stored != provider.provider_tag() || meta.dims != provider.dims() {
                if provider.is_enabled() {
                    return Err(EngineError::ProviderMismatch {
                        stored: stored.clone(),
                        stored_dims: meta.dims,
                        configured: provider.provider_tag().to_string(),
                        configured_dims: provider.dims(),
                    });
                }
                tracing::info!(stored = %stored, "embedding disabled; opening index read-only");
                read_only = true;
            }
        }
        if mode == OpenMode::Existing && active.is_none() {
            return Err(EngineError::IndexNotFound(root.path().to_path_buf()));
        }

        let current = match active {
            Some(snapshot) => Some(Arc::new(Generation::from_snapshot(snapshot)?)),
            None => None,
        };
        let client =
            EmbeddingClient::new(provider, &config.embedding).with_store(Arc::clone(&store));

        Ok(Self {
            root,
            config: config.clone(),
            store,
            client,
            classifier: None,
            current: RwLock::new(current),
            writer: Mutex::new(()),
            read_only,
            store_file: None,
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RelevanceClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn root(&self) -> &WorkspaceRoot {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &EmbeddingClient {
        &self.client
    }

    /// Path of the SQLite file, when backed by one.
    pub fn store_file(&self) -> Option<&Path> {
        self.store_file.as_deref()
    }

    /// True when opened with a disabled provider over a store built with
    /// another one: queries work, writes do not.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The visible generation.
    pub fn snapshot(&self) -> Option<Arc<Generation>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn publish(&self, generation: Generation) -> Arc<Generation> {
        let generation = Arc::new(generation);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&generation));
        generation
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let meta = self.store.meta().await?;
        Ok(match self.snapshot() {
            Some(generation) => generation.stats(meta.security_violations),
            None => IndexStats {
                security_violations: meta.security_violations,
                provider: self.client.provider().provider_tag().to_string(),
                dims: self.client.provider().dims(),
                ..Default::default()
            },
        })
    }

    /// Add `n` dropped query results to the persisted violation counter.
    pub async fn record_violations(&self, n: u64) -> Result<u64> {
        Ok(self.store.add_security_violations(n).await?)
    }

    /// Rescan and re-index everything into a fresh generation.
    pub async fn rebuild(
        &self,
        ignore_file: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<BuildReport> {
        let _writer = self.writer.try_lock().map_err(|_| EngineError::RebuildInProgress)?;
        let started = Instant::now();
        tracing::info!(root = %self.root.path().display(), "rebuilding index");

        let scan = self.scan(ignore_file, cancel).await?;
        let provider = self.client.provider();
        let base = Generation::empty(provider.provider_tag(), provider.dims());
        self.apply(base, scan, true, cancel, started).await
    }

    /// Re-index only files whose `(mtime, size)` changed; drop removed files.
    ///
    /// Nothing is written, and the generation does not advance, when no
    /// file changed.
    pub async fn incremental_update(
        &self,
        ignore_file: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<BuildReport> {
        let _writer = self.writer.try_lock().map_err(|_| EngineError::RebuildInProgress)?;
        let started = Instant::now();
        let base = self
            .snapshot()
            .ok_or_else(|| EngineError::IndexNotFound(self.root.path().to_path_buf()))?;
        let provider = self.client.provider();
        if self.read_only
            || base.provider() != provider.provider_tag()
            || base.dims() != provider.dims()
        {
            return Err(EngineError::ProviderMismatch {
                stored: base.provider().to_string(),
                stored_dims: base.dims(),
                configured: provider.provider_tag().to_string(),
                configured_dims: provider.dims(),
            });
        }

        let scan = self.scan(ignore_file, cancel).await?;
        self.apply((*base).clone(), scan, false, cancel, started).await
    }

    async fn scan(
        &self,
        ignore_file: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let root = self.root.clone();
        let options = ScanOptions {
            config: self.config.scanner.clone(),
            ignore_file: ignore_file.map(Path::to_path_buf),
            classifier: self.classifier.clone(),
        };
        let task = tokio::task::spawn_blocking(move || scanner::scan(&root, &options));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            joined = task => Ok(joined?),
        }
    }

    /// Diff `scan` against `base`, re-extract and re-embed what changed,
    /// then stage, commit and publish the result.
    async fn apply(
        &self,
        mut next: Generation,
        scan: ScanReport,
        full: bool,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<BuildReport> {
        let scanned: BTreeSet<&str> = scan.records.iter().map(|r| r.path.as_str()).collect();
        let removed: Vec<String> = next
            .files
            .keys()
            .filter(|path| !scanned.contains(path.as_str()))
            .cloned()
            .collect();

        let mut changed = Vec::new();
        let mut unchanged = 0;
        for record in &scan.records {
            let same = next.file(&record.path).is_some_and(|old| {
                old.same_revision(record)
                    && (old.relevance == record.relevance
                        || old.reason.as_deref() == Some(NOT_UTF8))
            });
            if same && !full {
                unchanged += 1;
            } else {
                changed.push(record.clone());
            }
        }

        let mut skipped = scan.warnings.clone();
        let mut report = BuildReport {
            stats: IndexStats::default(),
            indexed: 0,
            skipped: Vec::new(),
            files_scanned: scan.records.len(),
            files_unchanged: unchanged,
            files_removed: removed.len(),
            chunks_embedded: 0,
            chunks_keyword_only: 0,
            rejected_symlinks: scan.rejected_symlinks,
            generation_changed: false,
            duration_ms: 0,
        };

        if !full && changed.is_empty() && removed.is_empty() {
            tracing::info!(unchanged, "index up to date");
            report.stats = self.stats().await?;
            report.skipped = skipped;
            report.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(report);
        }

        let extractions = self.extract_all(changed, cancel).await?;
        for fx in &extractions {
            if let Some(warning) = &fx.warning {
                skipped.push(warning.clone());
            } else if let (Relevance::Exclude, Some(reason)) =
                (fx.record.relevance, &fx.record.reason)
            {
                skipped.push(PartialIndexWarning {
                    path: fx.record.path.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let texts: Vec<String> = extractions
            .iter()
            .flat_map(|fx| fx.chunks.iter())
            .map(embedding_text)
            .collect();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            outcome = self.client.embed(&texts) => outcome,
        };
        report.chunks_embedded = outcome.embedded();
        report.chunks_keyword_only = texts.len() - report.chunks_embedded;

        for path in &removed {
            next.remove_file(path);
        }
        let mut vectors = outcome.vectors.into_iter();
        for fx in extractions {
            next.remove_file(&fx.record.path);
            if fx.record.relevance.is_indexed() {
                report.indexed += 1;
            }
            let chunks: Vec<(Chunk, Option<Vec<f32>>)> = fx
                .chunks
                .into_iter()
                .map(|chunk| (chunk, vectors.next().flatten()))
                .collect();
            let missing = chunks.iter().filter(|(_, v)| v.is_none()).count();
            if missing > 0 && self.client.is_enabled() {
                skipped.push(PartialIndexWarning {
                    path: fx.record.path.clone(),
                    reason: format!(
                        "embedding failed for {} of {} chunks; indexed keyword-only",
                        missing,
                        chunks.len()
                    ),
                });
            }
            next.insert_file(fx.record, chunks)?;
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        next.number = self.store.next_generation().await?;
        let number = next.number;
        let snapshot = next.to_snapshot();
        if let Err(e) = self.store.stage(&snapshot).await {
            self.discard(number).await;
            return Err(e.into());
        }
        if cancel.is_cancelled() {
            self.discard(number).await;
            return Err(EngineError::Cancelled);
        }
        if let Err(e) = self
            .store
            .commit(number, &snapshot.provider, snapshot.dims)
            .await
        {
            self.discard(number).await;
            return Err(e.into());
        }

        self.prune_cache(&next).await;

        let meta = self.store.meta().await?;
        let published = self.publish(next);
        report.stats = published.stats(meta.security_violations);
        report.skipped = skipped;
        report.generation_changed = true;
        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            generation = number,
            files = report.stats.file_count,
            chunks = report.stats.chunk_count,
            vectors = report.stats.vector_count,
            indexed = report.indexed,
            removed = report.files_removed,
            duration_ms = report.duration_ms,
            "generation committed"
        );
        Ok(report)
    }

    /// Drop cached vectors the committed generation no longer uses.
    async fn prune_cache(&self, generation: &Generation) {
        if !self.client.is_enabled() {
            return;
        }
        let keep: Vec<String> = generation
            .chunks
            .values()
            .filter(|chunk| generation.vectors.contains(&chunk.id))
            .map(|chunk| self.client.cache_key(&embedding_text(chunk)))
            .collect();
        match self.store.retain_embeddings(&keep).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "pruned embedding cache"),
            Err(e) => tracing::warn!(error = %e, "failed to prune embedding cache"),
        }
    }

    async fn discard(&self, generation: u64) {
        if let Err(e) = self.store.discard(generation).await {
            tracing::warn!(generation, error = %e, "failed to discard staged generation");
        } else {
            tracing::info!(generation, "discarded staged generation");
        }
    }

    /// Chunk each indexed record on the blocking pool, one task per file.
    async fn extract_all(
        &self,
        records: Vec<FileRecord>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileExtraction>> {
        let permits = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut join_set = JoinSet::new();
        let mut slots: Vec<Option<FileExtraction>> = Vec::with_capacity(records.len());

        for (index, record) in records.into_iter().enumerate() {
            if !record.relevance.is_indexed() {
                slots.push(Some(FileExtraction {
                    record,
                    chunks: Vec::new(),
                    warning: None,
                }));
                continue;
            }
            slots.push(None);
            let semaphore = Arc::clone(&semaphore);
            let absolute = self.root.path().join(&record.path);
            let chunking = self.config.chunking.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let extracted =
                    tokio::task::spawn_blocking(move || extract_file(record, &absolute, &chunking))
                        .await;
                (index, extracted)
            });
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(EngineError::Cancelled);
                }
                next = join_set.join_next() => match next {
                    None => break,
                    Some(joined) => {
                        let (index, extracted) = joined?;
                        slots[index] = Some(extracted?);
                    }
                },
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

fn extract_file(record: FileRecord, absolute: &Path, config: &ChunkingConfig) -> FileExtraction {
    match std::fs::read(absolute) {
        Ok(bytes) => {
            // Chunk offsets are byte offsets into the file on disk, which a
            // lossy decode would shift.
            let source = match String::from_utf8(bytes) {
                Ok(source) => source,
                Err(_) => {
                    tracing::warn!(path = %record.path, "not valid UTF-8; excluded");
                    return excluded(record, NOT_UTF8.to_string());
                }
            };
            let extraction = chunker::extract(&record, &source, config);
            let warning = extraction.warning.map(|reason| PartialIndexWarning {
                path: record.path.clone(),
                reason,
            });
            FileExtraction {
                record,
                chunks: extraction.chunks,
                warning,
            }
        }
        Err(e) => {
            tracing::warn!(path = %record.path, error = %e, "file vanished or became unreadable");
            excluded(record, e.to_string())
        }
    }
}

fn excluded(mut record: FileRecord, reason: String) -> FileExtraction {
    record.relevance = Relevance::Exclude;
    record.reason = Some(reason.clone());
    let warning = Some(PartialIndexWarning {
        path: record.path.clone(),
        reason,
    });
    FileExtraction {
        record,
        chunks: Vec::new(),
        warning,
    }
}
