use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use codescope::config::Config;
use codescope::core::embedding::{EmbedError, EmbeddingProvider};
use codescope::core::store::memory::InMemoryStore;
use codescope::index_store::{IndexStore, OpenMode};
use codescope::query::{HybridQueryEngine, QueryOptions};
use codescope::workspace::WorkspaceRoot;
use codescope::EngineError;

/// Every call fails with a retryable error.
struct AlwaysFailing {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for AlwaysFailing {
    fn provider_tag(&self) -> &str {
        "always-failing"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EmbedError::Transient("503 Service Unavailable".into()))
    }
}

/// Two-dimensional vectors: texts mentioning "alpha" point along x,
/// everything else along y.
struct Fixed;

fn fixed_vector(text: &str) -> Vec<f32> {
    if text.contains("alpha") {
        vec![1.0, 0.0]
    } else {
        vec![0.0, 1.0]
    }
}

#[async_trait]
impl EmbeddingProvider for Fixed {
    fn provider_tag(&self) -> &str {
        "fixed"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| fixed_vector(t)).collect())
    }
}

/// Answers chunk batches at once but stalls on query text. Chunk texts
/// always carry a `path\n` prefix; queries never do.
struct SlowQueries;

#[async_trait]
impl EmbeddingProvider for SlowQueries {
    fn provider_tag(&self) -> &str {
        "slow-queries"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.iter().any(|t| !t.contains('\n')) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

/// Blocks inside `embed_batch` until the test releases it.
struct Gate {
    entered: Notify,
    release: Semaphore,
}

#[async_trait]
impl EmbeddingProvider for Gate {
    fn provider_tag(&self) -> &str {
        "gate"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.entered.notify_one();
        let _permit = self
            .release
            .acquire()
            .await
            .map_err(|_| EmbedError::Permanent("closed".into()))?;
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

fn repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("alpha.md"),
        "# Alpha\n\nThe alpha module handles retries and backoff.\n",
    )
    .unwrap();
    fs::write(
        tmp.path().join("beta.md"),
        "# Beta\n\nThe beta module handles retries and caching.\n",
    )
    .unwrap();
    tmp
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.backoff_ms = 1;
    config
}

async fn open(tmp: &TempDir, provider: Arc<dyn EmbeddingProvider>) -> IndexStore {
    IndexStore::open_with(
        &test_config(),
        WorkspaceRoot::new(tmp.path()).unwrap(),
        Arc::new(InMemoryStore::new()),
        provider,
        OpenMode::Rebuild,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn failing_provider_degrades_to_keyword_only() {
    let tmp = repo();
    let provider = Arc::new(AlwaysFailing {
        calls: AtomicUsize::new(0),
    });
    let index = open(&tmp, provider.clone()).await;

    let report = index.rebuild(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.chunks_embedded, 0);
    assert_eq!(report.chunks_keyword_only, report.stats.chunk_count);
    assert_eq!(report.stats.vector_count, 0);
    // One batch, three attempts.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    for path in ["alpha.md", "beta.md"] {
        let warning = report
            .skipped
            .iter()
            .find(|w| w.path == path)
            .unwrap_or_else(|| panic!("no warning for {}", path));
        assert!(warning.reason.contains("keyword-only"), "{}", warning.reason);
    }

    let engine = HybridQueryEngine::new(Arc::new(index));
    let response = engine
        .query("retries caching", &QueryOptions::default())
        .await
        .unwrap();
    assert!(response.degraded);
    assert!(!response.results.is_empty());
    for result in &response.results {
        assert!(result.keyword_score.is_some());
        assert!(result.vector_score.is_none());
        assert_eq!(result.combined_score, result.keyword_score.unwrap());
    }
    assert_eq!(response.results[0].path, "beta.md");
}

#[tokio::test]
async fn vector_side_finds_chunks_without_keyword_overlap() {
    let tmp = repo();
    let index = open(&tmp, Arc::new(Fixed)).await;
    index.rebuild(None, &CancellationToken::new()).await.unwrap();
    let engine = HybridQueryEngine::new(Arc::new(index));

    // beta.md has no keyword overlap with the query but still surfaces
    // through its vector score.
    let response = engine
        .query("alpha", &QueryOptions::default())
        .await
        .unwrap();
    assert!(!response.degraded);
    let top = &response.results[0];
    assert_eq!(top.path, "alpha.md");
    assert_eq!(top.vector_score, Some(1.0));
    // cos = 0 maps to 0.5 for the orthogonal chunk.
    let other = response.results.iter().find(|r| r.path == "beta.md").unwrap();
    assert_eq!(other.vector_score, Some(0.5));
    assert_eq!(other.keyword_score, None);
    assert!((other.combined_score - 0.6 * 0.5).abs() < 1e-9);

    let vector_only = QueryOptions {
        k: 10,
        vector_weight: 1.0,
        keyword_weight: 0.0,
    };
    let response = engine.query("beta", &vector_only).await.unwrap();
    assert_eq!(response.results[0].path, "beta.md");
    assert_eq!(response.results[0].combined_score, 1.0);
}

#[tokio::test]
async fn query_timeout_falls_back_to_keyword_only() {
    let tmp = repo();
    let mut config = test_config();
    config.retrieval.query_timeout_ms = 50;
    let index = IndexStore::open_with(
        &config,
        WorkspaceRoot::new(tmp.path()).unwrap(),
        Arc::new(InMemoryStore::new()),
        Arc::new(SlowQueries),
        OpenMode::Rebuild,
    )
    .await
    .unwrap();
    let report = index.rebuild(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.stats.vector_count, report.stats.chunk_count);

    let engine = HybridQueryEngine::new(Arc::new(index));
    let started = std::time::Instant::now();
    let response = engine
        .query("caching", &QueryOptions::default())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(response.degraded);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].path, "beta.md");
    assert_eq!(response.results[0].keyword_score, Some(1.0));
    assert_eq!(response.results[0].vector_score, None);
}

#[tokio::test]
async fn second_writer_gets_rebuild_in_progress() {
    let tmp = repo();
    let gate = Arc::new(Gate {
        entered: Notify::new(),
        release: Semaphore::new(0),
    });
    let index = Arc::new(open(&tmp, gate.clone()).await);

    let first = {
        let index = Arc::clone(&index);
        tokio::spawn(async move { index.rebuild(None, &CancellationToken::new()).await })
    };
    gate.entered.notified().await;

    let err = index
        .rebuild(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RebuildInProgress));
    let err = index
        .incremental_update(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RebuildInProgress));

    gate.release.add_permits(16);
    let report = first.await.unwrap().unwrap();
    assert!(report.generation_changed);
    assert_eq!(index.snapshot().unwrap().number(), report.stats.generation);
}

#[tokio::test]
async fn cancel_during_embedding_keeps_previous_generation() {
    let tmp = repo();
    let gate = Arc::new(Gate {
        entered: Notify::new(),
        release: Semaphore::new(1),
    });
    let index = Arc::new(open(&tmp, gate.clone()).await);
    let built = index.rebuild(None, &CancellationToken::new()).await.unwrap();
    // Consume the first build's notification and its permit so the next
    // embedding call blocks.
    gate.entered.notified().await;
    gate.release.acquire().await.unwrap().forget();

    fs::write(tmp.path().join("gamma.md"), "# Gamma\n\nNew content.\n").unwrap();
    let cancel = CancellationToken::new();
    let task = {
        let index = Arc::clone(&index);
        let cancel = cancel.clone();
        tokio::spawn(async move { index.rebuild(None, &cancel).await })
    };
    gate.entered.notified().await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    let current = index.snapshot().unwrap();
    assert_eq!(current.number(), built.stats.generation);
    assert!(current.file("gamma.md").is_none());
    assert_eq!(index.stats().await.unwrap(), built.stats);
}
