//! One-shot entry points: open the store for a root, run one operation.
//!
//! These are what the CLI calls. Long-lived consumers that issue many
//! queries should open an [`IndexStore`] once and share it through a
//! [`HybridQueryEngine`].

use std::path::Path;
use std::sync::Arc;

use codescope_core::search::FusionWeights;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::index_store::{BuildReport, IndexStore, OpenMode};
use crate::query::{HybridQueryEngine, QueryOptions, QueryResponse};
use crate::stats::IndexStats;
use crate::workspace::WorkspaceRoot;

/// Full re-index of `root` into a new generation.
///
/// Errors: `InvalidRoot`, `RebuildInProgress`, `Cancelled`.
pub async fn rebuild(
    config: &Config,
    root: &Path,
    ignore_file: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<BuildReport> {
    let root = WorkspaceRoot::new(root)?;
    let index = IndexStore::open(config, root, OpenMode::Rebuild).await?;
    index.rebuild(ignore_file, cancel).await
}

/// Re-index only what changed since the active generation.
///
/// Errors: `InvalidRoot`, `IndexNotFound`, `ProviderMismatch`,
/// `RebuildInProgress`, `Cancelled`.
pub async fn incremental_update(
    config: &Config,
    root: &Path,
    ignore_file: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<BuildReport> {
    let root = WorkspaceRoot::new(root)?;
    let index = IndexStore::open(config, root, OpenMode::Existing).await?;
    index.incremental_update(ignore_file, cancel).await
}

/// Answer one query against the active generation of `root`.
///
/// Errors: `InvalidRoot`, `InvalidWeights`, `IndexNotFound`,
/// `ProviderMismatch`.
pub async fn query(
    config: &Config,
    root: &Path,
    text: &str,
    options: &QueryOptions,
) -> Result<QueryResponse> {
    FusionWeights::new(options.vector_weight, options.keyword_weight)?;
    let root = WorkspaceRoot::new(root)?;
    let index = IndexStore::open(config, root, OpenMode::Existing).await?;
    HybridQueryEngine::new(Arc::new(index))
        .query(text, options)
        .await
}

/// Statistics of the active generation of `root`.
pub async fn stats(config: &Config, root: &Path) -> Result<IndexStats> {
    let root = WorkspaceRoot::new(root)?;
    let index = IndexStore::open(config, root, OpenMode::Existing).await?;
    index.stats().await
}
