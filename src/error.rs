//! Engine-level error type.
//!
//! Fatal conditions surface as typed variants so callers can match on them;
//! everything recoverable (unreadable files, parse failures, embedding
//! outages) is logged and degraded instead of returned.

use std::path::PathBuf;

use codescope_core::IndexError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The workspace root does not exist or is not a directory.
    #[error("invalid workspace root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    /// No committed index exists for this root.
    #[error("no index found for {0}; run `codescope index` first")]
    IndexNotFound(PathBuf),

    /// The store was built with a different embedding provider.
    #[error("index was built with provider '{stored}' ({stored_dims} dims) but '{configured}' ({configured_dims} dims) is configured; rebuild the index")]
    ProviderMismatch {
        stored: String,
        stored_dims: usize,
        configured: String,
        configured_dims: usize,
    },

    /// A path resolved outside the workspace root.
    #[error("path escapes the workspace: {0}")]
    OutsideWorkspace(String),

    /// Another rebuild or update holds the writer lock.
    #[error("a rebuild or update is already in progress")]
    RebuildInProgress,

    /// The operation was cancelled; the previous generation is intact.
    #[error("operation cancelled")]
    Cancelled,

    /// tree-sitter could not produce a usable syntax tree.
    #[error("parse failed: {0}")]
    Parse(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
