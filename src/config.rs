//! TOML configuration.
//!
//! Every section has serde defaults, so an empty file (or no file at all,
//! via [`Config::default`]) yields a working configuration:
//!
//! ```toml
//! [store]
//! dir = ".codescope"
//!
//! [scanner]
//! max_file_bytes = 512000
//! extra_deny_dirs = ["fixtures"]
//! extra_ignore_globs = ["*.snap"]
//!
//! [chunking]
//! window_lines = 60
//! overlap_lines = 10
//!
//! [retrieval]
//! k = 10
//! vector_weight = 0.6
//! keyword_weight = 0.4
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding one SQLite file per workspace root.
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".codescope")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Files larger than this drop to the LOW tier.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Directory names pruned in addition to the built-in deny-list.
    #[serde(default)]
    pub extra_deny_dirs: Vec<String>,
    /// gitignore-style patterns applied after `.gitignore`.
    #[serde(default)]
    pub extra_ignore_globs: Vec<String>,
    /// Index in-workspace symlinked files (links are still contained).
    #[serde(default = "default_true")]
    pub follow_symlinks: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            extra_deny_dirs: Vec::new(),
            extra_ignore_globs: Vec::new(),
            follow_symlinks: true,
        }
    }
}

fn default_max_file_bytes() -> u64 {
    500 * 1024
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    /// Uncovered top-level regions need this many non-whitespace chars to
    /// become a block chunk.
    #[serde(default = "default_min_block_chars")]
    pub min_block_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_lines: default_window_lines(),
            overlap_lines: default_overlap_lines(),
            min_block_chars: default_min_block_chars(),
        }
    }
}

fn default_window_lines() -> usize {
    60
}
fn default_overlap_lines() -> usize {
    10
}
fn default_min_block_chars() -> usize {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    /// Overall budget for the vector side of a query.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Snippets are cut to this many bytes (on a char boundary).
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            query_timeout_ms: default_query_timeout_ms(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_k() -> usize {
    10
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_keyword_weight() -> f64 {
    0.4
}
fn default_query_timeout_ms() -> u64 {
    10_000
}
fn default_snippet_chars() -> usize {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `hash`, `openai`, `ollama` or `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Embedding batches in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_batch_tokens: default_max_batch_tokens(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_batch_tokens() -> usize {
    8192
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    250
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}

/// Dimension used by the `hash` provider when `dims` is unset.
pub const DEFAULT_HASH_DIMS: usize = 256;

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Providers that call a model and therefore need `model` and `dims`.
    pub fn is_model_backed(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama" | "local")
    }
}

impl Config {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.window_lines == 0 {
            bail!("chunking.window_lines must be > 0");
        }
        if self.chunking.overlap_lines >= self.chunking.window_lines {
            bail!("chunking.overlap_lines must be < chunking.window_lines");
        }

        let r = &self.retrieval;
        if r.k < 1 {
            bail!("retrieval.k must be >= 1");
        }
        for (name, w) in [
            ("vector_weight", r.vector_weight),
            ("keyword_weight", r.keyword_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                bail!("retrieval.{} must be in [0.0, 1.0]", name);
            }
        }
        let sum = r.vector_weight + r.keyword_weight;
        if (sum - 1.0).abs() > codescope_core::search::WEIGHT_TOLERANCE {
            bail!("retrieval.vector_weight + retrieval.keyword_weight must equal 1.0");
        }
        if r.query_timeout_ms == 0 {
            bail!("retrieval.query_timeout_ms must be > 0");
        }

        let e = &self.embedding;
        match e.provider.as_str() {
            "disabled" | "hash" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
                other
            ),
        }
        if e.is_model_backed() {
            if e.dims.is_none() || e.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
            if e.model.is_none() {
                bail!("embedding.model must be specified when provider is '{}'", e.provider);
            }
        }
        if e.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if e.batch_size == 0 || e.max_batch_tokens == 0 {
            bail!("embedding.batch_size and embedding.max_batch_tokens must be > 0");
        }
        if e.max_attempts == 0 {
            bail!("embedding.max_attempts must be >= 1");
        }
        if e.concurrency == 0 {
            bail!("embedding.concurrency must be >= 1");
        }
        Ok(())
    }
}

/// Read, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.window_lines, 60);
        assert_eq!(config.retrieval.k, 10);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.scanner.max_file_bytes, 512_000);
    }

    #[test]
    fn rejects_bad_weights() {
        let config: Config = toml::from_str(
            "[retrieval]\nvector_weight = 0.5\nkeyword_weight = 0.6\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn remote_provider_needs_model_and_dims() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"openai\"\n").unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("dims"));

        let config: Config = toml::from_str(
            "[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n",
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn hash_provider_needs_nothing() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"hash\"\n").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_provider_and_overlap() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config =
            toml::from_str("[chunking]\nwindow_lines = 10\noverlap_lines = 10\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codescope.toml");
        std::fs::write(&path, "[store]\ndir = \"/tmp/idx\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.store.dir, PathBuf::from("/tmp/idx"));
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
