//! Core data models shared by the scanner, extractor, indexes and query
//! engine.
//!
//! - [`FileRecord`]: one scanned file with its relevance tier.
//! - [`Chunk`]: a contiguous, position-addressed span of a file.
//! - [`SearchResult`]: one ranked hit handed to consumers.
//!
//! Paths in every model are workspace-relative and `/`-separated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Relevance tier assigned to a scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    High,
    Medium,
    Low,
    Exclude,
}

impl Relevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relevance::High => "high",
            Relevance::Medium => "medium",
            Relevance::Low => "low",
            Relevance::Exclude => "exclude",
        }
    }

    /// Whether files in this tier are chunked and indexed.
    pub fn is_indexed(&self) -> bool {
        !matches!(self, Relevance::Exclude)
    }
}

impl fmt::Display for Relevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relevance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Relevance::High),
            "medium" => Ok(Relevance::Medium),
            "low" => Ok(Relevance::Low),
            "exclude" => Ok(Relevance::Exclude),
            other => Err(format!("unknown relevance tier: {}", other)),
        }
    }
}

/// A file discovered by the scanner.
///
/// Records are superseded, never mutated: a rescan that sees a different
/// `(mtime, size)` produces a fresh record for the same path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Workspace-relative path with `/` separators.
    pub path: String,
    /// Language tag (e.g. `"rust"`, `"markdown"`), if known.
    pub language: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub relevance: Relevance,
    /// Why the file was excluded (`"empty"`, `"binary"`, an OS error).
    pub reason: Option<String>,
}

impl FileRecord {
    /// True when both records describe the same on-disk revision.
    pub fn same_revision(&self, other: &FileRecord) -> bool {
        self.path == other.path && self.mtime == other.mtime && self.size == other.size
    }
}

/// Syntactic kind of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Class,
    Block,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Block => "block",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(ChunkKind::Function),
            "class" => Ok(ChunkKind::Class),
            "block" => Ok(ChunkKind::Block),
            other => Err(format!("unknown chunk kind: {}", other)),
        }
    }
}

/// A contiguous span of a source file, the unit of retrieval.
///
/// `id` is derived from the path and byte offsets only, so an unchanged
/// file always yields the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub path: String,
    /// First line, 1-based inclusive.
    pub start_line: usize,
    /// Last line, 1-based inclusive.
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub kind: ChunkKind,
    pub text: String,
    /// Keyword tokens derived from `text`.
    pub tokens: Vec<String>,
    /// SHA-256 hex digest of `text`.
    pub content_hash: String,
}

/// A ranked hit returned by a query.
///
/// Scores are computed per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    /// Workspace-relative path.
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    pub snippet: String,
    /// Similarity in `[0, 1]`, or `None` when the chunk was not a vector hit.
    pub vector_score: Option<f64>,
    /// Normalized TF-IDF in `[0, 1]`, or `None` when not a keyword hit.
    pub keyword_score: Option<f64>,
    pub combined_score: f64,
}

/// A file that was skipped or indexed in a degraded way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialIndexWarning {
    /// Workspace-relative path, or the ignore file the warning concerns.
    pub path: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_roundtrips_through_str() {
        for tier in [
            Relevance::High,
            Relevance::Medium,
            Relevance::Low,
            Relevance::Exclude,
        ] {
            assert_eq!(tier.as_str().parse::<Relevance>().unwrap(), tier);
        }
        assert!("urgent".parse::<Relevance>().is_err());
    }

    #[test]
    fn only_exclude_is_not_indexed() {
        assert!(Relevance::Low.is_indexed());
        assert!(!Relevance::Exclude.is_indexed());
    }

    #[test]
    fn same_revision_compares_mtime_and_size() {
        let a = FileRecord {
            path: "src/lib.rs".into(),
            language: Some("rust".into()),
            size: 10,
            mtime: 1,
            relevance: Relevance::High,
            reason: None,
        };
        let mut b = a.clone();
        assert!(a.same_revision(&b));
        b.mtime = 2;
        assert!(!a.same_revision(&b));
    }

    #[test]
    fn chunk_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ChunkKind::Function).unwrap();
        assert_eq!(json, "\"function\"");
    }
}
