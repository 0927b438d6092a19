//! Index statistics and health overview.
//!
//! A quick summary of what the active generation holds: file and chunk
//! counts, embedding coverage, keyword vocabulary, and the all-time count
//! of query results dropped by the workspace filter. Used by
//! `codescope stats` and returned inside every build report.

use std::path::Path;

use serde::Serialize;

/// Counts describing one committed generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Active generation, `0` before the first commit.
    pub generation: u64,
    pub file_count: usize,
    pub indexed_file_count: usize,
    pub excluded_file_count: usize,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub keyword_term_count: usize,
    pub security_violations: u64,
    pub provider: String,
    pub dims: usize,
}

impl IndexStats {
    /// Percentage of chunks that carry a vector.
    pub fn embedded_percent(&self) -> usize {
        if self.chunk_count == 0 {
            0
        } else {
            self.vector_count * 100 / self.chunk_count
        }
    }
}

/// Print a human-readable summary to stdout.
pub fn print_stats(stats: &IndexStats, root: &Path, store: Option<&Path>) {
    println!("codescope index stats");
    println!("=======================");
    println!();
    println!("  Root:        {}", root.display());
    if let Some(path) = store {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        println!("  Store:       {}", path.display());
        println!("  Size:        {}", format_bytes(size));
    }
    println!("  Generation:  {}", stats.generation);
    println!("  Provider:    {} ({} dims)", stats.provider, stats.dims);
    println!();
    println!(
        "  Files:       {} ({} indexed, {} excluded)",
        stats.file_count, stats.indexed_file_count, stats.excluded_file_count
    );
    println!("  Chunks:      {}", stats.chunk_count);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.vector_count,
        stats.chunk_count,
        stats.embedded_percent()
    );
    println!("  Terms:       {}", stats.keyword_term_count);
    println!("  Violations:  {}", stats.security_violations);
    println!();
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
