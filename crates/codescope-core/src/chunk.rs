//! Line-window chunking and chunk construction.
//!
//! Every [`Chunk`] in the system is built here, whether its span came from
//! a syntax tree or from the line-window fallback. Chunk ids are UUIDv5
//! over `"{path}:{start_byte}-{end_byte}"`, so identical content at the
//! same path always yields identical ids.
//!
//! # Line windows
//!
//! With the default 60-line window and 10-line overlap the stride is 50:
//! windows start at lines 1, 51, 101, … and the last window is clipped to
//! the final line. Windowing stops as soon as a window reaches the end, so
//! a 200-line file yields `1–60, 51–110, 101–160, 151–200`.
//!
//! ```rust
//! use codescope_core::chunk::{line_windows, WindowConfig};
//!
//! let text: String = (1..=200).map(|i| format!("line {}\n", i)).collect();
//! let chunks = line_windows("notes.txt", &text, &WindowConfig::default());
//! let spans: Vec<_> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
//! assert_eq!(spans, vec![(1, 60), (51, 110), (101, 160), (151, 200)]);
//! ```

use std::ops::Range;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, ChunkKind};
use crate::tokenize::tokenize;

/// Namespace for chunk ids.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_9b4d_5e07_8c1a_2f3b_4d5e_6f70);

/// Line-window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub window_lines: usize,
    pub overlap_lines: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_lines: 60,
            overlap_lines: 10,
        }
    }
}

impl WindowConfig {
    /// Lines between consecutive window starts (at least 1).
    pub fn stride(&self) -> usize {
        self.window_lines.saturating_sub(self.overlap_lines).max(1)
    }
}

/// Byte offsets of line starts, for mapping bytes to 1-based lines.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' && i + 1 < source.len() {
                starts.push(i + 1);
            }
        }
        Self {
            starts,
            len: source.len(),
        }
    }

    /// Number of lines (0 for empty input).
    pub fn line_count(&self) -> usize {
        if self.len == 0 {
            0
        } else {
            self.starts.len()
        }
    }

    /// 1-based line containing `byte`.
    pub fn line_of(&self, byte: usize) -> usize {
        self.starts.partition_point(|&s| s <= byte).max(1)
    }

    /// Byte offset where `line` (1-based) starts.
    pub fn line_start(&self, line: usize) -> usize {
        self.starts
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or(self.len)
    }

    /// Exclusive byte offset where `line` (1-based) ends, including its
    /// newline.
    pub fn line_end(&self, line: usize) -> usize {
        self.starts.get(line).copied().unwrap_or(self.len)
    }
}

/// Deterministic chunk id for a byte span of `path`.
pub fn chunk_id(path: &str, start_byte: usize, end_byte: usize) -> String {
    let name = format!("{}:{}-{}", path, start_byte, end_byte);
    Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes()).to_string()
}

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build a [`Chunk`] for `source[range]`.
///
/// `range` must lie on char boundaries.
pub fn build_chunk(
    path: &str,
    source: &str,
    range: Range<usize>,
    kind: ChunkKind,
    lines: &LineIndex,
) -> Chunk {
    let text = &source[range.clone()];
    let last_byte = range.end.saturating_sub(1).max(range.start);
    Chunk {
        id: chunk_id(path, range.start, range.end),
        path: path.to_string(),
        start_line: lines.line_of(range.start),
        end_line: lines.line_of(last_byte),
        start_byte: range.start,
        end_byte: range.end,
        kind,
        text: text.to_string(),
        tokens: tokenize(text),
        content_hash: content_hash(text),
    }
}

/// Split `source[range]` into overlapping line windows of `kind`.
///
/// Windows are clipped to `range`; whitespace-only windows are skipped.
pub fn windows_over(
    path: &str,
    source: &str,
    range: Range<usize>,
    kind: ChunkKind,
    config: &WindowConfig,
    lines: &LineIndex,
) -> Vec<Chunk> {
    if range.start >= range.end {
        return Vec::new();
    }
    let first_line = lines.line_of(range.start);
    let last_line = lines.line_of(range.end - 1);
    let window = config.window_lines.max(1);
    let stride = config.stride();

    let mut chunks = Vec::new();
    let mut start_line = first_line;
    loop {
        let end_line = (start_line + window - 1).min(last_line);
        let start = lines.line_start(start_line).max(range.start);
        let end = trim_newline(source, lines.line_end(end_line).min(range.end), start);
        if !source[start..end].trim().is_empty() {
            chunks.push(build_chunk(path, source, start..end, kind, lines));
        }
        if end_line >= last_line {
            break;
        }
        start_line += stride;
    }
    chunks
}

/// Line-window chunking over a whole file.
///
/// Empty or whitespace-only input yields no chunks.
pub fn line_windows(path: &str, source: &str, config: &WindowConfig) -> Vec<Chunk> {
    if source.trim().is_empty() {
        return Vec::new();
    }
    let lines = LineIndex::new(source);
    windows_over(
        path,
        source,
        0..source.len(),
        ChunkKind::Block,
        config,
        &lines,
    )
}

/// Drop one trailing `\n` (and a preceding `\r`) from `source[floor..end]`.
fn trim_newline(source: &str, end: usize, floor: usize) -> usize {
    let mut end = end;
    if end > floor && source.as_bytes()[end - 1] == b'\n' {
        end -= 1;
        if end > floor && source.as_bytes()[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
pub fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
