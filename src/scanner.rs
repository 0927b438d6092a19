//! Repository scanning: walk the workspace, apply the deny-list, ignore
//! rules and extension allow-list, and assign relevance tiers.
//!
//! # Tiers
//!
//! | Condition | Tier |
//! |-----------|------|
//! | empty file | EXCLUDE (`"empty"`) |
//! | unreadable | EXCLUDE (OS error) |
//! | NUL byte in the first 8 KiB | EXCLUDE (`"binary"`) |
//! | larger than `max_file_bytes` | LOW, or MEDIUM for build manifests |
//! | source extension | HIGH |
//! | config / doc extension | MEDIUM |
//!
//! An optional [`RelevanceClassifier`] may override the tier of readable,
//! non-empty files whose heuristic tier is not HIGH.
//!
//! Symlinks are never followed during the walk. A symlinked file inside
//! the workspace is indexed under the link's path; links resolving outside
//! the root are rejected and counted; links to directories are skipped.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use codescope_core::models::{FileRecord, PartialIndexWarning, Relevance};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScannerConfig;
use crate::ignore_rules::IgnoreRules;
use crate::languages::{classify_path, is_important_manifest, FileCategory};
use crate::workspace::WorkspaceRoot;

/// Bytes inspected for the binary check.
pub const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Directories never descended into.
pub const DENY_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".jj",
    "node_modules",
    "bower_components",
    "vendor",
    "third_party",
    "target",
    "build",
    "dist",
    "out",
    ".next",
    ".nuxt",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".cache",
    ".gradle",
    ".idea",
    ".vscode",
    ".codescope",
];

/// A file offered to a [`RelevanceClassifier`].
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub path: String,
    pub absolute: PathBuf,
    pub language: Option<String>,
    pub size: u64,
    pub category: FileCategory,
    /// The tier the built-in heuristic assigned.
    pub heuristic: Relevance,
}

/// Pluggable relevance classification for ambiguous files.
///
/// Returning `None` keeps the heuristic tier.
pub trait RelevanceClassifier: Send + Sync {
    fn classify(&self, candidate: &FileCandidate) -> Option<Relevance>;
}

/// Inputs of one scan.
#[derive(Clone, Default)]
pub struct ScanOptions {
    pub config: ScannerConfig,
    pub ignore_file: Option<PathBuf>,
    pub classifier: Option<Arc<dyn RelevanceClassifier>>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Sorted by path.
    pub records: Vec<FileRecord>,
    pub warnings: Vec<PartialIndexWarning>,
    /// Symlinks whose target resolved outside the root.
    pub rejected_symlinks: u64,
}

fn is_denied(name: &str, extra: &[String]) -> bool {
    DENY_DIRS.contains(&name) || extra.iter().any(|d| d == name)
}

fn mtime_nanos(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Read up to [`BINARY_SNIFF_BYTES`] and report whether a NUL was seen.
fn sniff_binary(path: &Path) -> std::io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; BINARY_SNIFF_BYTES];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(buf[..filled].contains(&0))
}

/// Walk `root` and classify every allow-listed file.
///
/// Never fails: per-entry problems become warnings or EXCLUDE records.
pub fn scan(root: &WorkspaceRoot, options: &ScanOptions) -> ScanReport {
    let config = &options.config;
    let ignore = IgnoreRules::load(
        root.path(),
        options.ignore_file.as_deref(),
        &config.extra_ignore_globs,
    );

    let mut report = ScanReport::default();
    for w in ignore.warnings() {
        report.warnings.push(PartialIndexWarning {
            path: ".gitignore".to_string(),
            reason: w.clone(),
        });
    }

    let keep = |entry: &DirEntry| -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let Some(rel) = root.relativize(entry.path()) else {
            return false;
        };
        let is_dir = entry.file_type().is_dir();
        if is_dir && is_denied(&entry.file_name().to_string_lossy(), &config.extra_deny_dirs) {
            return false;
        }
        !ignore.is_ignored(&rel, is_dir)
    };

    let walker = WalkDir::new(root.path())
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(keep);

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e
                    .path()
                    .and_then(|p| root.relativize(p))
                    .unwrap_or_default();
                tracing::warn!(path = %path, error = %e, "walk error");
                report.warnings.push(PartialIndexWarning {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        let Some(rel) = root.relativize(entry.path()) else {
            continue;
        };

        if file_type.is_symlink() {
            match entry.path().canonicalize() {
                Ok(target) if !root.contains(&target) => {
                    tracing::warn!(
                        path = %rel,
                        target = %target.display(),
                        "rejecting symlink outside workspace"
                    );
                    report.rejected_symlinks += 1;
                    continue;
                }
                Ok(target) if target.is_dir() => {
                    tracing::debug!(path = %rel, "not descending symlinked directory");
                    continue;
                }
                Ok(_) if config.follow_symlinks => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "skipping dangling symlink");
                    report.warnings.push(PartialIndexWarning {
                        path: rel,
                        reason: format!("dangling symlink: {}", e),
                    });
                    continue;
                }
            }
        }

        let classifier = options.classifier.as_deref();
        if let Some(record) = classify_entry(entry.path(), rel, config, classifier) {
            report.records.push(record);
        }
    }

    report.records.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::info!(
        files = report.records.len(),
        rejected_symlinks = report.rejected_symlinks,
        warnings = report.warnings.len(),
        "scan complete"
    );
    report
}

fn classify_entry(
    absolute: &Path,
    rel: String,
    config: &ScannerConfig,
    classifier: Option<&dyn RelevanceClassifier>,
) -> Option<FileRecord> {
    let (category, tag) = classify_path(Path::new(&rel))?;
    let language = Some(tag.to_string());

    let exclude = |size: u64, mtime: i64, reason: String| FileRecord {
        path: rel.clone(),
        language: language.clone(),
        size,
        mtime,
        relevance: Relevance::Exclude,
        reason: Some(reason),
    };

    let meta = match std::fs::metadata(absolute) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(path = %rel, error = %e, "cannot stat file");
            return Some(exclude(0, 0, e.to_string()));
        }
    };
    let size = meta.len();
    let mtime = mtime_nanos(&meta);

    if size == 0 {
        return Some(exclude(size, mtime, "empty".to_string()));
    }
    match sniff_binary(absolute) {
        Ok(true) => return Some(exclude(size, mtime, "binary".to_string())),
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(path = %rel, error = %e, "cannot read file");
            return Some(exclude(size, mtime, e.to_string()));
        }
    }

    let heuristic = if size > config.max_file_bytes {
        if is_important_manifest(absolute) {
            Relevance::Medium
        } else {
            Relevance::Low
        }
    } else {
        match category {
            FileCategory::Source => Relevance::High,
            FileCategory::Config | FileCategory::Doc => Relevance::Medium,
        }
    };

    let relevance = match (heuristic, classifier) {
        (Relevance::High, _) | (_, None) => heuristic,
        (_, Some(c)) => {
            let candidate = FileCandidate {
                path: rel.clone(),
                absolute: absolute.to_path_buf(),
                language: language.clone(),
                size,
                category,
                heuristic,
            };
            c.classify(&candidate).unwrap_or(heuristic)
        }
    };

    Some(FileRecord {
        path: rel,
        language,
        size,
        mtime,
        relevance,
        reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn paths(report: &ScanReport) -> Vec<&str> {
        report.records.iter().map(|r| r.path.as_str()).collect()
    }

    fn tier(report: &ScanReport, path: &str) -> Relevance {
        report
            .records
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.relevance)
            .unwrap()
    }

    #[test]
    fn deny_list_and_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", b"fn main() {}");
        write(dir.path(), "vendor/lib/dep.rs", b"fn dep() {}");
        write(dir.path(), "node_modules/x/index.js", b"1");
        write(dir.path(), ".git/config", b"[core]");
        write(dir.path(), "logo.png", b"not really");
        write(dir.path(), "README.md", b"# hi");
        let root = WorkspaceRoot::new(dir.path()).unwrap();

        let report = scan(&root, &ScanOptions::default());
        assert_eq!(paths(&report), vec!["README.md", "src/main.rs"]);
        assert_eq!(tier(&report, "src/main.rs"), Relevance::High);
        assert_eq!(tier(&report, "README.md"), Relevance::Medium);
    }

    #[test]
    fn excluded_files_carry_reason() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "empty.py", b"");
        write(dir.path(), "blob.rs", b"fn x() {}\0\0\0");
        let root = WorkspaceRoot::new(dir.path()).unwrap();

        let report = scan(&root, &ScanOptions::default());
        let empty = &report.records[1];
        assert_eq!(empty.path, "empty.py");
        assert_eq!(empty.relevance, Relevance::Exclude);
        assert_eq!(empty.reason.as_deref(), Some("empty"));
        assert_eq!(report.records[0].reason.as_deref(), Some("binary"));
    }

    #[test]
    fn large_files_drop_to_low_unless_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let big = vec![b'a'; 2048];
        write(dir.path(), "big.rs", &big);
        write(dir.path(), "package.json", &big);
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        let options = ScanOptions {
            config: ScannerConfig {
                max_file_bytes: 1024,
                ..ScannerConfig::default()
            },
            ..ScanOptions::default()
        };

        let report = scan(&root, &options);
        assert_eq!(tier(&report, "big.rs"), Relevance::Low);
        assert_eq!(tier(&report, "package.json"), Relevance::Medium);
    }

    #[test]
    fn gitignore_and_extra_rules_apply() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", b"generated/\n*.tmp.rs\n[bad\n");
        write(dir.path(), "generated/out.rs", b"fn g() {}");
        write(dir.path(), "a.tmp.rs", b"fn t() {}");
        write(dir.path(), "keep.rs", b"fn k() {}");
        write(dir.path(), "fixtures/f.rs", b"fn f() {}");
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        let options = ScanOptions {
            config: ScannerConfig {
                extra_deny_dirs: vec!["fixtures".into()],
                ..ScannerConfig::default()
            },
            ..ScanOptions::default()
        };

        let report = scan(&root, &options);
        assert_eq!(paths(&report), vec!["keep.rs"]);
        assert_eq!(report.warnings.len(), 1);
    }

    struct Promote;

    impl RelevanceClassifier for Promote {
        fn classify(&self, candidate: &FileCandidate) -> Option<Relevance> {
            candidate.path.ends_with(".toml").then_some(Relevance::High)
        }
    }

    #[test]
    fn classifier_overrides_ambiguous_tiers_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Cargo.toml", b"[package]");
        write(dir.path(), "notes.md", b"notes");
        write(dir.path(), "empty.toml", b"");
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        let options = ScanOptions {
            classifier: Some(Arc::new(Promote)),
            ..ScanOptions::default()
        };

        let report = scan(&root, &options);
        assert_eq!(tier(&report, "Cargo.toml"), Relevance::High);
        assert_eq!(tier(&report, "notes.md"), Relevance::Medium);
        assert_eq!(tier(&report, "empty.toml"), Relevance::Exclude);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_outside_root_are_rejected() {
        let outside = tempfile::tempdir().unwrap();
        write(outside.path(), "secret.rs", b"fn secret() {}");
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "real.rs", b"fn real() {}");
        std::os::unix::fs::symlink(outside.path().join("secret.rs"), dir.path().join("leak.rs"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("leakdir")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.rs"), dir.path().join("alias.rs"))
            .unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();

        let report = scan(&root, &ScanOptions::default());
        assert_eq!(paths(&report), vec!["alias.rs", "real.rs"]);
        assert_eq!(report.rejected_symlinks, 2);
    }
}
