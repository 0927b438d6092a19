//! The workspace root and path containment.
//!
//! Every path the engine accepts or emits is checked here: after symlink
//! and `..` resolution it must be a descendant of the canonical root.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// Absolute, canonical workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    path: PathBuf,
}

impl WorkspaceRoot {
    /// Canonicalize `path`; it must exist and be a directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = path.as_ref();
        let canonical = raw.canonicalize().map_err(|e| EngineError::InvalidRoot {
            path: raw.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !canonical.is_dir() {
            return Err(EngineError::InvalidRoot {
                path: raw.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self { path: canonical })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First 16 hex chars of `sha256(canonical root)`; names the store file.
    pub fn store_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }

    /// True when the canonical `path` lies under the root.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }

    /// Resolve a workspace-relative path to an absolute one, rejecting
    /// anything that escapes the root.
    ///
    /// Absolute paths and `..` components are rejected outright. Existing
    /// paths are canonicalized (following symlinks); a path that no longer
    /// exists is checked through its nearest existing ancestor, and a
    /// dangling symlink is rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, EngineError> {
        let outside = || EngineError::OutsideWorkspace(relative.to_string());
        let rel = Path::new(relative);
        if relative.is_empty() || rel.is_absolute() {
            return Err(outside());
        }
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(outside());
        }

        let joined = self.path.join(rel);
        match joined.canonicalize() {
            Ok(canonical) if self.contains(&canonical) => Ok(canonical),
            Ok(_) => Err(outside()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if joined.symlink_metadata().is_ok() {
                    return Err(outside());
                }
                let mut ancestor = joined.parent();
                while let Some(dir) = ancestor {
                    if let Ok(canonical) = dir.canonicalize() {
                        return if self.contains(&canonical) {
                            Ok(joined)
                        } else {
                            Err(outside())
                        };
                    }
                    ancestor = dir.parent();
                }
                Err(outside())
            }
            Err(_) => Err(outside()),
        }
    }

    /// `/`-separated path of `absolute` relative to the root, if inside.
    pub fn relativize(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.path).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<_>>()?;
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }
}
