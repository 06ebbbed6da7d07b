//! Cheap change detection from file metadata.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A (path, last-write-time) pair.
///
/// Two tokens for the same path are equal iff their timestamps match. A
/// missing file has a zero timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FreshnessToken {
    path: PathBuf,
    modified: u128,
}

impl FreshnessToken {
    /// Reads the current last-write-time of `path`.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let modified = modified_nanos(&path);
        Self { path, modified }
    }

    /// A token with no path; always reported as latest.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last-write-time in nanoseconds since the Unix epoch, zero if absent.
    pub fn modified(&self) -> u128 {
        self.modified
    }

    pub fn exists(&self) -> bool {
        self.modified != 0
    }

    /// True if the file has not changed since this token was taken.
    pub fn is_latest(&self) -> bool {
        if self.path.as_os_str().is_empty() {
            return true;
        }
        *self == Self::create(self.path.clone())
    }
}

fn modified_nanos(path: &Path) -> u128 {
    if path.as_os_str().is_empty() {
        return 0;
    }
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|value| value.duration_since(UNIX_EPOCH).ok())
        .map(|value| value.as_nanos())
        .unwrap_or(0)
}
