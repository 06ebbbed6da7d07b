use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error on {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    #[error("Unsupported format in {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("Collection is read-only: {0}")]
    ReadOnly(PathBuf),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Wraps an IO error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serialization(path: &Path, message: impl ToString) -> Self {
        Self::Serialization {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn format(path: &Path, message: impl ToString) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Returns true if the error means the file simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Appends `suffix` to the file name of `path` (`list.json` -> `list.json.bak`).
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
