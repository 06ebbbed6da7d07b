//! Locating the backing resources of collection items.

use std::path::Path;

/// Progress of a resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveProgress {
    pub done: usize,
    pub total: usize,
}

/// How an item's backing resource is found.
///
/// Implementations are called outside the collection lock and may block.
pub trait PathResolver: Send + Sync {
    /// True if the resource at `path` is present.
    fn exists(&self, path: &str) -> bool;

    /// Looks for a replacement for a missing `path`, e.g. a renamed file.
    fn locate(&self, path: &str) -> Option<String>;
}

/// Checks item paths against the local filesystem. Never finds replacements.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResolver;

impl PathResolver for FsResolver {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn locate(&self, _path: &str) -> Option<String> {
        None
    }
}

/// Result of resolving one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Present,
    Relocated(String),
    Missing,
}

pub(crate) fn resolve_one(resolver: &dyn PathResolver, path: &str) -> Resolution {
    if resolver.exists(path) {
        return Resolution::Present;
    }
    match resolver.locate(path) {
        Some(found) if found != path => Resolution::Relocated(found),
        _ => Resolution::Missing,
    }
}
