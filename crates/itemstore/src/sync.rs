//! Boundary between a collection and its host.
//!
//! The host drives `Collection::notify_changed_on_disk` when a watcher
//! reports a change, listens to `CollectionEvent`s for UI refresh, and may
//! install a `SyncBridge` to rebroadcast saves to sibling processes. The
//! transport between processes is the host's business.

use std::path::Path;

use crate::freshness::FreshnessToken;

/// Notifications published by a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    /// The in-memory sequence changed.
    Changed,
    /// The collection was written to disk.
    Saved(FreshnessToken),
    /// A save failed; the collection is now read-only.
    SaveFailed(String),
    /// The in-memory sequence was replaced from disk.
    Reloaded,
}

/// Receives successful saves so the host can tell other instances.
pub trait SyncBridge: Send + Sync {
    fn on_saved(&self, path: &Path, token: &FreshnessToken);
}

impl<F> SyncBridge for F
where
    F: Fn(&Path, &FreshnessToken) + Send + Sync,
{
    fn on_saved(&self, path: &Path, token: &FreshnessToken) {
        self(path, token)
    }
}
