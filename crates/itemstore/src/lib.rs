//! Persisted ordered collections of path-addressed items.
//!
//! This crate provides:
//! - An ordered sequence with a path index that never drifts from it
//! - Grouped reordering, undoable removal and unlinked-item resolution
//! - Crash-safe atomic saves with `.bak` fallback and debounced writes
//! - Freshness tokens and a file watcher for reloading external edits

pub mod cancel;
pub mod collection;
pub mod config;
pub mod debounce;
pub mod error;
pub mod freshness;
pub mod storage;
pub mod sync;
pub mod watcher;

// Re-export main types
pub use cancel::CancellationToken;
pub use collection::{
    Collection, CollectionStatus, FsResolver, Item, ItemFlags, ItemId, Memento, MoveDirection,
    PathResolver, ResolveProgress,
};
pub use config::CollectionOptions;
pub use debounce::Debouncer;
pub use error::{Result, StoreError};
pub use freshness::FreshnessToken;
pub use sync::{CollectionEvent, SyncBridge};
pub use watcher::{ChangeWatcher, WatchEvent};
