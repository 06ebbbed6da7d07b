//! Collection options.
//!
//! Hosts usually embed these in their own settings file, so every field has a
//! serde default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default quiescence before a requested save is written.
pub const DEFAULT_SAVE_DELAY_MS: u64 = 500;

/// Default quiescence before an on-disk change is reloaded.
pub const DEFAULT_RELOAD_DELAY_MS: u64 = 250;

/// Options controlling persistence of a single collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    /// Debounce window for `delay_save`.
    pub save_delay_ms: u64,
    /// Debounce window for reloads triggered by the file watcher.
    pub reload_delay_ms: u64,
    /// Keep the previous file as `<path>.bak` when replacing it.
    pub make_backup: bool,
    /// Open the collection read-only; every mutator is rejected.
    pub read_only: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            save_delay_ms: DEFAULT_SAVE_DELAY_MS,
            reload_delay_ms: DEFAULT_RELOAD_DELAY_MS,
            make_backup: true,
            read_only: false,
        }
    }
}

impl CollectionOptions {
    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_delay_ms)
    }

    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }
}
