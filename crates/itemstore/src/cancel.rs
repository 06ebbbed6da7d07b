//! Cancellation tokens for resolution passes.
//!
//! A pass is cancelled either by the caller (an external `AtomicBool`) or by a
//! newer pass bumping the tracker's active version. Tokens are checked between
//! loop iterations only, so a single-item mutation is never interrupted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks the active pass version for cancellation.
///
/// When a new pass starts, call `next_version()` to get a new version number.
/// Tokens created for older versions report as cancelled.
#[derive(Debug, Default)]
pub struct VersionTracker {
    active_version: Arc<AtomicU64>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the active version and returns the new version number.
    ///
    /// This cancels any in-flight pass holding an older token.
    pub fn next_version(&self) -> u64 {
        self.active_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Creates a cancellation token bound to `version`.
    pub fn token_for_version(&self, version: u64) -> CancellationToken {
        CancellationToken {
            active_version: Some(self.active_version.clone()),
            version,
            external: None,
        }
    }
}

/// A cancellation token for terminating long-running operations.
///
/// The default token is never cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    active_version: Option<Arc<AtomicU64>>,
    version: u64,
    external: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// Also cancel when `flag` becomes true.
    pub fn with_external(mut self, flag: Arc<AtomicBool>) -> Self {
        self.external = Some(flag);
        self
    }

    /// Checks if this token is still active.
    ///
    /// Returns `Some(())` if still active, `None` if cancelled, so loops can
    /// bail out with `?`.
    #[inline]
    pub fn is_cancelled(&self) -> Option<()> {
        if let Some(flag) = &self.external {
            if flag.load(Ordering::Relaxed) {
                return None;
            }
        }
        match &self.active_version {
            Some(active) if active.load(Ordering::Relaxed) != self.version => None,
            _ => Some(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_token_is_never_cancelled() {
        let token = CancellationToken::default();
        assert!(token.is_cancelled().is_some());
    }

    #[test]
    fn newer_version_cancels_older_token() {
        let tracker = VersionTracker::new();
        let first = tracker.token_for_version(tracker.next_version());
        assert!(first.is_cancelled().is_some());

        let second = tracker.token_for_version(tracker.next_version());
        assert!(first.is_cancelled().is_none());
        assert!(second.is_cancelled().is_some());
    }

    #[test]
    fn external_flag_cancels() {
        let flag = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::default().with_external(flag.clone());
        assert!(token.is_cancelled().is_some());
        flag.store(true, Ordering::SeqCst);
        assert!(token.is_cancelled().is_none());
    }
}
