//! Single-file change watcher backed by notify.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::events::{classify_event, WatchEvent};
use crate::freshness::FreshnessToken;

type Handler = Arc<dyn Fn(WatchEvent) + Send + Sync + 'static>;

struct ActiveWatch {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

/// Watches one file by watching its directory non-recursively.
///
/// Events are delivered to the handler on notify's thread. The handler
/// should only schedule work (e.g. a debounced reload), never mutate
/// UI-affine state directly.
pub struct ChangeWatcher {
    active: Mutex<Option<ActiveWatch>>,
    handler: Handler,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("bound_path", &self.bound_path())
            .field("_watcher", &"<watcher>")
            .finish()
    }
}

impl ChangeWatcher {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        Self {
            active: Mutex::new(None),
            handler: Arc::new(handler),
        }
    }

    /// Binds the watcher to `path`.
    ///
    /// A no-op returning true if already bound to `path`. Any previous watch
    /// is released first. Returns false (and stays unbound) when the
    /// directory does not exist or the path has no file name; call again
    /// once the directory exists.
    pub fn start(&self, path: &Path) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|watch| watch.path == path) {
            return true;
        }
        *active = None;

        if path.file_name().is_none() {
            log::warn!("cannot watch {}: no file name", path.display());
            return false;
        }
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.is_dir() {
            log::warn!(
                "cannot watch {}: directory {} does not exist",
                path.display(),
                dir.display()
            );
            return false;
        }

        match create_file_watcher(path, &dir, self.handler.clone()) {
            Ok(watcher) => {
                log::debug!("watching {}", path.display());
                *active = Some(ActiveWatch {
                    path: path.to_path_buf(),
                    _watcher: watcher,
                });
                true
            }
            Err(error) => {
                log::warn!("file watcher disabled for {}: {}", path.display(), error);
                false
            }
        }
    }

    /// Releases the current watch, if any.
    pub fn stop(&self) {
        if let Some(watch) = self.active.lock().take() {
            log::debug!("stopped watching {}", watch.path.display());
        }
    }

    pub fn is_bound(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn bound_path(&self) -> Option<PathBuf> {
        self.active.lock().as_ref().map(|watch| watch.path.clone())
    }
}

fn create_file_watcher(
    path: &Path,
    dir: &Path,
    handler: Handler,
) -> notify::Result<RecommendedWatcher> {
    let bound = path.to_path_buf();
    let last_seen = Mutex::new(FreshnessToken::create(&bound));

    let mut watcher = recommended_watcher(move |event_result: notify::Result<Event>| {
        let event = match event_result {
            Ok(event) => event,
            Err(error) => {
                log::warn!("watch error for {}: {}", bound.display(), error);
                return;
            }
        };
        let Some(kind) = classify_event(&event, &bound) else {
            return;
        };

        // Only forward changes the file's timestamp confirms.
        let fresh = FreshnessToken::create(&bound);
        {
            let mut last = last_seen.lock();
            if kind == WatchEvent::Changed && *last == fresh {
                return;
            }
            *last = fresh;
        }
        log::debug!("{} {:?}", bound.display(), kind);
        handler(kind);
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn channel_watcher() -> (ChangeWatcher, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        let watcher = ChangeWatcher::new(move |event| {
            let _ = tx.lock().send(event);
        });
        (watcher, rx)
    }

    #[test]
    fn missing_directory_leaves_watcher_unbound() {
        let temp = TempDir::new().unwrap();
        let (watcher, _rx) = channel_watcher();
        assert!(!watcher.start(&temp.path().join("absent").join("list.json")));
        assert!(!watcher.is_bound());
    }

    #[test]
    fn start_is_idempotent_and_stop_unbinds() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");
        let (watcher, _rx) = channel_watcher();

        assert!(watcher.start(&path));
        assert!(watcher.start(&path));
        assert_eq!(watcher.bound_path(), Some(path));

        watcher.stop();
        assert!(!watcher.is_bound());
    }

    #[test]
    fn rebinding_switches_path() {
        let temp = TempDir::new().unwrap();
        let (watcher, _rx) = channel_watcher();
        assert!(watcher.start(&temp.path().join("a.json")));
        assert!(watcher.start(&temp.path().join("b.json")));
        assert_eq!(watcher.bound_path(), Some(temp.path().join("b.json")));
    }

    #[test]
    fn reports_changes_and_deletes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");
        let (watcher, rx) = channel_watcher();
        assert!(watcher.start(&path));

        fs::write(temp.path().join("other.json"), "ignored").unwrap();
        fs::write(&path, "one").unwrap();
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, WatchEvent::Changed);

        fs::remove_file(&path).unwrap();
        let deleted = (0..10)
            .filter_map(|_| rx.recv_timeout(Duration::from_secs(1)).ok())
            .any(|event| event == WatchEvent::Deleted);
        assert!(deleted);
    }
}
