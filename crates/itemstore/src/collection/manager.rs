//! Collection - main API for a persisted ordered collection.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::data::CollectionData;
use super::item::{Item, ItemFlags, ItemId, Memento};
use super::reorder::{self, MoveDirection};
use super::resolve::{resolve_one, PathResolver, Resolution, ResolveProgress};
use crate::cancel::VersionTracker;
use crate::config::CollectionOptions;
use crate::debounce::Debouncer;
use crate::error::{Result, StoreError};
use crate::freshness::FreshnessToken;
use crate::storage::{
    backup_path, load_with_fallback, read_document, save_atomic, write_document,
};
use crate::sync::{CollectionEvent, SyncBridge};
use crate::watcher::ChangeWatcher;

const EVENT_CAPACITY: usize = 64;

/// Mutable state guarded by the collection lock.
#[derive(Debug)]
struct State {
    data: CollectionData,
    dirty: bool,
    /// Bumped on every persisted change; lets a save tell whether a mutation
    /// arrived while it was writing.
    generation: u64,
    read_only: bool,
    /// Not on disk yet.
    pending: bool,
    loaded_from_backup: bool,
    /// Skip the `.bak` copy on the next save so a good backup is not
    /// overwritten by the file that failed to load.
    suppress_backup: bool,
    freshness: FreshnessToken,
    last_error: Option<String>,
}

impl State {
    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.generation += 1;
    }
}

/// Collection status information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStatus {
    /// Backing file.
    pub path: PathBuf,
    /// Number of items.
    pub len: usize,
    /// Number of items flagged unlinked.
    pub unlinked: usize,
    /// Unsaved changes exist.
    pub dirty: bool,
    /// Mutators are rejected.
    pub read_only: bool,
    /// Not written to disk yet.
    pub pending: bool,
    /// The last load used `<path>.bak`.
    pub loaded_from_backup: bool,
    /// A debounced save is waiting.
    pub save_scheduled: bool,
    /// A file watcher is bound.
    pub watching: bool,
    /// Message of the last failed save.
    pub last_error: Option<String>,
}

/// An ordered, path-indexed collection persisted to one file.
///
/// Constructed once per logical store and shared as `Arc<Collection>`. All
/// sequence and index changes happen under one lock; file I/O never does.
pub struct Collection {
    path: PathBuf,
    options: CollectionOptions,
    state: Mutex<State>,
    save_debouncer: Debouncer,
    reload_debouncer: Debouncer,
    /// Serializes writers of the temp file.
    save_lane: Mutex<()>,
    resolve_versions: VersionTracker,
    /// One resolution pass at a time.
    resolve_lane: Mutex<()>,
    events: broadcast::Sender<CollectionEvent>,
    sync_bridge: RwLock<Option<Arc<dyn SyncBridge>>>,
    watcher: Mutex<Option<ChangeWatcher>>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("state", &self.state)
            .field("watcher", &"<watcher>")
            .finish()
    }
}

impl Collection {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Loads an existing collection, falling back to `<path>.bak`.
    pub fn load(path: impl Into<PathBuf>, options: CollectionOptions) -> Result<Arc<Self>> {
        let path = path.into();
        let started = Instant::now();
        let freshness = FreshnessToken::create(&path);
        let loaded = load_with_fallback(&path, read_document)?;
        let data = CollectionData::from_items(loaded.value.into_iter().map(Item::from));

        log::info!(
            "collection load path={} entries={} from_backup={} load_ms={}",
            path.display(),
            data.len(),
            loaded.from_backup,
            started.elapsed().as_millis(),
        );

        Ok(Self::from_parts(
            path,
            options,
            data,
            false,
            loaded.from_backup,
            freshness,
        ))
    }

    /// Creates an empty collection that is not on disk yet.
    pub fn create(path: impl Into<PathBuf>, options: CollectionOptions) -> Arc<Self> {
        let path = path.into();
        let freshness = FreshnessToken::create(&path);
        log::info!("collection create path={}", path.display());
        Self::from_parts(path, options, CollectionData::new(), true, false, freshness)
    }

    /// Loads the collection if a primary or backup file exists, otherwise
    /// creates a pending one.
    pub fn open(path: impl Into<PathBuf>, options: CollectionOptions) -> Result<Arc<Self>> {
        let path = path.into();
        if path.exists() || backup_path(&path).exists() {
            Self::load(path, options)
        } else {
            Ok(Self::create(path, options))
        }
    }

    fn from_parts(
        path: PathBuf,
        options: CollectionOptions,
        data: CollectionData,
        pending: bool,
        loaded_from_backup: bool,
        freshness: FreshnessToken,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = State {
            data,
            dirty: false,
            generation: 0,
            read_only: options.read_only,
            pending,
            loaded_from_backup,
            suppress_backup: loaded_from_backup,
            freshness,
            last_error: None,
        };
        Arc::new(Self {
            path,
            options,
            state: Mutex::new(state),
            save_debouncer: Debouncer::new(),
            reload_debouncer: Debouncer::new(),
            save_lane: Mutex::new(()),
            resolve_versions: VersionTracker::new(),
            resolve_lane: Mutex::new(()),
            events,
            sync_bridge: RwLock::new(None),
            watcher: Mutex::new(None),
        })
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn is_read_only(&self) -> bool {
        self.state.lock().read_only
    }

    /// Toggles whether mutators are rejected. A failed save sets this.
    pub fn set_read_only(&self, read_only: bool) {
        self.state.lock().read_only = read_only;
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    pub fn loaded_from_backup(&self) -> bool {
        self.state.lock().loaded_from_backup
    }

    /// Token of the file as last loaded or saved by this collection.
    pub fn freshness(&self) -> FreshnessToken {
        self.state.lock().freshness.clone()
    }

    pub fn status(&self) -> CollectionStatus {
        let save_scheduled = self.save_debouncer.is_pending();
        let watching = self
            .watcher
            .lock()
            .as_ref()
            .is_some_and(ChangeWatcher::is_bound);
        let state = self.state.lock();
        CollectionStatus {
            path: self.path.clone(),
            len: state.data.len(),
            unlinked: state.data.unlinked_count(),
            dirty: state.dirty,
            read_only: state.read_only,
            pending: state.pending,
            loaded_from_backup: state.loaded_from_backup,
            save_scheduled,
            watching,
            last_error: state.last_error.clone(),
        }
    }

    /// Subscribes to change, save and reload notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.events.subscribe()
    }

    /// Installs the hook that rebroadcasts saves to other instances.
    pub fn set_sync_bridge(&self, bridge: Option<Arc<dyn SyncBridge>>) {
        *self.sync_bridge.write() = bridge;
    }

    fn publish(&self, event: CollectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Snapshot of all items in order.
    pub fn items(&self) -> Vec<Item> {
        self.state.lock().data.snapshot()
    }

    pub fn get(&self, id: ItemId) -> Option<Item> {
        self.state.lock().data.get(id).cloned()
    }

    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.state.lock().data.position(id)
    }

    /// All items at `path`.
    pub fn find(&self, path: &str) -> Vec<Item> {
        self.state.lock().data.find(path).cloned().collect()
    }

    pub fn find_first(&self, path: &str) -> Option<Item> {
        self.state.lock().data.first_for_path(path).cloned()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.state.lock().data.contains_path(path)
    }

    /// Items for each of `paths`, in the order the paths are given.
    pub fn collect<I, S>(&self, paths: I) -> Vec<Item>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let state = self.state.lock();
        paths
            .into_iter()
            .flat_map(|path| {
                state
                    .data
                    .find(path.as_ref())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn unlinked_count(&self) -> usize {
        self.state.lock().data.unlinked_count()
    }

    /// Checks that the sequence and the path index agree.
    pub fn verify_consistency(&self) -> bool {
        self.state.lock().data.verify()
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Runs `apply` under the lock. `apply` reports whether it changed the
    /// sequence; a change marks the collection dirty and is published.
    fn mutate<T>(&self, apply: impl FnOnce(&mut CollectionData) -> (T, bool)) -> Result<T> {
        let (value, changed) = {
            let mut state = self.state.lock();
            if state.read_only {
                return Err(StoreError::ReadOnly(self.path.clone()));
            }
            let (value, changed) = apply(&mut state.data);
            if changed {
                state.mark_dirty();
            }
            debug_assert!(state.data.verify(), "sequence and path index diverged");
            (value, changed)
        };
        if changed {
            self.publish(CollectionEvent::Changed);
        }
        Ok(value)
    }

    /// Appends `item`, or returns the item already at its path.
    pub fn add(&self, item: Item) -> Result<Item> {
        self.mutate(|data| data.insert(usize::MAX, item))
    }

    pub fn add_all(&self, items: impl IntoIterator<Item = Item>) -> Result<Vec<Item>> {
        self.mutate(|data| {
            let mut changed = false;
            let stored = items
                .into_iter()
                .map(|item| {
                    let (stored, inserted) = data.insert(usize::MAX, item);
                    changed |= inserted;
                    stored
                })
                .collect();
            (stored, changed)
        })
    }

    /// Inserts at `index`, clamped to `[0, len]`.
    pub fn insert_at(&self, index: usize, item: Item) -> Result<Item> {
        self.mutate(|data| data.insert(index, item))
    }

    /// Inserts before `target`, or appends if `target` is gone.
    pub fn insert_before(&self, target: ItemId, item: Item) -> Result<Item> {
        self.mutate(|data| {
            let index = data.position(target).unwrap_or(data.len());
            data.insert(index, item)
        })
    }

    pub fn remove(&self, id: ItemId) -> Result<bool> {
        self.mutate(|data| {
            let removed = data.remove(id).is_some();
            (removed, removed)
        })
    }

    pub fn remove_all(&self, ids: &[ItemId]) -> Result<usize> {
        self.mutate(|data| {
            let removed = data.remove_recoverable(ids).len();
            (removed, removed > 0)
        })
    }

    /// Removes `ids` and returns what `restore` needs to undo it.
    pub fn remove_with_recoverable(&self, ids: &[ItemId]) -> Result<Vec<Memento>> {
        self.mutate(|data| {
            let mementos = data.remove_recoverable(ids);
            let changed = !mementos.is_empty();
            (mementos, changed)
        })
    }

    pub fn restore(&self, mementos: &[Memento]) -> Result<usize> {
        self.mutate(|data| {
            let restored = data.restore(mementos);
            (restored, restored > 0)
        })
    }

    /// Moves `id` to the position of `target`.
    pub fn move_item(&self, id: ItemId, target: ItemId) -> Result<bool> {
        self.mutate(|data| {
            let moved = data.move_item(id, target);
            (moved, moved)
        })
    }

    pub fn can_move_up(&self, view: &[ItemId], selection: &[ItemId]) -> bool {
        reorder::can_move(&self.state.lock().data, view, selection, MoveDirection::Up)
    }

    pub fn can_move_down(&self, view: &[ItemId], selection: &[ItemId]) -> bool {
        reorder::can_move(&self.state.lock().data, view, selection, MoveDirection::Down)
    }

    pub fn move_up(&self, view: &[ItemId], selection: &[ItemId]) -> Result<bool> {
        self.move_in_view(view, selection, MoveDirection::Up)
    }

    pub fn move_down(&self, view: &[ItemId], selection: &[ItemId]) -> Result<bool> {
        self.move_in_view(view, selection, MoveDirection::Down)
    }

    pub fn move_to_top(&self, view: &[ItemId], selection: &[ItemId]) -> Result<bool> {
        self.move_in_view(view, selection, MoveDirection::Top)
    }

    pub fn move_to_bottom(&self, view: &[ItemId], selection: &[ItemId]) -> Result<bool> {
        self.move_in_view(view, selection, MoveDirection::Bottom)
    }

    fn move_in_view(
        &self,
        view: &[ItemId],
        selection: &[ItemId],
        direction: MoveDirection,
    ) -> Result<bool> {
        self.mutate(|data| {
            let moved = reorder::apply_move(data, view, selection, direction);
            (moved, moved)
        })
    }

    /// Sets the display name of `id`.
    pub fn rename(&self, id: ItemId, name: Option<String>) -> Result<bool> {
        self.mutate(|data| {
            let renamed = data.set_name(id, name);
            (renamed, renamed)
        })
    }

    /// Rewrites the path of `id`, clearing its unlinked flag.
    pub fn replace_path(&self, id: ItemId, path: impl Into<String>) -> Result<bool> {
        let path = path.into();
        self.mutate(|data| {
            let replaced = data.set_path(id, path);
            (replaced, replaced)
        })
    }

    /// Replaces the whole sequence.
    pub fn reset(&self, items: impl IntoIterator<Item = Item>) -> Result<()> {
        self.mutate(|data| {
            data.reset(items);
            ((), true)
        })
    }

    pub fn clear(&self) -> Result<usize> {
        self.mutate(|data| {
            let removed = data.clear();
            (removed, removed > 0)
        })
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Writes the collection if it is editable and dirty (or `force`).
    ///
    /// The sequence is snapshotted under the lock and written outside it. A
    /// failed write marks the collection read-only, publishes `SaveFailed`
    /// and returns the error; nothing is retried.
    pub fn save(&self, force: bool) -> Result<bool> {
        let _lane = self.save_lane.lock();
        let (records, generation, make_backup) = {
            let state = self.state.lock();
            if state.read_only || !(state.dirty || force) {
                return Ok(false);
            }
            (
                state.data.records(),
                state.generation,
                self.options.make_backup && !state.suppress_backup,
            )
        };

        let started = Instant::now();
        if let Err(error) = save_atomic(&self.path, make_backup, |target| {
            write_document(target, &records)
        }) {
            let message = error.to_string();
            {
                let mut state = self.state.lock();
                state.read_only = true;
                state.last_error = Some(message.clone());
            }
            log::warn!(
                "collection save failed for {}, now read-only: {}",
                self.path.display(),
                message
            );
            self.publish(CollectionEvent::SaveFailed(message));
            return Err(error);
        }

        let token = FreshnessToken::create(&self.path);
        {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.dirty = false;
            }
            state.pending = false;
            state.suppress_backup = false;
            state.freshness = token.clone();
            state.last_error = None;
        }

        log::debug!(
            "saved collection {} ({} entries) in {} ms",
            self.path.display(),
            records.len(),
            started.elapsed().as_millis()
        );

        self.publish(CollectionEvent::Saved(token.clone()));
        let bridge = self.sync_bridge.read().clone();
        if let Some(bridge) = bridge {
            bridge.on_saved(&self.path, &token);
        }
        Ok(true)
    }

    /// Schedules `save(false)` after the configured quiescence window.
    pub fn delay_save(self: &Arc<Self>) {
        let collection = Arc::downgrade(self);
        self.save_debouncer.request(
            move || {
                let Some(collection) = collection.upgrade() else {
                    return;
                };
                // Failures are logged and published by `save`.
                let _ = collection.save(false);
            },
            self.options.save_delay(),
        );
    }

    /// Runs a pending delayed save now.
    ///
    /// If the timer already fired, waits for that save to finish instead.
    /// Returns `Ok(false)` when nothing was pending.
    pub fn flush(&self) -> Result<bool> {
        if self.save_debouncer.cancel() {
            return self.save(false);
        }
        self.save_debouncer.wait_idle();
        Ok(false)
    }

    // -------------------------------------------------------------------------
    // External changes
    // -------------------------------------------------------------------------

    /// Entry point for the host when the backing file changed or vanished.
    ///
    /// Schedules a debounced `reload`.
    pub fn notify_changed_on_disk(self: &Arc<Self>) {
        let collection = Arc::downgrade(self);
        self.reload_debouncer.request(
            move || {
                let Some(collection) = collection.upgrade() else {
                    return;
                };
                if let Err(error) = collection.reload() {
                    log::warn!(
                        "collection reload failed for {}, keeping in-memory state: {}",
                        collection.path.display(),
                        error
                    );
                }
            },
            self.options.reload_delay(),
        );
    }

    /// Replaces the in-memory sequence with the file's content.
    ///
    /// Unsaved changes are discarded: the last writer of the file wins.
    /// Returns `Ok(false)` when the file is unchanged since this collection
    /// last loaded or saved it, or when it was deleted. A deleted file is
    /// not replaced by `<path>.bak`, which is a save behind; the sequence is
    /// kept and marked dirty and pending so the next save recreates it.
    pub fn reload(&self) -> Result<bool> {
        let known = self.freshness();
        if known.is_latest() {
            log::debug!("{} unchanged, skipping reload", self.path.display());
            return Ok(false);
        }

        let freshness = FreshnessToken::create(&self.path);
        if !freshness.exists() {
            {
                let mut state = self.state.lock();
                state.freshness = freshness;
                state.pending = true;
                state.mark_dirty();
            }
            log::warn!(
                "{} was deleted, keeping in-memory collection",
                self.path.display()
            );
            return Ok(false);
        }

        let loaded = load_with_fallback(&self.path, read_document)?;
        let entries = {
            let mut state = self.state.lock();
            state
                .data
                .reset(loaded.value.into_iter().map(Item::from));
            state.dirty = false;
            state.generation += 1;
            state.pending = false;
            state.loaded_from_backup = loaded.from_backup;
            state.suppress_backup = loaded.from_backup;
            state.freshness = freshness;
            state.data.len()
        };
        self.save_debouncer.cancel();

        log::info!(
            "collection reload path={} entries={} from_backup={}",
            self.path.display(),
            entries,
            loaded.from_backup
        );
        self.publish(CollectionEvent::Reloaded);
        Ok(true)
    }

    /// Watches the backing file and reloads on external changes.
    ///
    /// Returns false if the directory does not exist yet; call again later.
    pub fn watch(self: &Arc<Self>) -> bool {
        let mut slot = self.watcher.lock();
        let watcher = slot.get_or_insert_with(|| {
            let collection = Arc::downgrade(self);
            ChangeWatcher::new(move |event| {
                if let Some(collection) = collection.upgrade() {
                    log::debug!("{} {:?} on disk", collection.path.display(), event);
                    collection.notify_changed_on_disk();
                }
            })
        });
        watcher.start(&self.path)
    }

    pub fn unwatch(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
    }

    /// Flushes any pending save and releases the watcher.
    pub fn close(&self) -> Result<bool> {
        self.unwatch();
        self.reload_debouncer.cancel();
        self.flush()
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Checks every item's backing resource and returns the unlinked count.
    ///
    /// Missing items are relocated when `resolver` finds a replacement (the
    /// path is rewritten and the collection dirtied) or flagged `UNLINKED`
    /// otherwise. Starting a pass cancels any pass in flight and waits for it
    /// to stop. Cancellation, by `cancel` or by a newer pass, stops the loop
    /// early; items already processed keep their result and the count is
    /// returned as usual.
    pub fn resolve_unlinked(
        &self,
        resolver: &dyn PathResolver,
        progress: &dyn Fn(ResolveProgress),
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<usize> {
        let version = self.resolve_versions.next_version();
        let _lane = self.resolve_lane.lock();
        let mut token = self.resolve_versions.token_for_version(version);
        if let Some(flag) = cancel {
            token = token.with_external(flag);
        }

        let snapshot: Vec<(ItemId, String)> = self
            .state
            .lock()
            .data
            .iter()
            .map(|item| (item.id(), item.path().to_string()))
            .collect();
        let total = snapshot.len();

        let mut changed = false;
        let mut cancelled = false;
        for (done, (id, path)) in snapshot.into_iter().enumerate() {
            if token.is_cancelled().is_none() {
                cancelled = true;
                break;
            }
            let resolution = resolve_one(resolver, &path);
            {
                let mut state = self.state.lock();
                // Skip items removed or re-pathed since the snapshot.
                if state.data.get(id).is_some_and(|item| item.path() == path) {
                    changed |= apply_resolution(&mut state, id, resolution);
                }
                debug_assert!(state.data.verify(), "sequence and path index diverged");
            }
            progress(ResolveProgress {
                done: done + 1,
                total,
            });
        }

        if changed {
            self.publish(CollectionEvent::Changed);
        }
        let unlinked = self.unlinked_count();
        log::debug!(
            "resolution pass for {} {}: {} of {} unlinked",
            self.path.display(),
            if cancelled { "cancelled" } else { "finished" },
            unlinked,
            total
        );
        Ok(unlinked)
    }

    /// `resolve_unlinked` on tokio's blocking pool.
    pub async fn resolve_unlinked_async<R, P>(
        self: &Arc<Self>,
        resolver: Arc<R>,
        progress: P,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<usize>
    where
        R: PathResolver + 'static,
        P: Fn(ResolveProgress) + Send + 'static,
    {
        let collection = self.clone();
        tokio::task::spawn_blocking(move || {
            collection.resolve_unlinked(resolver.as_ref(), &progress, cancel)
        })
        .await
        .map_err(|error| StoreError::Internal(format!("resolution task failed: {error}")))?
    }
}

/// Applies one item's resolution. Returns true if the item changed.
fn apply_resolution(state: &mut State, id: ItemId, resolution: Resolution) -> bool {
    match resolution {
        Resolution::Present => state.data.set_flags(id, ItemFlags::UNLINKED, false),
        Resolution::Missing => state.data.set_flags(id, ItemFlags::UNLINKED, true),
        // A read-only collection cannot take the new path.
        Resolution::Relocated(_) if state.read_only => {
            state.data.set_flags(id, ItemFlags::UNLINKED, true)
        }
        Resolution::Relocated(path) => {
            let relocated = state.data.set_path(id, path);
            if relocated {
                state.data.set_flags(id, ItemFlags::RELOCATED, true);
                state.mark_dirty();
            }
            relocated
        }
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.dirty && !state.read_only {
            log::warn!(
                "collection {} dropped with unsaved changes",
                self.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FsResolver;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn options() -> CollectionOptions {
        CollectionOptions {
            save_delay_ms: 50,
            reload_delay_ms: 20,
            ..CollectionOptions::default()
        }
    }

    fn paths(collection: &Collection) -> Vec<String> {
        collection
            .items()
            .iter()
            .map(|item| item.path().to_string())
            .collect()
    }

    fn ids(collection: &Collection, paths: &[&str]) -> Vec<ItemId> {
        paths
            .iter()
            .map(|path| collection.find_first(path).unwrap().id())
            .collect()
    }

    fn save_counter(collection: &Collection) -> Arc<AtomicUsize> {
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = saves.clone();
        collection.set_sync_bridge(Some(Arc::new(
            move |_: &Path, _: &FreshnessToken| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )));
        saves
    }

    /// Coarse filesystem timestamps can make back-to-back writes look equal.
    fn tick() {
        thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");

        let collection = Collection::create(&path, options());
        assert!(collection.is_pending());
        collection.add(Item::new("/music/a.flac")).unwrap();
        collection
            .add(Item::new("/music/b.flac").with_name("Second"))
            .unwrap();
        assert!(collection.save(false).unwrap());
        assert!(!collection.is_dirty());
        assert!(!collection.is_pending());

        let loaded = Collection::load(&path, options()).unwrap();
        assert_eq!(paths(&loaded), vec!["/music/a.flac", "/music/b.flac"]);
        assert_eq!(
            loaded.find_first("/music/b.flac").unwrap().name(),
            Some("Second")
        );
        assert!(!loaded.loaded_from_backup());
        assert!(loaded.verify_consistency());
    }

    #[test]
    fn open_missing_file_is_pending_until_saved() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");

        let collection = Collection::open(&path, options()).unwrap();
        assert!(collection.is_pending());
        assert!(!collection.save(false).unwrap());
        assert!(!path.exists());

        collection.add(Item::new("/a")).unwrap();
        assert!(collection.save(false).unwrap());
        assert!(path.exists());
        assert!(!collection.is_pending());
    }

    #[test]
    fn add_is_idempotent_per_path() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());

        let first = collection.add(Item::new("/a")).unwrap();
        collection.save(false).unwrap();
        let again = collection.add(Item::new("/a")).unwrap();

        assert_eq!(first.id(), again.id());
        assert_eq!(collection.len(), 1);
        assert!(!collection.is_dirty());
    }

    #[test]
    fn remove_and_restore_rebuilds_sequence() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        collection
            .add_all(["/a", "/b", "/c", "/d"].map(Item::new))
            .unwrap();

        let removed = ids(&collection, &["/b", "/d"]);
        let mementos = collection.remove_with_recoverable(&removed).unwrap();
        assert_eq!(paths(&collection), vec!["/a", "/c"]);
        assert!(!collection.contains_path("/b"));

        assert_eq!(collection.restore(&mementos).unwrap(), 2);
        assert_eq!(paths(&collection), vec!["/a", "/b", "/c", "/d"]);
        assert!(collection.verify_consistency());
    }

    #[test]
    fn insert_before_missing_target_appends() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        collection.add_all(["/a", "/b"].map(Item::new)).unwrap();
        let a = collection.find_first("/a").unwrap().id();

        collection.insert_before(a, Item::new("/front")).unwrap();
        collection.remove(a).unwrap();
        collection.insert_before(a, Item::new("/end")).unwrap();

        assert_eq!(paths(&collection), vec!["/front", "/b", "/end"]);
    }

    #[test]
    fn grouped_moves_go_through_collection() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        collection
            .add_all(["/a", "/b", "/c", "/d"].map(Item::new))
            .unwrap();
        collection.save(false).unwrap();

        let view = ids(&collection, &["/a", "/b", "/c", "/d"]);
        let selection = ids(&collection, &["/c", "/d"]);
        assert!(collection.can_move_up(&view, &selection));
        assert!(!collection.can_move_down(&view, &selection));

        assert!(!collection.move_down(&view, &selection).unwrap());
        assert!(!collection.is_dirty());

        assert!(collection.move_to_top(&view, &selection).unwrap());
        assert_eq!(paths(&collection), vec!["/c", "/d", "/a", "/b"]);
        assert!(collection.is_dirty());
    }

    #[test]
    fn read_only_rejects_mutations() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(
            temp.path().join("list.json"),
            CollectionOptions {
                read_only: true,
                ..options()
            },
        );

        let error = collection.add(Item::new("/a")).unwrap_err();
        assert!(matches!(error, StoreError::ReadOnly(_)));
        assert!(collection.is_empty());
        assert!(!collection.save(true).unwrap());
    }

    #[test]
    fn mutations_publish_changed() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        let mut events = collection.subscribe();

        collection.add(Item::new("/a")).unwrap();
        assert_eq!(events.try_recv().unwrap(), CollectionEvent::Changed);

        // Re-adding the same path changes nothing.
        collection.add(Item::new("/a")).unwrap();
        assert!(events.try_recv().is_err());

        collection.save(false).unwrap();
        assert!(matches!(events.try_recv().unwrap(), CollectionEvent::Saved(_)));
    }

    #[test]
    fn burst_of_delayed_saves_writes_once() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        let saves = save_counter(&collection);

        for i in 0..10 {
            collection.add(Item::new(format!("/track/{i}"))).unwrap();
            collection.delay_save();
        }
        assert!(collection.status().save_scheduled);
        thread::sleep(Duration::from_millis(400));

        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert!(!collection.is_dirty());
        let loaded = Collection::load(collection.path(), options()).unwrap();
        assert_eq!(loaded.len(), 10);
    }

    #[test]
    fn flush_runs_pending_save_once() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(
            temp.path().join("list.json"),
            CollectionOptions {
                save_delay_ms: 200,
                ..options()
            },
        );
        let saves = save_counter(&collection);

        collection.add(Item::new("/a")).unwrap();
        collection.delay_save();
        assert!(collection.flush().unwrap());
        assert_eq!(saves.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(400));
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert!(!collection.flush().unwrap());
    }

    #[test]
    fn failed_save_keeps_previous_file_and_goes_read_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");

        let collection = Collection::create(&path, options());
        collection.add_all(["/a", "/b"].map(Item::new)).unwrap();
        collection.save(false).unwrap();

        collection.add(Item::new("/c")).unwrap();
        // A directory squatting on the temp path makes the write fail.
        let blocker = crate::storage::temp_path(&path);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        let mut events = collection.subscribe();
        assert!(collection.save(false).is_err());
        assert!(collection.is_read_only());
        assert!(collection.status().last_error.is_some());
        assert!(matches!(
            events.try_recv().unwrap(),
            CollectionEvent::SaveFailed(_)
        ));

        // In-memory state survives; further edits are refused.
        assert_eq!(collection.len(), 3);
        assert!(collection.add(Item::new("/d")).is_err());

        let reloaded = Collection::load(&path, options()).unwrap();
        assert_eq!(paths(&reloaded), vec!["/a", "/b"]);
    }

    #[test]
    fn backup_load_does_not_overwrite_backup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");

        let collection = Collection::create(&path, options());
        collection.add(Item::new("/good")).unwrap();
        collection.save(false).unwrap();
        collection.add(Item::new("/newer")).unwrap();
        collection.save(false).unwrap();
        let backup = backup_path(&path);
        let good_backup = fs::read(&backup).unwrap();
        drop(collection);

        fs::write(&path, b"{ not json").unwrap();
        let recovered = Collection::load(&path, options()).unwrap();
        assert!(recovered.loaded_from_backup());
        assert_eq!(paths(&recovered), vec!["/good"]);

        recovered.add(Item::new("/after")).unwrap();
        recovered.save(false).unwrap();
        assert_eq!(fs::read(&backup).unwrap(), good_backup);

        // The next save backs up normally again.
        recovered.add(Item::new("/later")).unwrap();
        recovered.save(false).unwrap();
        let reread = Collection::load(&backup, options()).unwrap();
        assert_eq!(paths(&reread), vec!["/good", "/after"]);
    }

    #[test]
    fn reload_picks_up_external_writes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");

        let ours = Collection::create(&path, options());
        ours.add(Item::new("/a")).unwrap();
        ours.save(false).unwrap();
        // Own save is already the latest.
        assert!(!ours.reload().unwrap());

        tick();
        let theirs = Collection::load(&path, options()).unwrap();
        theirs.add(Item::new("/b")).unwrap();
        theirs.save(false).unwrap();

        let mut events = ours.subscribe();
        ours.add(Item::new("/unsaved")).unwrap();
        assert!(ours.reload().unwrap());
        assert_eq!(paths(&ours), vec!["/a", "/b"]);
        assert!(!ours.is_dirty());
        assert_eq!(events.try_recv().unwrap(), CollectionEvent::Changed);
        assert_eq!(events.try_recv().unwrap(), CollectionEvent::Reloaded);
    }

    #[test]
    fn deleted_file_is_not_replaced_by_backup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");

        let collection = Collection::create(&path, options());
        collection.add(Item::new("/a")).unwrap();
        collection.save(false).unwrap();
        collection.add(Item::new("/b")).unwrap();
        collection.save(false).unwrap();
        assert!(backup_path(&path).exists());

        fs::remove_file(&path).unwrap();
        assert!(!collection.reload().unwrap());
        assert_eq!(paths(&collection), vec!["/a", "/b"]);
        assert!(!collection.loaded_from_backup());
        assert!(collection.is_dirty());
        assert!(collection.is_pending());
        // A second notification for the same deletion changes nothing.
        assert!(!collection.reload().unwrap());

        assert!(collection.save(false).unwrap());
        let reloaded = Collection::load(&path, options()).unwrap();
        assert!(!reloaded.loaded_from_backup());
        assert_eq!(paths(&reloaded), vec!["/a", "/b"]);
    }

    #[test]
    fn close_waits_for_delayed_save_in_flight() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(
            temp.path().join("list.json"),
            CollectionOptions {
                save_delay_ms: 10,
                ..options()
            },
        );
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = saves.clone();
        collection.set_sync_bridge(Some(Arc::new(
            move |_: &Path, _: &FreshnessToken| {
                thread::sleep(Duration::from_millis(200));
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )));

        collection.add(Item::new("/a")).unwrap();
        collection.delay_save();
        // Let the timer fire; the save is now running on the worker.
        thread::sleep(Duration::from_millis(80));
        assert!(!collection.status().save_scheduled);

        assert!(!collection.close().unwrap());
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert!(!collection.is_dirty());
    }

    #[test]
    fn watcher_triggers_debounced_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("list.json");

        let ours = Collection::create(&path, options());
        ours.add(Item::new("/a")).unwrap();
        ours.save(false).unwrap();
        assert!(ours.watch());
        assert!(ours.status().watching);

        tick();
        let theirs = Collection::load(&path, options()).unwrap();
        theirs.add(Item::new("/b")).unwrap();
        theirs.save(false).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ours.len() != 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(paths(&ours), vec!["/a", "/b"]);

        ours.close().unwrap();
        assert!(!ours.status().watching);
    }

    #[test]
    fn unlinked_item_is_relinked_when_file_returns() {
        let temp = TempDir::new().unwrap();
        let track = temp.path().join("track.flac");
        let track_path = track.to_str().unwrap().to_string();
        let collection = Collection::create(temp.path().join("list.json"), options());
        collection.add(Item::new(track_path.clone())).unwrap();
        collection.save(false).unwrap();

        let ignore = |_: ResolveProgress| {};
        assert_eq!(
            collection.resolve_unlinked(&FsResolver, &ignore, None).unwrap(),
            1
        );
        assert!(collection.find_first(&track_path).unwrap().is_unlinked());
        // Flags are not persisted.
        assert!(!collection.is_dirty());

        fs::write(&track, b"audio").unwrap();
        assert_eq!(
            collection.resolve_unlinked(&FsResolver, &ignore, None).unwrap(),
            0
        );
        assert!(!collection.find_first(&track_path).unwrap().is_unlinked());
    }

    struct Moved;

    impl PathResolver for Moved {
        fn exists(&self, path: &str) -> bool {
            path.starts_with("/new/")
        }

        fn locate(&self, path: &str) -> Option<String> {
            path.strip_prefix("/old/").map(|rest| format!("/new/{rest}"))
        }
    }

    #[test]
    fn relocated_items_are_rewritten_and_dirty() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        collection
            .add_all(["/old/a", "/new/b", "/gone/c"].map(Item::new))
            .unwrap();
        collection.save(false).unwrap();

        let progress = Mutex::new(Vec::new());
        let record = |step: ResolveProgress| progress.lock().push(step.done);
        let unlinked = collection.resolve_unlinked(&Moved, &record, None).unwrap();

        assert_eq!(unlinked, 1);
        assert_eq!(*progress.lock(), vec![1, 2, 3]);
        assert_eq!(paths(&collection), vec!["/new/a", "/new/b", "/gone/c"]);
        assert!(collection
            .find_first("/new/a")
            .unwrap()
            .flags()
            .contains(ItemFlags::RELOCATED));
        assert!(!collection.contains_path("/old/a"));
        assert!(collection.is_dirty());
        assert!(collection.verify_consistency());
    }

    /// Nothing exists, and every check takes a while.
    struct Slow;

    impl PathResolver for Slow {
        fn exists(&self, _path: &str) -> bool {
            thread::sleep(Duration::from_millis(20));
            false
        }

        fn locate(&self, _path: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn new_pass_cancels_running_pass() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        collection
            .add_all((0..50).map(|i| Item::new(format!("/t/{i}"))))
            .unwrap();

        let first = {
            let collection = collection.clone();
            thread::spawn(move || {
                collection.resolve_unlinked(&Slow, &|_: ResolveProgress| {}, None)
            })
        };
        thread::sleep(Duration::from_millis(100));
        let second = collection.resolve_unlinked(&Slow, &|_: ResolveProgress| {}, None);

        // The first pass stops early without an error, keeping what it did.
        let partial = first.join().unwrap().unwrap();
        assert!(partial > 0 && partial < 50, "partial = {partial}");
        assert_eq!(second.unwrap(), 50);
    }

    #[test]
    fn external_flag_cancels_pass() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        collection.add_all(["/a", "/b"].map(Item::new)).unwrap();

        let flag = Arc::new(AtomicBool::new(true));
        let ignore = |_: ResolveProgress| {};
        let unlinked = collection
            .resolve_unlinked(&FsResolver, &ignore, Some(flag))
            .unwrap();
        // Nothing was checked, so nothing is flagged.
        assert_eq!(unlinked, 0);
        assert_eq!(collection.unlinked_count(), 0);
    }

    #[tokio::test]
    async fn resolve_on_blocking_pool() {
        let temp = TempDir::new().unwrap();
        let collection = Collection::create(temp.path().join("list.json"), options());
        collection
            .add_all(["/old/a", "/gone/b"].map(Item::new))
            .unwrap();

        let unlinked = collection
            .resolve_unlinked_async(Arc::new(Moved), |_| {}, None)
            .await
            .unwrap();

        assert_eq!(unlinked, 1);
        assert!(collection.contains_path("/new/a"));
    }
}
