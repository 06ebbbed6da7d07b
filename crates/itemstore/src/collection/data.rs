//! Ordered sequence plus path index.
//!
//! `CollectionData` holds three structures:
//! 1. `entries` - item storage keyed by `ItemId`
//! 2. `order` - the user-visible sequence of ids
//! 3. `index` - path to the ids of every item currently at that path
//!
//! Every change to the sequence goes through `attach`/`detach`, and every
//! path change through `set_path`, which patch the index in the same call.
//! The owner holds one lock around the whole struct, so sequence and index
//! are never observed out of step.

use fnv::{FnvHashMap, FnvHashSet};

use super::item::{Item, ItemFlags, ItemId, Memento};
use crate::storage::ItemRecord;

/// Path to item ids. A bucket holds more than one id only after a path
/// rewrite made two items share a path.
pub type PathIndex = FnvHashMap<String, Vec<ItemId>>;

#[derive(Debug, Default)]
pub struct CollectionData {
    entries: FnvHashMap<ItemId, Item>,
    order: Vec<ItemId>,
    index: PathIndex,
    last_id: u64,
}

impl CollectionData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds data from deserialized items, dropping repeated paths.
    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
        let mut data = Self::new();
        data.reset(items);
        data
    }

    /// Replaces the whole sequence and rebuilds the index.
    ///
    /// Ids are not reused across resets.
    pub fn reset(&mut self, items: impl IntoIterator<Item = Item>) {
        self.entries.clear();
        self.order.clear();
        self.index.clear();
        for mut item in items {
            if self.index.contains_key(&item.path) {
                log::debug!("dropping duplicate path {}", item.path);
                continue;
            }
            item.id = ItemId::UNASSIGNED;
            let end = self.order.len();
            self.attach(end, item);
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Items in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn ids(&self) -> &[ItemId] {
        &self.order
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.entries.get(&id)
    }

    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// All items currently at `path`.
    pub fn find(&self, path: &str) -> impl Iterator<Item = &Item> {
        self.index
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id))
    }

    pub fn first_for_path(&self, path: &str) -> Option<&Item> {
        self.find(path).next()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn unlinked_count(&self) -> usize {
        self.entries
            .values()
            .filter(|item| item.is_unlinked())
            .count()
    }

    pub fn snapshot(&self) -> Vec<Item> {
        self.iter().cloned().collect()
    }

    pub fn records(&self) -> Vec<ItemRecord> {
        self.iter().map(Item::to_record).collect()
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Inserts `item` at `position` (clamped to the end).
    ///
    /// If an item with the same path exists, nothing changes and that item is
    /// returned with `false`.
    pub fn insert(&mut self, position: usize, item: Item) -> (Item, bool) {
        if let Some(existing) = self.first_for_path(&item.path) {
            return (existing.clone(), false);
        }
        (self.attach(position, item).clone(), true)
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Memento> {
        let position = self.position(id)?;
        let item = self.detach(position)?;
        Some(Memento {
            item,
            index: position,
        })
    }

    /// Removes `ids`, returning mementos in reverse removal order.
    ///
    /// Items are detached from the highest position down and each memento
    /// records the item's position before the batch started, so the result
    /// is sorted by descending index.
    pub fn remove_recoverable(&mut self, ids: &[ItemId]) -> Vec<Memento> {
        let mut positions: Vec<usize> = ids.iter().filter_map(|id| self.position(*id)).collect();
        positions.sort_unstable();
        positions.dedup();

        positions
            .into_iter()
            .rev()
            .filter_map(|position| {
                self.detach(position).map(|item| Memento {
                    item,
                    index: position,
                })
            })
            .collect()
    }

    /// Re-inserts removed items at their recorded positions.
    ///
    /// Mementos are applied in ascending index order, which reproduces the
    /// original sequence exactly when nothing else changed in between.
    /// Mementos whose path is present again are skipped. Returns how many
    /// items were restored.
    pub fn restore(&mut self, mementos: &[Memento]) -> usize {
        let mut ordered: Vec<&Memento> = mementos.iter().collect();
        ordered.sort_by_key(|memento| memento.index);

        let mut restored = 0;
        for memento in ordered {
            if self.contains_path(&memento.item.path) {
                continue;
            }
            self.attach(memento.index, memento.item.clone());
            restored += 1;
        }
        restored
    }

    /// Moves `id` to the current position of `target`.
    pub fn move_item(&mut self, id: ItemId, target: ItemId) -> bool {
        if id == target {
            return false;
        }
        let (Some(from), Some(to)) = (self.position(id), self.position(target)) else {
            return false;
        };
        let moved = self.order.remove(from);
        self.order.insert(to, moved);
        true
    }

    pub fn set_name(&mut self, id: ItemId, name: Option<String>) -> bool {
        let Some(item) = self.entries.get_mut(&id) else {
            return false;
        };
        if item.name == name {
            return false;
        }
        item.name = name;
        true
    }

    /// Rewrites the path of `id` and moves it to the new index bucket.
    ///
    /// Clears `UNLINKED`: a rewritten path is assumed valid.
    pub fn set_path(&mut self, id: ItemId, path: String) -> bool {
        let Some(item) = self.entries.get_mut(&id) else {
            return false;
        };
        if item.path == path {
            return false;
        }
        let old_path = std::mem::replace(&mut item.path, path.clone());
        item.flags.remove(ItemFlags::UNLINKED);
        self.unindex(&old_path, id);
        self.index.entry(path).or_default().push(id);
        true
    }

    /// Sets or clears `flags` on `id`. Returns true if anything changed.
    pub fn set_flags(&mut self, id: ItemId, flags: ItemFlags, on: bool) -> bool {
        let Some(item) = self.entries.get_mut(&id) else {
            return false;
        };
        let before = item.flags;
        item.flags.set(flags, on);
        item.flags != before
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.order.len();
        self.entries.clear();
        self.order.clear();
        self.index.clear();
        removed
    }

    /// Writes `ids` into the sequence slots `slots`, pairwise.
    ///
    /// `ids` must be a permutation of the ids currently at `slots`.
    pub(crate) fn write_slots(&mut self, slots: &[usize], ids: &[ItemId]) {
        debug_assert_eq!(slots.len(), ids.len());
        for (slot, id) in slots.iter().zip(ids) {
            self.order[*slot] = *id;
        }
    }

    /// Checks that sequence and index agree.
    ///
    /// The sequence length equals the total index entry count, every id in
    /// the sequence is unique and stored, and every item is reachable from
    /// the index by its current path.
    pub fn verify(&self) -> bool {
        if self.order.len() != self.entries.len() {
            return false;
        }
        let indexed: usize = self.index.values().map(Vec::len).sum();
        if indexed != self.order.len() {
            return false;
        }
        let unique: FnvHashSet<ItemId> = self.order.iter().copied().collect();
        if unique.len() != self.order.len() {
            return false;
        }
        self.order.iter().all(|id| {
            self.entries.get(id).is_some_and(|item| {
                item.id == *id
                    && self
                        .index
                        .get(&item.path)
                        .is_some_and(|bucket| bucket.contains(id))
            })
        })
    }

    // -------------------------------------------------------------------------
    // Internal
    // -------------------------------------------------------------------------

    fn allocate_id(&mut self) -> ItemId {
        self.last_id += 1;
        ItemId::new(self.last_id)
    }

    fn attach(&mut self, position: usize, mut item: Item) -> &Item {
        if !item.id.is_assigned() || self.entries.contains_key(&item.id) {
            item.id = self.allocate_id();
        } else {
            self.last_id = self.last_id.max(item.id.get());
        }
        let id = item.id;
        self.index.entry(item.path.clone()).or_default().push(id);
        self.order.insert(position.min(self.order.len()), id);
        self.entries.entry(id).or_insert(item)
    }

    fn detach(&mut self, position: usize) -> Option<Item> {
        if position >= self.order.len() {
            return None;
        }
        let id = self.order.remove(position);
        let item = self.entries.remove(&id)?;
        self.unindex(&item.path, id);
        Some(item)
    }

    fn unindex(&mut self, path: &str, id: ItemId) {
        if let Some(bucket) = self.index.get_mut(path) {
            bucket.retain(|candidate| *candidate != id);
            if bucket.is_empty() {
                self.index.remove(path);
            }
        }
    }
}
