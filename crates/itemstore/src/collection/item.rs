//! Items stored in a collection.

use std::fmt;
use std::path::Path;

use bitflags::bitflags;

use crate::storage::ItemRecord;

/// Collection-local identity of an item.
///
/// Assigned when the item enters a collection and never reused by it, so a
/// restored item keeps the id it had before removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ItemId(u64);

impl ItemId {
    /// Id of an item that has not been added to a collection yet.
    pub const UNASSIGNED: ItemId = ItemId(0);

    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Status flags of an item. Not persisted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ItemFlags: u8 {
        /// The backing resource could not be located by the last resolution pass.
        const UNLINKED = 1 << 0;
        /// The path was rewritten by a resolution pass.
        const RELOCATED = 1 << 1;
    }
}

/// An entry of an ordered collection, keyed by its logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub(crate) id: ItemId,
    pub(crate) path: String,
    pub(crate) name: Option<String>,
    pub(crate) flags: ItemFlags,
}

impl Item {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            id: ItemId::UNASSIGNED,
            path: path.into(),
            name: None,
            flags: ItemFlags::empty(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The explicit name, or the last path component.
    pub fn display_name(&self) -> &str {
        if let Some(name) = self.name.as_deref() {
            return name;
        }
        Path::new(&self.path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.path)
    }

    pub fn flags(&self) -> ItemFlags {
        self.flags
    }

    pub fn is_unlinked(&self) -> bool {
        self.flags.contains(ItemFlags::UNLINKED)
    }

    pub(crate) fn to_record(&self) -> ItemRecord {
        ItemRecord {
            path: self.path.clone(),
            name: self.name.clone(),
        }
    }
}

impl From<ItemRecord> for Item {
    fn from(record: ItemRecord) -> Self {
        Self {
            id: ItemId::UNASSIGNED,
            path: record.path,
            name: record.name,
            flags: ItemFlags::empty(),
        }
    }
}

/// An item captured at removal together with its original position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memento {
    pub item: Item,
    pub index: usize,
}
