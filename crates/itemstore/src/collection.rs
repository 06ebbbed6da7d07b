//! Ordered, path-indexed collections.
//!
//! ## Module Structure
//!
//! - `item` - Items, ids, flags and removal mementos
//! - `data` - The sequence plus its path index (single mutation point)
//! - `reorder` - Grouped moves over a view subset
//! - `resolve` - Path resolvers for unlinked items
//! - `manager` - Main API (Collection): locking, persistence, reload

mod data;
mod item;
mod manager;
mod reorder;
mod resolve;

pub use item::{Item, ItemFlags, ItemId, Memento};
pub use manager::{Collection, CollectionStatus};
pub use reorder::MoveDirection;
pub use resolve::{FsResolver, PathResolver, ResolveProgress};
