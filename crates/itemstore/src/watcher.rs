//! File watching for collection files.
//!
//! - notify-based watch of the containing directory
//! - normalization of raw events into `Changed` / `Deleted`

mod events;
mod handle;

pub use events::{classify_event, WatchEvent};
pub use handle::ChangeWatcher;
