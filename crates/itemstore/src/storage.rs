//! Storage layer for collections.
//!
//! - Atomic replace with optional backup, and backup-aware loading
//! - The versioned JSON document and its load-time fixups

mod atomic;
mod format;

pub use atomic::{
    backup_path, load_with_fallback, save_atomic, temp_path, Loaded, BACKUP_SUFFIX, TEMP_SUFFIX,
};
pub use format::{
    apply_fixups, read_document, write_document, Fixup, FormatMarker, FormatVersion, ItemRecord,
    CURRENT_VERSION, FIXUPS, FORMAT_NAME,
};
