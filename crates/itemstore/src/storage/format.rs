//! Serialized collection document and version-gated fixups.
//!
//! ```text
//! { "format": { "name": "itemstore.collection", "major": 1, "minor": 2, "patch": 0 },
//!   "items": [ { "path": "/music/a.flac", "name": "A" }, { "path": "/music/b.flac" } ] }
//! ```

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Format name stamped into every document.
pub const FORMAT_NAME: &str = "itemstore.collection";

/// Format version written by this build.
pub const CURRENT_VERSION: FormatVersion = FormatVersion::new(1, 2, 0);

/// A (major, minor, patch) triple, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FormatVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Format marker embedded in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatMarker {
    pub name: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FormatMarker {
    pub fn current() -> Self {
        Self {
            name: FORMAT_NAME.to_string(),
            major: CURRENT_VERSION.major,
            minor: CURRENT_VERSION.minor,
            patch: CURRENT_VERSION.patch,
        }
    }

    pub fn version(&self) -> FormatVersion {
        FormatVersion::new(self.major, self.minor, self.patch)
    }
}

/// One persisted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    format: FormatMarker,
    #[serde(default)]
    items: Vec<ItemRecord>,
}

// ---------------------------------------------------------------------------
// Fixups
// ---------------------------------------------------------------------------

/// A transform applied to documents older than `threshold`.
pub struct Fixup {
    pub threshold: FormatVersion,
    pub description: &'static str,
    pub apply: fn(&mut Vec<ItemRecord>),
}

/// Ordered by ascending threshold. New fixups are appended here.
pub const FIXUPS: &[Fixup] = &[
    Fixup {
        threshold: FormatVersion::new(1, 1, 0),
        description: "normalize file:// URIs to plain paths",
        apply: normalize_file_uris,
    },
    Fixup {
        threshold: FormatVersion::new(1, 2, 0),
        description: "drop blank display names",
        apply: drop_blank_names,
    },
];

/// Applies every fixup whose threshold is above `stored`, in order.
///
/// Returns how many fixups ran.
pub fn apply_fixups(stored: FormatVersion, records: &mut Vec<ItemRecord>) -> usize {
    let mut applied = 0;
    for fixup in FIXUPS.iter().filter(|fixup| stored < fixup.threshold) {
        log::debug!(
            "applying fixup for format < {}: {}",
            fixup.threshold,
            fixup.description
        );
        (fixup.apply)(records);
        applied += 1;
    }
    applied
}

fn normalize_file_uris(records: &mut Vec<ItemRecord>) {
    for record in records.iter_mut() {
        if let Some(rest) = record.path.strip_prefix("file://") {
            let rest = rest.strip_prefix("localhost").unwrap_or(rest);
            record.path = match urlencoding::decode(rest) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => rest.to_string(),
            };
        }
    }
}

fn drop_blank_names(records: &mut Vec<ItemRecord>) {
    for record in records.iter_mut() {
        if record.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            record.name = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Read / write
// ---------------------------------------------------------------------------

/// Writes `records` to `path`, stamped with the current format.
pub fn write_document(path: &Path, records: &[ItemRecord]) -> Result<()> {
    let document = Document {
        format: FormatMarker::current(),
        items: records.to_vec(),
    };
    let file = File::create(path).map_err(|error| StoreError::io(path, error))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &document)
        .map_err(|error| StoreError::serialization(path, error))?;
    writer
        .flush()
        .map_err(|error| StoreError::io(path, error))?;
    Ok(())
}

/// Reads the document at `path`, validating and upgrading its format.
pub fn read_document(path: &Path) -> Result<Vec<ItemRecord>> {
    let file = File::open(path).map_err(|error| StoreError::io(path, error))?;
    let document: Document = serde_json::from_reader(BufReader::new(file))
        .map_err(|error| StoreError::serialization(path, error))?;

    if document.format.name != FORMAT_NAME {
        return Err(StoreError::format(
            path,
            format!("unknown format name {:?}", document.format.name),
        ));
    }

    let stored = document.format.version();
    if stored.major > CURRENT_VERSION.major {
        return Err(StoreError::format(
            path,
            format!("format {stored} is newer than supported {CURRENT_VERSION}"),
        ));
    }

    let mut records = document.items;
    apply_fixups(stored, &mut records);
    Ok(records)
}
