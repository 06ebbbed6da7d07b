//! Normalization of raw notify events for a single watched file.

use std::path::Path;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

/// What happened to the watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEvent {
    /// The file was created, written, or renamed into place.
    Changed,
    /// The file was removed or renamed away.
    Deleted,
}

/// Maps a raw notify event onto the watched file `bound`.
///
/// Returns `None` for events about other files and for access events. A
/// rename onto `bound` is a change, so another process doing
/// write-temp-then-rename is seen as an update rather than a delete.
pub fn classify_event(event: &Event, bound: &Path) -> Option<WatchEvent> {
    let file_name = bound.file_name()?;
    let matches = |path: &Path| path.file_name() == Some(file_name);

    match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .any(|path| matches(path.as_path()))
            .then_some(WatchEvent::Changed),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .any(|path| matches(path.as_path()))
            .then_some(WatchEvent::Deleted),
        EventKind::Modify(ModifyKind::Name(mode)) => {
            classify_rename(mode, &event.paths, bound, matches)
        }
        EventKind::Modify(_) => event
            .paths
            .iter()
            .any(|path| matches(path.as_path()))
            .then_some(WatchEvent::Changed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

fn classify_rename(
    mode: RenameMode,
    paths: &[std::path::PathBuf],
    bound: &Path,
    matches: impl Fn(&Path) -> bool,
) -> Option<WatchEvent> {
    match mode {
        RenameMode::From => paths
            .iter()
            .any(|path| matches(path.as_path()))
            .then_some(WatchEvent::Deleted),
        RenameMode::To => paths
            .iter()
            .any(|path| matches(path.as_path()))
            .then_some(WatchEvent::Changed),
        RenameMode::Both => {
            let from = paths.first().map(|path| matches(path.as_path())).unwrap_or(false);
            let to = paths.get(1).map(|path| matches(path.as_path())).unwrap_or(false);
            if to {
                Some(WatchEvent::Changed)
            } else if from {
                Some(WatchEvent::Deleted)
            } else {
                None
            }
        }
        // Direction unknown: the file's presence decides.
        RenameMode::Any | RenameMode::Other => {
            if !paths.iter().any(|path| matches(path.as_path())) {
                None
            } else if bound.exists() {
                Some(WatchEvent::Changed)
            } else {
                Some(WatchEvent::Deleted)
            }
        }
    }
}
