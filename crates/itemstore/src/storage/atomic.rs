//! Crash-safe file replacement and backup-aware loading.
//!
//! A save to an existing destination always goes through `<path>.new.tmp`
//! followed by a rename, so the destination is either the previous
//! known-good file or the new one, never a partial write.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{sibling_path, Result, StoreError};

/// Suffix of the backup sibling kept when replacing a file.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Suffix of the in-flight temp sibling used during a save.
pub const TEMP_SUFFIX: &str = ".new.tmp";

pub fn backup_path(path: &Path) -> PathBuf {
    sibling_path(path, BACKUP_SUFFIX)
}

pub fn temp_path(path: &Path) -> PathBuf {
    sibling_path(path, TEMP_SUFFIX)
}

/// Result of a load that may have fallen back to the backup file.
#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    /// The primary file could not be read and `<path>.bak` was used instead.
    pub from_backup: bool,
}

/// Writes `path` through `serialize` without ever exposing a partial file.
///
/// If the destination does not exist yet, `serialize` writes it directly; a
/// failure there removes the partial file so it reads as "never saved".
/// Otherwise the data goes to the temp sibling, which is synced and renamed
/// over the destination. With `make_backup`, the previous destination is
/// copied to `<path>.bak` first. On any failure the temp file is removed and
/// the error returned.
pub fn save_atomic<F>(path: &Path, make_backup: bool, serialize: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| StoreError::io(parent, error))?;
    }

    if !path.exists() {
        let result = serialize(path).and_then(|_| sync_file(path));
        if result.is_err() {
            let _ = fs::remove_file(path);
        }
        return result;
    }

    let tmp_path = temp_path(path);
    // A leftover temp file from an interrupted save is stale by definition.
    if tmp_path.exists() {
        fs::remove_file(&tmp_path).map_err(|error| StoreError::io(&tmp_path, error))?;
    }

    let result = serialize(&tmp_path)
        .and_then(|_| sync_file(&tmp_path))
        .and_then(|_| {
            if make_backup {
                let bak_path = backup_path(path);
                fs::copy(path, &bak_path).map_err(|error| StoreError::io(&bak_path, error))?;
            }
            fs::rename(&tmp_path, path).map_err(|error| StoreError::io(path, error))
        });

    if let Err(error) = result {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "failed to remove temp file {}: {}",
                    tmp_path.display(),
                    cleanup
                );
            }
        }
        return Err(error);
    }

    log::debug!("replaced {} (backup={})", path.display(), make_backup);
    Ok(())
}

/// Reads `path` through `deserialize`, falling back to `<path>.bak`.
///
/// If both fail the primary error is returned.
pub fn load_with_fallback<T, F>(path: &Path, deserialize: F) -> Result<Loaded<T>>
where
    F: Fn(&Path) -> Result<T>,
{
    let primary_error = match deserialize(path) {
        Ok(value) => {
            return Ok(Loaded {
                value,
                from_backup: false,
            })
        }
        Err(error) => error,
    };

    let bak_path = backup_path(path);
    if !bak_path.exists() {
        return Err(primary_error);
    }

    match deserialize(&bak_path) {
        Ok(value) => {
            log::warn!(
                "failed to load {} ({}), using backup {}",
                path.display(),
                primary_error,
                bak_path.display()
            );
            Ok(Loaded {
                value,
                from_backup: true,
            })
        }
        Err(backup_error) => {
            log::warn!(
                "backup {} is unusable as well: {}",
                bak_path.display(),
                backup_error
            );
            Err(primary_error)
        }
    }
}

fn sync_file(path: &Path) -> Result<()> {
    File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.sync_all())
        .map_err(|error| StoreError::io(path, error))
}
