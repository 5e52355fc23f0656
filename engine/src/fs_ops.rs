//! Filesystem operations module.
//!
//! This module provides the low-level operations used for backup artifacts:
//! - Copying files with timestamp and permission preservation
//! - Creating parent directories recursively
//! - Removing files and directories that may already be gone

use crate::error::{KeeperError, Result};
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;

/// Copy a file from source to destination with metadata preservation.
///
/// The destination is created or truncated. Access and modification times
/// and permission bits are carried over from the source.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| KeeperError::io(src, e))?;
    let src_metadata = src_file.metadata().map_err(|e| KeeperError::io(src, e))?;

    let mut dst_file = fs::File::create(dst).map_err(|e| KeeperError::io(dst, e))?;
    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            KeeperError::io(dst, e)
        } else {
            KeeperError::io(src, e)
        }
    })?;
    dst_file.sync_all().map_err(|e| KeeperError::io(dst, e))?;
    drop(dst_file);

    fs::set_permissions(dst, src_metadata.permissions()).map_err(|e| KeeperError::io(dst, e))?;

    let atime = FileTime::from_last_access_time(&src_metadata);
    let mtime = FileTime::from_last_modification_time(&src_metadata);
    filetime::set_file_times(dst, atime, mtime).map_err(|e| KeeperError::io(dst, e))?;

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(KeeperError::io(
            parent,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| KeeperError::io(parent, e))
        }
        Err(e) => Err(KeeperError::io(parent, e)),
    }
}

/// Delete a file; returns false if it was already absent.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(KeeperError::io(path, e)),
    }
}

/// Recursively delete a directory; returns false if it was already absent.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(KeeperError::io(path, e)),
    }
}

/// Remove a directory only if it has no entries left. Returns whether it
/// was removed.
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(KeeperError::io(path, e)),
    };
    if entries.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(path).map_err(|e| KeeperError::io(path, e))?;
    Ok(true)
}
