//! Backup and pin artifact naming.
//!
//! Every tracked file owns one directory under the versions root, named by
//! its id. Inside it:
//! - canonical artifacts: `<stem>_v<N><ext>`
//! - legacy artifacts (read-only support): `v<N><ext>`
//!
//! Pinned copies live under the pin root as `<fileId>/<stem>_v<N>_pinned<ext>`.
//! Stem and extension always come from the file's current display name.

use std::path::{Path, PathBuf};

/// Split a display name into stem and extension (with its leading dot).
pub fn split_name(display_name: &str) -> (String, String) {
    let path = Path::new(display_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| display_name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// Resolves artifact paths under a versions root.
#[derive(Debug, Clone)]
pub struct BackupLayout {
    versions_root: PathBuf,
}

impl BackupLayout {
    pub fn new(versions_root: impl Into<PathBuf>) -> Self {
        BackupLayout {
            versions_root: versions_root.into(),
        }
    }

    pub fn versions_root(&self) -> &Path {
        &self.versions_root
    }

    /// Directory holding every artifact of one file.
    pub fn file_dir(&self, file_id: &str) -> PathBuf {
        self.versions_root.join(file_id)
    }

    pub fn canonical_path(&self, file_id: &str, display_name: &str, version_number: i64) -> PathBuf {
        let (stem, ext) = split_name(display_name);
        self.file_dir(file_id)
            .join(format!("{}_v{}{}", stem, version_number, ext))
    }

    pub fn legacy_path(&self, file_id: &str, display_name: &str, version_number: i64) -> PathBuf {
        let (_, ext) = split_name(display_name);
        self.file_dir(file_id).join(format!("v{}{}", version_number, ext))
    }

    /// Existing artifact for a version: canonical first, then legacy.
    pub fn find_existing(
        &self,
        file_id: &str,
        display_name: &str,
        version_number: i64,
    ) -> Option<PathBuf> {
        [
            self.canonical_path(file_id, display_name, version_number),
            self.legacy_path(file_id, display_name, version_number),
        ]
        .into_iter()
        .find(|p| p.is_file())
    }
}

/// Location of a pinned copy under `pin_root`.
pub fn pinned_path(pin_root: &Path, file_id: &str, display_name: &str, version_number: i64) -> PathBuf {
    let (stem, ext) = split_name(display_name);
    pin_root
        .join(file_id)
        .join(format!("{}_v{}_pinned{}", stem, version_number, ext))
}
