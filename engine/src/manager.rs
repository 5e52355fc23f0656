//! Version/backup lifecycle.
//!
//! `VersionManager` ties the metadata store, the verifier and the backup
//! layout together:
//! - register / commit / restore / delete
//! - pin and unpin into a separate pin-storage root
//! - legacy artifact migration and backup integrity audits
//! - shell and probe collaborators for open/reveal and media metadata
//!
//! The manager exclusively owns the versions root and the pin root.

use crate::checksums::VerificationResult;
use crate::error::{KeeperError, Result};
use crate::fs_ops;
use crate::layout::{self, BackupLayout};
use crate::model::{FileStatus, Tag, TrackedFile, Version};
use crate::probe::MetadataProbe;
use crate::shell::{ShellOpener, SystemShell};
use crate::store::Store;
use crate::verify::Verifier;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Make a path absolute against the working directory without touching
/// the filesystem.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(|e| KeeperError::io(path, e))?;
    Ok(cwd.join(path))
}

/// Move renamed artifacts back to their old names, newest move first.
fn rollback_renames(moved: &[(PathBuf, PathBuf)]) {
    for (from, to) in moved.iter().rev() {
        if let Err(e) = fs::rename(to, from) {
            warn!(path = %to.display(), error = %e, "cannot roll back artifact rename");
        }
    }
}

pub struct VersionManager {
    store: Store,
    verifier: Verifier,
    layout: BackupLayout,
    pin_root: RwLock<Option<PathBuf>>,
    shell: Arc<dyn ShellOpener>,
    probes: Vec<Arc<dyn MetadataProbe>>,
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionManager")
            .field("store", &self.store)
            .field("verifier", &self.verifier)
            .field("layout", &self.layout)
            .field("pin_root", &*self.pin_root.read())
            .finish_non_exhaustive()
    }
}

impl VersionManager {
    /// Create a manager writing backups under `versions_root`.
    pub fn new(store: Store, versions_root: impl Into<PathBuf>, verifier: Verifier) -> Result<Self> {
        let versions_root = versions_root.into();
        fs::create_dir_all(&versions_root).map_err(|e| KeeperError::io(&versions_root, e))?;
        Ok(VersionManager {
            store,
            verifier,
            layout: BackupLayout::new(versions_root),
            pin_root: RwLock::new(None),
            shell: Arc::new(SystemShell),
            probes: Vec::new(),
        })
    }

    pub fn with_shell(mut self, shell: Arc<dyn ShellOpener>) -> Self {
        self.shell = shell;
        self
    }

    /// Add a metadata probe. The first probe supporting an extension wins.
    pub fn with_probe(mut self, probe: Arc<dyn MetadataProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    /// Set or clear the pin-storage root, creating the directory.
    pub fn set_pin_storage_path(&self, path: Option<PathBuf>) -> Result<()> {
        if let Some(path) = &path {
            fs::create_dir_all(path).map_err(|e| KeeperError::io(path, e))?;
        }
        *self.pin_root.write() = path;
        Ok(())
    }

    pub fn pin_storage_path(&self) -> Option<PathBuf> {
        self.pin_root.read().clone()
    }

    fn require_file(&self, file_id: &str) -> Result<TrackedFile> {
        self.store
            .get_file(file_id)?
            .ok_or_else(|| KeeperError::not_found("file", file_id))
    }

    fn require_version(&self, file_id: &str, version_number: i64) -> Result<Version> {
        self.store
            .get_version(file_id, version_number)?
            .ok_or_else(|| {
                KeeperError::not_found("version", format!("{} v{}", file_id, version_number))
            })
    }

    fn require_backup(&self, file: &TrackedFile, version_number: i64) -> Result<PathBuf> {
        self.layout
            .find_existing(&file.id, &file.display_name, version_number)
            .ok_or_else(|| {
                KeeperError::not_found("backup", format!("{} v{}", file.id, version_number))
            })
    }

    fn write_backup(&self, source: &Path, file: &TrackedFile, version_number: i64) -> Result<PathBuf> {
        let target = self
            .layout
            .canonical_path(&file.id, &file.display_name, version_number);
        fs_ops::copy_file_with_metadata(source, &target)?;
        debug!(file_id = %file.id, version_number, target = %target.display(), "backup written");
        Ok(target)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start tracking a file: record it, create version 1 and back it up.
    pub fn register(
        &self,
        path: &Path,
        commit_message: &str,
        display_name: Option<&str>,
    ) -> Result<(TrackedFile, Version)> {
        let path = absolute_path(path)?;
        if commit_message.trim().is_empty() {
            return Err(KeeperError::InvalidArgument(
                "commit message must not be empty".to_string(),
            ));
        }

        let state = self.verifier.get_file_state(&path, true)?;
        if !state.exists {
            return Err(KeeperError::Missing { path });
        }
        if self.store.get_file_by_path(&path)?.is_some() {
            return Err(KeeperError::AlreadyTracked { path });
        }

        let display_name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| path.display().to_string());

        let file = self
            .store
            .create_file(
                &display_name,
                &path,
                state.file_size,
                state.modified_time,
                state.file_hash.as_deref(),
            )
            .map_err(|e| match e {
                KeeperError::Constraint(_) => KeeperError::AlreadyTracked { path: path.clone() },
                other => other,
            })?;

        let created = self
            .store
            .create_version(
                &file.id,
                commit_message,
                state.file_size,
                state.modified_time,
                state.file_hash.as_deref(),
            )
            .and_then(|version| {
                self.write_backup(&path, &file, version.version_number)?;
                Ok(version)
            });

        match created {
            Ok(version) => {
                info!(file_id = %file.id, path = %path.display(), "file registered");
                Ok((file, version))
            }
            Err(e) => {
                if let Err(cleanup) = self.discard_file(&file.id) {
                    warn!(file_id = %file.id, error = %cleanup, "cleanup after failed register");
                }
                Err(e)
            }
        }
    }

    fn discard_file(&self, file_id: &str) -> Result<()> {
        fs_ops::remove_dir_all_if_exists(&self.layout.file_dir(file_id))?;
        self.store.delete_file(file_id)
    }

    /// Undo a version whose backup failed: drop any partial artifact and
    /// the row, so the number is reused.
    fn discard_version(&self, file: &TrackedFile, version_number: i64) {
        let target = self
            .layout
            .canonical_path(&file.id, &file.display_name, version_number);
        if target.is_file() {
            if let Err(e) = fs_ops::remove_file_if_exists(&target) {
                warn!(file_id = %file.id, error = %e, "cannot remove partial backup");
            }
        }
        if let Err(e) = self.store.delete_version(&file.id, version_number) {
            warn!(file_id = %file.id, version_number, error = %e, "cleanup after failed commit");
        }
    }

    /// Snapshot the current content of a tracked file as a new version.
    pub fn commit(&self, file_id: &str, commit_message: &str) -> Result<Version> {
        let file = self.require_file(file_id)?;
        if commit_message.trim().is_empty() {
            return Err(KeeperError::InvalidArgument(
                "commit message must not be empty".to_string(),
            ));
        }

        let state = self.verifier.get_file_state(&file.file_path, true)?;
        if !state.exists {
            return Err(KeeperError::Missing {
                path: file.file_path,
            });
        }

        let version = self.store.create_version(
            file_id,
            commit_message,
            state.file_size,
            state.modified_time,
            state.file_hash.as_deref(),
        )?;
        if let Err(e) = self.write_backup(&file.file_path, &file, version.version_number) {
            self.discard_version(&file, version.version_number);
            return Err(e);
        }
        self.store.update_file_metadata(
            file_id,
            state.file_size,
            state.modified_time,
            FileStatus::Ok,
            state.file_hash.as_deref(),
        )?;

        info!(file_id, version_number = version.version_number, "version created");
        Ok(version)
    }

    /// Existing backup artifact of a version, canonical name first.
    pub fn backup_path(&self, file_id: &str, version_number: i64) -> Result<Option<PathBuf>> {
        let Some(file) = self.store.get_file(file_id)? else {
            return Ok(None);
        };
        Ok(self
            .layout
            .find_existing(&file.id, &file.display_name, version_number))
    }

    /// Copy a version's backup over the live file and mark it OK.
    pub fn restore(&self, file_id: &str, version_number: i64) -> Result<()> {
        let file = self.require_file(file_id)?;
        let version = self.require_version(file_id, version_number)?;
        let backup = self.require_backup(&file, version_number)?;

        fs_ops::copy_file_with_metadata(&backup, &file.file_path)?;

        let state = self.verifier.get_file_state(&file.file_path, false)?;
        self.store.update_file_metadata(
            file_id,
            state.file_size,
            state.modified_time,
            FileStatus::Ok,
            version.file_hash.as_deref(),
        )?;

        info!(file_id, version_number, "version restored");
        Ok(())
    }

    /// Remove every backup artifact and every row of a file.
    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        self.require_file(file_id)?;
        fs_ops::remove_dir_all_if_exists(&self.layout.file_dir(file_id))?;
        self.store.delete_file(file_id)?;
        info!(file_id, "file deleted");
        Ok(())
    }

    /// Rename a file and move its existing artifacts to the new stem.
    pub fn rename_file(&self, file_id: &str, display_name: &str) -> Result<()> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(KeeperError::InvalidArgument(
                "display name must not be empty".to_string(),
            ));
        }
        let file = self.require_file(file_id)?;
        if file.display_name == display_name {
            return Ok(());
        }

        let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
        for version in self.store.list_versions(file_id)? {
            let n = version.version_number;
            let Some(current) = self.layout.find_existing(file_id, &file.display_name, n) else {
                continue;
            };
            let target = self.layout.canonical_path(file_id, display_name, n);
            if current == target {
                continue;
            }
            if let Err(e) = fs::rename(&current, &target) {
                rollback_renames(&moved);
                return Err(KeeperError::io(&current, e));
            }
            moved.push((current, target));
        }

        if let Err(e) = self.store.update_display_name(file_id, display_name) {
            rollback_renames(&moved);
            return Err(e);
        }
        info!(file_id, display_name, "file renamed");
        Ok(())
    }

    /// Point a file at a relocated path and mark it OK.
    ///
    /// Emitting the RELINK event is left to the caller.
    pub fn relink_file(
        &self,
        file_id: &str,
        new_path: &Path,
        file_size: u64,
        modified_time: f64,
        file_hash: Option<&str>,
    ) -> Result<()> {
        self.store.update_file_location(
            file_id,
            new_path,
            file_size,
            modified_time,
            FileStatus::Ok,
            file_hash,
        )?;
        info!(file_id, path = %new_path.display(), "file relinked");
        Ok(())
    }

    /// Upgrade legacy artifact names and synthesize a missing backup of the
    /// latest version from the live file. Per-file failures are logged and
    /// skipped. Returns the number of artifacts migrated or created.
    pub fn migrate_existing_files(&self) -> Result<usize> {
        let mut migrated = 0;
        for file in self.store.list_files(true)? {
            let versions = self.store.list_versions(&file.id)?;
            let latest = versions.iter().map(|v| v.version_number).max();

            for version in &versions {
                let n = version.version_number;
                let canonical = self.layout.canonical_path(&file.id, &file.display_name, n);
                if canonical.is_file() {
                    continue;
                }

                let legacy = self.layout.legacy_path(&file.id, &file.display_name, n);
                if legacy.is_file() {
                    match fs::rename(&legacy, &canonical) {
                        Ok(()) => migrated += 1,
                        Err(e) => warn!(file_id = %file.id, version_number = n, error = %e,
                            "could not rename legacy backup"),
                    }
                    continue;
                }

                if Some(n) == latest && file.file_path.is_file() {
                    match self.write_backup(&file.file_path, &file, n) {
                        Ok(_) => migrated += 1,
                        Err(e) => warn!(file_id = %file.id, version_number = n, error = %e,
                            "could not synthesize backup"),
                    }
                }
            }
        }
        if migrated > 0 {
            info!(migrated, "backup artifacts migrated");
        }
        Ok(migrated)
    }

    // ── Verification ────────────────────────────────────────────────

    /// Classify a file, persist the status and backfill a missing hash.
    pub fn verify_file(&self, file_id: &str) -> Result<FileStatus> {
        let file = self.require_file(file_id)?;
        let status = self.verifier.check_file_status(&file)?;

        if file.file_hash.is_none() && status != FileStatus::Missing {
            match self.verifier.compute_file_hash(&file.file_path) {
                Ok(hash) => {
                    self.store.update_file_metadata(
                        file_id,
                        file.file_size,
                        file.modified_time,
                        status,
                        Some(&hash),
                    )?;
                    return Ok(status);
                }
                Err(e) => warn!(file_id, error = %e, "hash backfill failed"),
            }
        }

        if status != file.status {
            self.store.update_file_status(file_id, status)?;
        }
        Ok(status)
    }

    /// Check a version's backup artifact against its stored hash.
    pub fn verify_version_integrity(
        &self,
        file_id: &str,
        version_number: i64,
    ) -> Result<VerificationResult> {
        let Some(version) = self.store.get_version(file_id, version_number)? else {
            return Ok(VerificationResult::failed(None, "Version not found"));
        };
        let Some(expected) = version.file_hash else {
            return Ok(VerificationResult::failed(None, "No hash stored for this version"));
        };
        let Some(backup) = self.backup_path(file_id, version_number)? else {
            return Ok(VerificationResult::failed(Some(expected), "Backup file not found"));
        };
        Ok(self.verifier.verify_file_hash(&backup, &expected))
    }

    pub fn verify_all_versions(&self, file_id: &str) -> Result<BTreeMap<i64, VerificationResult>> {
        let mut results = BTreeMap::new();
        for version in self.store.list_versions(file_id)? {
            let n = version.version_number;
            results.insert(n, self.verify_version_integrity(file_id, n)?);
        }
        Ok(results)
    }

    // ── Pinning ─────────────────────────────────────────────────────

    /// Copy a version's backup into pin storage and record the path.
    pub fn pin(&self, file_id: &str, version_number: i64) -> Result<PathBuf> {
        let pin_root = self.pin_storage_path().ok_or_else(|| {
            KeeperError::Configuration("pin storage path is not set".to_string())
        })?;
        let file = self.require_file(file_id)?;
        self.require_version(file_id, version_number)?;
        let backup = self.require_backup(&file, version_number)?;

        let target = layout::pinned_path(&pin_root, file_id, &file.display_name, version_number);
        fs_ops::copy_file_with_metadata(&backup, &target)?;
        self.store
            .set_version_pinned(file_id, version_number, Some(&target))?;

        info!(file_id, version_number, path = %target.display(), "version pinned");
        Ok(target)
    }

    /// Delete a pinned copy, drop its directory if left empty and clear the
    /// pin. Returns false when the version was not pinned.
    pub fn unpin(&self, file_id: &str, version_number: i64) -> Result<bool> {
        let version = self.require_version(file_id, version_number)?;
        if !version.is_pinned {
            return Ok(false);
        }

        if let Some(pinned) = &version.pinned_path {
            fs_ops::remove_file_if_exists(pinned)?;
            if let Some(dir) = pinned.parent() {
                fs_ops::remove_dir_if_empty(dir)?;
            }
        }
        self.store.set_version_pinned(file_id, version_number, None)?;

        info!(file_id, version_number, "version unpinned");
        Ok(true)
    }

    /// Pin if unpinned, unpin if pinned. Returns the pinned path when the
    /// version ends up pinned.
    pub fn toggle_pin(&self, file_id: &str, version_number: i64) -> Result<Option<PathBuf>> {
        let version = self.require_version(file_id, version_number)?;
        if version.is_pinned {
            self.unpin(file_id, version_number)?;
            Ok(None)
        } else {
            self.pin(file_id, version_number).map(Some)
        }
    }

    pub fn pinned_versions(&self, file_id: Option<&str>) -> Result<Vec<Version>> {
        self.store.list_pinned_versions(file_id)
    }

    // ── Tags ────────────────────────────────────────────────────────

    pub fn add_tag(&self, file_id: &str, name: &str) -> Result<Tag> {
        self.store.add_tag_to_file(file_id, name)
    }

    pub fn remove_tag(&self, file_id: &str, name: &str) -> Result<bool> {
        self.store.remove_tag_from_file(file_id, name)
    }

    pub fn file_tags(&self, file_id: &str) -> Result<Vec<Tag>> {
        self.store.list_file_tags(file_id)
    }

    // ── Metadata ────────────────────────────────────────────────────

    /// Collect base facts about the live file, merge in probe output when a
    /// probe is available for the extension, and store the result.
    pub fn extract_metadata(&self, file_id: &str) -> Result<Map<String, Value>> {
        let file = self.require_file(file_id)?;
        if !file.file_path.exists() {
            return Err(KeeperError::Missing {
                path: file.file_path,
            });
        }

        let extension = file
            .file_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let mut meta = Map::new();
        meta.insert("file_size".to_string(), Value::from(file.file_size));
        meta.insert("modified_time".to_string(), Value::from(file.modified_time));
        meta.insert("extension".to_string(), Value::from(extension.clone()));

        if let Some(probe) = self.probes.iter().find(|p| p.supports(&extension)) {
            if probe.is_available() {
                if let Some(extra) = probe.probe(&file.file_path) {
                    meta.extend(extra);
                }
            } else {
                debug!(file_id, "metadata probe unavailable");
            }
        }

        self.store.set_metadata(file_id, &meta)?;
        Ok(meta)
    }

    // ── Shell ───────────────────────────────────────────────────────

    pub fn open_file(&self, file_id: &str, app: Option<&Path>) -> Result<()> {
        let file = self.require_file(file_id)?;
        if !file.file_path.exists() {
            return Err(KeeperError::Missing {
                path: file.file_path,
            });
        }
        self.shell.open(&file.file_path, app)
    }

    pub fn reveal_file(&self, file_id: &str) -> Result<()> {
        let file = self.require_file(file_id)?;
        if !file.file_path.exists() {
            return Err(KeeperError::Missing {
                path: file.file_path,
            });
        }
        self.shell.reveal(&file.file_path)
    }

    pub fn open_version(&self, file_id: &str, version_number: i64) -> Result<()> {
        let file = self.require_file(file_id)?;
        let backup = self.require_backup(&file, version_number)?;
        self.shell.open(&backup, None)
    }

    pub fn reveal_version(&self, file_id: &str, version_number: i64) -> Result<()> {
        let file = self.require_file(file_id)?;
        let backup = self.require_backup(&file, version_number)?;
        self.shell.reveal(&backup)
    }

    pub fn reveal_pinned_version(&self, file_id: &str, version_number: i64) -> Result<()> {
        let version = self.require_version(file_id, version_number)?;
        match version.pinned_path {
            Some(path) if path.exists() => self.shell.reveal(&path),
            Some(path) => Err(KeeperError::Missing { path }),
            None => Err(KeeperError::not_found(
                "pinned version",
                format!("{} v{}", file_id, version_number),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ImageProbe;
    use crate::store::Store;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        manager: VersionManager,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let store = Store::open(dir.path().join("data/keeper.db")).expect("Failed to open store");
            let manager = VersionManager::new(store, dir.path().join("data/versions"), Verifier::default())
                .expect("Failed to create manager");
            Fixture { dir, manager }
        }

        fn write(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.dir.path().join("work").join(name);
            fs::create_dir_all(path.parent().unwrap()).expect("Failed to create work dir");
            fs::write(&path, content).expect("Failed to write file");
            path
        }
    }

    #[derive(Default)]
    struct RecordingShell {
        calls: Mutex<Vec<(String, PathBuf)>>,
    }

    impl ShellOpener for RecordingShell {
        fn open(&self, path: &Path, _app: Option<&Path>) -> Result<()> {
            self.calls.lock().push(("open".to_string(), path.to_path_buf()));
            Ok(())
        }

        fn reveal(&self, path: &Path) -> Result<()> {
            self.calls.lock().push(("reveal".to_string(), path.to_path_buf()));
            Ok(())
        }
    }

    #[test]
    fn test_register_creates_version_one_and_backup() {
        let fx = Fixture::new();
        let path = fx.write("report.txt", b"hello");

        let (file, version) = fx.manager.register(&path, "initial", None).unwrap();
        assert_eq!(file.display_name, "report.txt");
        assert_eq!(version.version_number, 1);
        assert!(file.file_hash.is_some());

        let backup = fx.manager.backup_path(&file.id, 1).unwrap().expect("backup exists");
        assert!(backup.ends_with(format!("{}/report_v1.txt", file.id)));
        assert_eq!(fs::read(backup).unwrap(), b"hello");
    }

    #[test]
    fn test_register_rejects_missing_and_duplicate() {
        let fx = Fixture::new();
        let missing = fx.dir.path().join("nope.txt");
        assert!(matches!(
            fx.manager.register(&missing, "msg", None),
            Err(KeeperError::Missing { .. })
        ));

        let path = fx.write("a.txt", b"a");
        fx.manager.register(&path, "msg", None).unwrap();
        assert!(matches!(
            fx.manager.register(&path, "again", None),
            Err(KeeperError::AlreadyTracked { .. })
        ));
    }

    #[test]
    fn test_commit_updates_mirror_and_fails_when_missing() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();

        fs::write(&path, b"two two").unwrap();
        let v2 = fx.manager.commit(&file.id, "v2").unwrap();
        assert_eq!(v2.version_number, 2);

        let updated = fx.manager.store().get_file(&file.id).unwrap().unwrap();
        assert_eq!(updated.file_size, 7);
        assert_eq!(updated.file_hash, v2.file_hash);
        assert_eq!(updated.status, FileStatus::Ok);

        fs::remove_file(&path).unwrap();
        assert!(matches!(
            fx.manager.commit(&file.id, "v3"),
            Err(KeeperError::Missing { .. })
        ));
        assert_eq!(fx.manager.store().next_version_number(&file.id).unwrap(), 3);
    }

    #[test]
    fn test_restore_without_backup_fails() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();
        fs::remove_dir_all(fx.manager.layout().file_dir(&file.id)).unwrap();

        let err = fx.manager.restore(&file.id, 1).unwrap_err();
        assert!(err.is_not_found());
        assert!(fx.manager.restore("ghost", 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_pin_requires_configuration() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();
        assert!(matches!(
            fx.manager.pin(&file.id, 1),
            Err(KeeperError::Configuration(_))
        ));
    }

    #[test]
    fn test_unpin_keeps_directory_with_other_pins() {
        let fx = Fixture::new();
        let pins = fx.dir.path().join("pins");
        fx.manager.set_pin_storage_path(Some(pins.clone())).unwrap();
        let path = fx.write("a.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();
        fs::write(&path, b"two").unwrap();
        fx.manager.commit(&file.id, "v2").unwrap();

        let p1 = fx.manager.pin(&file.id, 1).unwrap();
        let p2 = fx.manager.toggle_pin(&file.id, 2).unwrap().expect("pinned");
        assert_eq!(fx.manager.pinned_versions(Some(&file.id)).unwrap().len(), 2);

        assert!(fx.manager.unpin(&file.id, 1).unwrap());
        assert!(!p1.exists());
        assert!(p2.exists());
        assert!(pins.join(&file.id).is_dir());

        assert_eq!(fx.manager.toggle_pin(&file.id, 2).unwrap(), None);
        assert!(!pins.join(&file.id).exists());
        assert!(!fx.manager.unpin(&file.id, 2).unwrap());
    }

    #[test]
    fn test_delete_removes_backups_and_rows() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();
        let dir = fx.manager.layout().file_dir(&file.id);
        assert!(dir.exists());

        fx.manager.delete_file(&file.id).unwrap();
        assert!(!dir.exists());
        assert!(fx.manager.store().get_file(&file.id).unwrap().is_none());
        assert!(path.exists(), "the live file is never touched");
    }

    #[test]
    fn test_rename_moves_artifacts() {
        let fx = Fixture::new();
        let path = fx.write("draft.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();

        fx.manager.rename_file(&file.id, "final.txt").unwrap();
        let backup = fx.manager.backup_path(&file.id, 1).unwrap().expect("backup found");
        assert_eq!(backup.file_name().unwrap(), "final_v1.txt");
        assert_eq!(
            fx.manager.store().get_file(&file.id).unwrap().unwrap().display_name,
            "final.txt"
        );
    }

    #[test]
    fn test_failed_rename_restores_moved_artifacts() {
        let fx = Fixture::new();
        let path = fx.write("draft.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();
        for content in [&b"two"[..], &b"three"[..]] {
            fs::write(&path, content).unwrap();
            fx.manager.commit(&file.id, "next").unwrap();
        }

        // v3 and v2 move first; v1 then collides with a directory.
        let blocker = fx.manager.layout().canonical_path(&file.id, "final.txt", 1);
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        assert!(fx.manager.rename_file(&file.id, "final.txt").is_err());
        assert_eq!(
            fx.manager.store().get_file(&file.id).unwrap().unwrap().display_name,
            "draft.txt"
        );
        for n in 1..=3 {
            let backup = fx.manager.backup_path(&file.id, n).unwrap().expect("backup found");
            assert_eq!(backup.file_name().unwrap().to_string_lossy(), format!("draft_v{}.txt", n));
        }
    }

    #[test]
    fn test_failed_backup_drops_the_version() {
        let fx = Fixture::new();
        let path = fx.write("notes.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();
        fs::write(&path, b"two").unwrap();

        let blocker = fx.manager.layout().canonical_path(&file.id, "notes.txt", 2);
        fs::create_dir_all(&blocker).unwrap();
        assert!(fx.manager.commit(&file.id, "v2").is_err());
        assert_eq!(fx.manager.store().list_versions(&file.id).unwrap().len(), 1);
        assert!(blocker.is_dir());

        fs::remove_dir(&blocker).unwrap();
        let version = fx.manager.commit(&file.id, "v2").unwrap();
        assert_eq!(version.version_number, 2);
        assert_eq!(fs::read(blocker).unwrap(), b"two");
    }

    #[test]
    fn test_extract_metadata_uses_image_probe() {
        let Fixture { dir, manager } = Fixture::new();
        let fx = Fixture {
            dir,
            manager: manager.with_probe(Arc::new(ImageProbe)),
        };
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&13u32.to_be_bytes());
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&32u32.to_be_bytes());
        png.extend_from_slice(&16u32.to_be_bytes());
        png.extend_from_slice(&[8, 6, 0, 0, 0, 0, 0, 0, 0]);
        let path = fx.write("icon.png", &png);
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();

        let meta = fx.manager.extract_metadata(&file.id).unwrap();
        assert_eq!(meta["extension"], ".png");
        assert_eq!(meta["width"], 32);
        assert_eq!(meta["height"], 16);
        assert_eq!(meta["type"], "image");
    }

    #[test]
    fn test_verify_file_backfills_hash_and_status() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();
        fx.manager
            .store()
            .update_file_metadata(&file.id, file.file_size, file.modified_time, FileStatus::Ok, None)
            .unwrap();

        assert_eq!(fx.manager.verify_file(&file.id).unwrap(), FileStatus::Ok);
        let reloaded = fx.manager.store().get_file(&file.id).unwrap().unwrap();
        assert_eq!(reloaded.file_hash, file.file_hash);

        fs::remove_file(&path).unwrap();
        assert_eq!(fx.manager.verify_file(&file.id).unwrap(), FileStatus::Missing);
        let reloaded = fx.manager.store().get_file(&file.id).unwrap().unwrap();
        assert_eq!(reloaded.status, FileStatus::Missing);
    }

    #[test]
    fn test_version_integrity_reasons() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();

        assert!(fx.manager.verify_version_integrity(&file.id, 1).unwrap().is_valid);

        let missing = fx.manager.verify_version_integrity(&file.id, 5).unwrap();
        assert_eq!(missing.error.as_deref(), Some("Version not found"));

        let backup = fx.manager.backup_path(&file.id, 1).unwrap().unwrap();
        fs::write(&backup, b"tampered").unwrap();
        let results = fx.manager.verify_all_versions(&file.id).unwrap();
        assert_eq!(results[&1].error.as_deref(), Some("Hash mismatch"));

        fs::remove_file(&backup).unwrap();
        let gone = fx.manager.verify_version_integrity(&file.id, 1).unwrap();
        assert_eq!(gone.error.as_deref(), Some("Backup file not found"));
    }

    #[test]
    fn test_migrate_existing_files() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"one");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();
        fs::write(&path, b"two").unwrap();
        fx.manager.commit(&file.id, "v2").unwrap();

        let layout = fx.manager.layout();
        let v1 = layout.canonical_path(&file.id, "a.txt", 1);
        fs::rename(&v1, layout.legacy_path(&file.id, "a.txt", 1)).unwrap();
        fs::remove_file(layout.canonical_path(&file.id, "a.txt", 2)).unwrap();

        assert_eq!(fx.manager.migrate_existing_files().unwrap(), 2);
        assert_eq!(fs::read(&v1).unwrap(), b"one");
        assert_eq!(fs::read(layout.canonical_path(&file.id, "a.txt", 2)).unwrap(), b"two");
        assert_eq!(fx.manager.migrate_existing_files().unwrap(), 0);
    }

    #[test]
    fn test_shell_delegation() {
        let fx = Fixture::new();
        let shell = Arc::new(RecordingShell::default());
        let dir = fx.dir.path().to_path_buf();
        let Fixture { manager, dir: _keep } = fx;
        let manager = manager.with_shell(shell.clone());

        let path = dir.join("work/a.txt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"one").unwrap();
        let (file, _) = manager.register(&path, "v1", None).unwrap();

        manager.open_file(&file.id, None).unwrap();
        manager.reveal_version(&file.id, 1).unwrap();
        assert!(manager.reveal_pinned_version(&file.id, 1).unwrap_err().is_not_found());

        let calls = shell.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ("open".to_string(), path));
        assert_eq!(calls[1].0, "reveal");
    }

    #[test]
    fn test_extract_metadata_base_facts() {
        let fx = Fixture::new();
        let path = fx.write("clip.TXT", b"12345");
        let (file, _) = fx.manager.register(&path, "v1", None).unwrap();

        let meta = fx.manager.extract_metadata(&file.id).unwrap();
        assert_eq!(meta["file_size"], 5);
        assert_eq!(meta["extension"], ".txt");
        assert_eq!(fx.manager.store().get_metadata(&file.id).unwrap(), meta);
    }
}
