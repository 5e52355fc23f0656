#![allow(dead_code)]

use keeper_engine::{Store, Verifier, VersionManager};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A manager over a scratch data dir plus a scratch work dir.
pub struct Harness {
    pub dir: TempDir,
    pub manager: VersionManager,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Store::open(dir.path().join("data/keeper.db")).expect("Failed to open store");
        let manager = VersionManager::new(store, dir.path().join("data/versions"), Verifier::default())
            .expect("Failed to create manager");
        Harness { dir, manager }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write `content` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.path(relative);
        write_file(&path, content);
        path
    }
}

pub fn write_file(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().expect("path has a parent")).expect("Failed to create dir");
    fs::write(path, content).expect("Failed to write file");
}

pub fn set_mtime(path: &Path, secs: i64) {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(secs, 0))
        .expect("Failed to set mtime");
}
