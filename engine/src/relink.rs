//! Relink resolver.
//!
//! Re-associates tracked files whose recorded path no longer exists with
//! relocated copies found under a scan root:
//! 1. walk the root once, indexing candidates by file name (with optional
//!    extension, size and age filters)
//! 2. narrow each missing file's candidates to exact size matches, if any
//! 3. pick the first hash match (hash mode) or the nearest mtime
//! 4. write the new location and append a RELINK event

use crate::error::{KeeperError, Result};
use crate::manager::VersionManager;
use crate::model::{EventType, FileStatus, TrackedFile};
use crate::progress::{scaled_percent, Checkpoint};
use crate::verify::{modified_secs, system_time_to_secs};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SECONDS_PER_DAY: f64 = 86_400.0;
const BYTES_PER_MB: u64 = 1024 * 1024;

// Walk entries between checkpoints.
const WALK_CHECKPOINT_INTERVAL: usize = 256;

/// Scan parameters. Also the payload of a RELINK_SCAN job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelinkOptions {
    pub root_path: PathBuf,

    /// Confirm candidates by content hash when the file has a stored hash
    #[serde(default)]
    pub use_hash: bool,

    /// Extension allow-list without dots; empty means all
    #[serde(default)]
    pub exts: Vec<String>,

    /// Skip candidates larger than this many MiB
    #[serde(default)]
    pub max_size_mb: Option<u64>,

    /// Skip candidates not modified within this many days
    #[serde(default)]
    pub within_days: Option<u64>,
}

impl RelinkOptions {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        RelinkOptions {
            root_path: root_path.into(),
            ..Default::default()
        }
    }

    fn normalized_exts(&self) -> HashSet<String> {
        self.exts
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }
}

/// Aggregate counters of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelinkSummary {
    /// Missing files looked up
    pub checked: usize,
    pub relinked: usize,
    pub not_found: usize,

    /// Candidates admitted to the index
    pub scanned: usize,
    pub hash_checked: usize,
    pub size_filtered: usize,
    pub date_filtered: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    size: u64,
    mtime: f64,
}

pub struct RelinkResolver<'a> {
    manager: &'a VersionManager,
}

impl<'a> RelinkResolver<'a> {
    pub fn new(manager: &'a VersionManager) -> Self {
        RelinkResolver { manager }
    }

    /// Scan `options.root_path` and relink every missing file that has a
    /// suitable candidate. Stops early, returning the partial summary, when
    /// the checkpoint says so.
    pub fn run(&self, options: &RelinkOptions, checkpoint: &dyn Checkpoint) -> Result<RelinkSummary> {
        let root = &options.root_path;
        if !root.is_dir() {
            return Err(KeeperError::InvalidArgument(format!(
                "Root path is not a directory: {}",
                root.display()
            )));
        }

        let mut summary = RelinkSummary::default();
        checkpoint.report(10);

        let Some(index) = self.build_index(options, &mut summary, checkpoint) else {
            return Ok(summary);
        };
        checkpoint.report(50);

        let store = self.manager.store();
        let tracked = store.list_files(true)?;
        // Paths already owned by a tracked file, grown as files are relinked.
        let mut claimed: HashSet<PathBuf> = tracked.iter().map(|f| f.file_path.clone()).collect();
        let missing: Vec<TrackedFile> = tracked
            .into_iter()
            .filter(|f| !f.is_archived)
            .filter(|f| f.status == FileStatus::Missing || !f.file_path.exists())
            .collect();
        summary.checked = missing.len();

        for (i, file) in missing.iter().enumerate() {
            if !checkpoint.proceed() {
                info!(?summary, "relink scan stopped early");
                return Ok(summary);
            }

            let candidates: Vec<&Candidate> = file
                .file_path
                .file_name()
                .and_then(|name| index.get(name))
                .map(|list| {
                    list.iter()
                        .filter(|c| !claimed.contains(&c.path))
                        .collect()
                })
                .unwrap_or_default();

            match self.select(file, &candidates, options.use_hash, &mut summary) {
                Some((chosen, new_hash)) => match self.apply(file, chosen, new_hash.as_deref()) {
                    Ok(()) => {
                        claimed.insert(chosen.path.clone());
                        summary.relinked += 1;
                    }
                    Err(e) => {
                        warn!(file_id = %file.id, path = %chosen.path.display(), error = %e,
                            "relink failed");
                        summary.not_found += 1;
                    }
                },
                None => summary.not_found += 1,
            }
            checkpoint.report(scaled_percent(i + 1, missing.len(), 50, 99));
        }

        info!(
            checked = summary.checked,
            relinked = summary.relinked,
            not_found = summary.not_found,
            "relink scan finished"
        );
        Ok(summary)
    }

    fn apply(&self, file: &TrackedFile, chosen: &Candidate, new_hash: Option<&str>) -> Result<()> {
        self.manager
            .relink_file(&file.id, &chosen.path, chosen.size, chosen.mtime, new_hash)?;
        self.manager.store().append_event(
            &file.id,
            EventType::Relink,
            Some(&format!("Relinked to {}", chosen.path.display())),
        )?;
        Ok(())
    }

    /// Walk the root and index admissible files by name. `None` if stopped.
    fn build_index(
        &self,
        options: &RelinkOptions,
        summary: &mut RelinkSummary,
        checkpoint: &dyn Checkpoint,
    ) -> Option<HashMap<OsString, Vec<Candidate>>> {
        let exts = options.normalized_exts();
        let max_size = options
            .max_size_mb
            .filter(|mb| *mb > 0)
            .map(|mb| mb.saturating_mul(BYTES_PER_MB));
        let cutoff = options
            .within_days
            .filter(|days| *days > 0)
            .map(|days| system_time_to_secs(SystemTime::now()) - days as f64 * SECONDS_PER_DAY);

        let mut index: HashMap<OsString, Vec<Candidate>> = HashMap::new();
        let walker = WalkDir::new(&options.root_path)
            .follow_links(false)
            .sort_by_file_name();

        for (seen, entry) in walker.into_iter().enumerate() {
            if seen % WALK_CHECKPOINT_INTERVAL == 0 && !checkpoint.proceed() {
                return None;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during relink scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            if !exts.is_empty() {
                let ext = entry
                    .path()
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if !exts.contains(&ext) {
                    continue;
                }
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "cannot stat candidate");
                    continue;
                }
            };
            let size = metadata.len();
            let mtime = modified_secs(&metadata);

            if max_size.is_some_and(|max| size > max) {
                summary.size_filtered += 1;
                continue;
            }
            if cutoff.is_some_and(|cutoff| mtime < cutoff) {
                summary.date_filtered += 1;
                continue;
            }

            summary.scanned += 1;
            index
                .entry(entry.file_name().to_os_string())
                .or_default()
                .push(Candidate {
                    path: entry.into_path(),
                    size,
                    mtime,
                });
        }

        debug!(names = index.len(), candidates = summary.scanned, "relink index built");
        Some(index)
    }

    /// Choose a candidate for one missing file, with the hash to record.
    fn select<'c>(
        &self,
        file: &TrackedFile,
        candidates: &[&'c Candidate],
        use_hash: bool,
        summary: &mut RelinkSummary,
    ) -> Option<(&'c Candidate, Option<String>)> {
        let same_size: Vec<&Candidate> = candidates
            .iter()
            .copied()
            .filter(|c| c.size == file.file_size)
            .collect();
        let narrowed: &[&Candidate] = if same_size.is_empty() {
            candidates
        } else {
            &same_size
        };

        match (use_hash, file.file_hash.as_deref()) {
            (true, Some(stored)) => {
                let verifier = self.manager.verifier();
                for candidate in narrowed {
                    summary.hash_checked += 1;
                    match verifier.compute_file_hash(&candidate.path) {
                        Ok(hash) if hash == stored => {
                            return Some((*candidate, Some(hash)));
                        }
                        Ok(_) => {}
                        Err(e) => warn!(path = %candidate.path.display(), error = %e,
                            "cannot hash relink candidate"),
                    }
                }
                None
            }
            _ => narrowed
                .iter()
                .copied()
                .min_by(|a, b| {
                    let da = (a.mtime - file.modified_time).abs();
                    let db = (b.mtime - file.modified_time).abs();
                    da.total_cmp(&db)
                })
                .map(|c| (c, file.file_hash.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoCheckpoint;
    use crate::store::Store;
    use crate::verify::Verifier;
    use filetime::FileTime;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> VersionManager {
        let store = Store::open(dir.path().join("data/keeper.db")).expect("Failed to open store");
        VersionManager::new(store, dir.path().join("data/versions"), Verifier::default())
            .expect("Failed to create manager")
    }

    fn write_at(path: &Path, content: &[u8], mtime: i64) {
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create dir");
        fs::write(path, content).expect("Failed to write file");
        filetime::set_file_mtime(path, FileTime::from_unix_time(mtime, 0))
            .expect("Failed to set mtime");
    }

    /// Register `name` with the given content and mtime, then delete it.
    fn register_missing(dir: &TempDir, manager: &VersionManager, name: &str, content: &[u8], mtime: i64) -> TrackedFile {
        let path = dir.path().join("gone").join(name);
        write_at(&path, content, mtime);
        let (file, _) = manager.register(&path, "initial", None).expect("Failed to register");
        fs::remove_file(&path).expect("Failed to remove file");
        manager.verify_file(&file.id).expect("Failed to verify");
        file
    }

    #[test]
    fn test_nearest_mtime_wins() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manager = manager(&dir);
        let t = 1_600_000_000;
        let file = register_missing(&dir, &manager, "report.pdf", &[7u8; 500], t);

        let root = dir.path().join("scan");
        write_at(&root.join("new/report.pdf"), &[1u8; 500], t + 100);
        write_at(&root.join("old/report.pdf"), &[2u8; 500], t + 1);

        let summary = RelinkResolver::new(&manager)
            .run(&RelinkOptions::new(&root), &NoCheckpoint)
            .unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.relinked, 1);
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.hash_checked, 0);

        let relinked = manager.store().get_file(&file.id).unwrap().unwrap();
        assert_eq!(relinked.file_path, root.join("old/report.pdf"));
        assert_eq!(relinked.status, FileStatus::Ok);
        assert_eq!(relinked.modified_time, (t + 1) as f64);

        let events = manager.store().list_events(&file.id, None, false).unwrap();
        assert_eq!(events[0].event_type, EventType::Relink);
        assert!(events[0].description.as_deref().unwrap().starts_with("Relinked to "));
    }

    #[test]
    fn test_size_match_narrows_before_mtime() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manager = manager(&dir);
        let t = 1_600_000_000;
        let file = register_missing(&dir, &manager, "a.bin", &[0u8; 10], t);

        let root = dir.path().join("scan");
        write_at(&root.join("x/a.bin"), &[0u8; 11], t);
        write_at(&root.join("y/a.bin"), &[0u8; 10], t + 5000);

        RelinkResolver::new(&manager)
            .run(&RelinkOptions::new(&root), &NoCheckpoint)
            .unwrap();
        let relinked = manager.store().get_file(&file.id).unwrap().unwrap();
        assert_eq!(relinked.file_path, root.join("y/a.bin"));
    }

    #[test]
    fn test_hash_mode_takes_first_exact_match() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manager = manager(&dir);
        let t = 1_600_000_000;
        let file = register_missing(&dir, &manager, "doc.txt", b"the real one", t);

        let root = dir.path().join("scan");
        write_at(&root.join("a/doc.txt"), b"an impostor!", t);
        write_at(&root.join("b/doc.txt"), b"the real one", t + 900);
        write_at(&root.join("c/doc.txt"), b"the real one", t + 1);

        let options = RelinkOptions {
            use_hash: true,
            ..RelinkOptions::new(&root)
        };
        let summary = RelinkResolver::new(&manager).run(&options, &NoCheckpoint).unwrap();
        assert_eq!(summary.relinked, 1);
        assert_eq!(summary.hash_checked, 2);

        let relinked = manager.store().get_file(&file.id).unwrap().unwrap();
        assert_eq!(relinked.file_path, root.join("b/doc.txt"));
        assert_eq!(relinked.file_hash, file.file_hash);
    }

    #[test]
    fn test_filters_are_counted() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manager = manager(&dir);
        let now = system_time_to_secs(SystemTime::now()) as i64;
        register_missing(&dir, &manager, "big.mov", &[0u8; 16], now);

        let root = dir.path().join("scan");
        write_at(&root.join("big.mov"), &vec![0u8; 2 * BYTES_PER_MB as usize], now);
        write_at(&root.join("stale/big.mov"), &[0u8; 16], now - 30 * 86_400);
        write_at(&root.join("notes.txt"), b"skip by extension", now);

        let options = RelinkOptions {
            exts: vec![".MOV".to_string()],
            max_size_mb: Some(1),
            within_days: Some(7),
            ..RelinkOptions::new(&root)
        };
        let summary = RelinkResolver::new(&manager).run(&options, &NoCheckpoint).unwrap();
        assert_eq!(summary.size_filtered, 1);
        assert_eq!(summary.date_filtered, 1);
        assert_eq!(summary.scanned, 0);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.relinked, 0);
    }

    #[test]
    fn test_bad_root_is_rejected() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manager = manager(&dir);
        let err = RelinkResolver::new(&manager)
            .run(&RelinkOptions::new(dir.path().join("nope")), &NoCheckpoint)
            .unwrap_err();
        assert!(matches!(err, KeeperError::InvalidArgument(_)));
    }

    struct StopAfter {
        allowed: AtomicUsize,
    }

    impl Checkpoint for StopAfter {
        fn proceed(&self) -> bool {
            self.allowed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn report(&self, _percent: u8) {}
    }

    #[test]
    fn test_stopping_leaves_remaining_files_untouched() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manager = manager(&dir);
        let t = 1_600_000_000;
        register_missing(&dir, &manager, "one.txt", b"1", t);
        register_missing(&dir, &manager, "two.txt", b"2", t);

        let root = dir.path().join("scan");
        write_at(&root.join("one.txt"), b"1", t);
        write_at(&root.join("two.txt"), b"2", t);

        // One pass through the walk gate, one file, then stop.
        let gate = StopAfter {
            allowed: AtomicUsize::new(2),
        };
        let summary = RelinkResolver::new(&manager)
            .run(&RelinkOptions::new(&root), &gate)
            .unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.relinked, 1);
        assert_eq!(summary.not_found, 0);
    }
}
