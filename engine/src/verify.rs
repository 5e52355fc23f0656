//! Change detection for tracked files.
//!
//! Classification is two-stage: a stat comparison (size + mtime) settles the
//! common case, and the content hash is only computed when the stat values
//! disagree with the recorded snapshot.

use crate::checksums::{self, ChecksumAlgorithm, VerificationResult};
use crate::error::{KeeperError, Result};
use crate::model::{FileStatus, TrackedFile};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// What is on disk right now at a path.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskState {
    pub exists: bool,
    pub file_size: u64,

    /// Seconds since the Unix epoch
    pub modified_time: f64,
    pub file_hash: Option<String>,
}

impl DiskState {
    pub fn missing() -> Self {
        DiskState {
            exists: false,
            file_size: 0,
            modified_time: 0.0,
            file_hash: None,
        }
    }
}

/// Convert a `SystemTime` into fractional seconds since the epoch.
pub fn system_time_to_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Read the modification time of already-fetched metadata.
pub fn modified_secs(metadata: &fs::Metadata) -> f64 {
    metadata.modified().map(system_time_to_secs).unwrap_or(0.0)
}

/// Hashing and classification with one installation-wide algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    algorithm: ChecksumAlgorithm,
}

impl Verifier {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Verifier { algorithm }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Hex digest of the whole file.
    pub fn compute_file_hash(&self, path: &Path) -> Result<String> {
        Ok(checksums::compute_file_checksum(path, self.algorithm)?.into_hex())
    }

    /// Stat a path and optionally hash it. A missing path is a state, not an error.
    pub fn get_file_state(&self, path: &Path, compute_hash: bool) -> Result<DiskState> {
        let metadata = match fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(DiskState::missing()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DiskState::missing()),
            Err(e) => return Err(KeeperError::io(path, e)),
        };

        let file_hash = if compute_hash {
            Some(self.compute_file_hash(path)?)
        } else {
            None
        };

        Ok(DiskState {
            exists: true,
            file_size: metadata.len(),
            modified_time: modified_secs(&metadata),
            file_hash,
        })
    }

    /// Classify a tracked file against its recorded snapshot.
    pub fn check_file_status(&self, tracked: &TrackedFile) -> Result<FileStatus> {
        let state = self.get_file_state(&tracked.file_path, false)?;
        if !state.exists {
            return Ok(FileStatus::Missing);
        }

        if !has_file_changed(tracked, &state) {
            return Ok(FileStatus::Ok);
        }

        let Some(stored) = tracked.file_hash.as_deref() else {
            return Ok(FileStatus::Modified);
        };

        match self.compute_file_hash(&tracked.file_path) {
            Ok(live) if live == stored => {
                debug!(file_id = %tracked.id, "stat drift only, content unchanged");
                Ok(FileStatus::Ok)
            }
            Ok(_) => Ok(FileStatus::Modified),
            Err(e) => {
                warn!(file_id = %tracked.id, error = %e, "hash failed during status check");
                Ok(FileStatus::Modified)
            }
        }
    }

    pub fn verify_file_hash(&self, path: &Path, expected_hash: &str) -> VerificationResult {
        checksums::verify_file_hash(path, expected_hash, self.algorithm)
    }
}

/// True if size or mtime differ from the tracked values, or the file is gone.
pub fn has_file_changed(tracked: &TrackedFile, current: &DiskState) -> bool {
    !current.exists
        || current.file_size != tracked.file_size
        || current.modified_time != tracked.modified_time
}
