//! Content fingerprints.
//!
//! This module provides:
//! - The checksum algorithms an installation may choose from (XXH64, SHA-256, BLAKE3)
//! - Streaming file hashing in fixed 64 KiB chunks
//! - Standalone hash verification for backup-artifact audits
//!
//! An installation hashes with exactly one algorithm; stored hex digests are
//! never compared across algorithms.

use crate::error::{KeeperError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use twox_hash::XxHash64;

/// Read size for streaming hashes.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// XXH64 (fast, non-cryptographic, 64-bit)
    #[default]
    Xxh64,
    /// SHA-256 (cryptographic fallback, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xxh64 => write!(f, "xxh64"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "xxh64" | "xxhash64" => Ok(Self::Xxh64),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(KeeperError::InvalidArgument(format!(
                "unknown hash algorithm '{}'",
                other
            ))),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn into_hex(self) -> String {
        self.hex
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Trait for incremental checksum computation
pub trait ChecksumHasher {
    fn update(&mut self, data: &[u8]);

    fn finalize(self: Box<Self>) -> ChecksumValue;
}

struct Xxh64Hasher {
    hasher: XxHash64,
}

impl ChecksumHasher for Xxh64Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.write(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(
            ChecksumAlgorithm::Xxh64,
            format!("{:016x}", self.hasher.finish()),
        )
    }
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(
            ChecksumAlgorithm::Blake3,
            self.hasher.finalize().to_hex().to_string(),
        )
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Xxh64 => Box::new(Xxh64Hasher {
            hasher: XxHash64::with_seed(0),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Hash a reader to exhaustion in `CHUNK_SIZE` reads.
pub fn checksum_reader<R: Read>(
    reader: &mut R,
    algorithm: ChecksumAlgorithm,
) -> io::Result<ChecksumValue> {
    let mut hasher = create_hasher(algorithm);
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(hasher.finalize())
}

/// Compute the checksum of a whole file.
pub fn compute_file_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<ChecksumValue> {
    let mut file = File::open(path).map_err(|e| KeeperError::io(path, e))?;
    checksum_reader(&mut file, algorithm).map_err(|e| KeeperError::io(path, e))
}

/// Outcome of checking a file against an expected hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub error: Option<String>,
}

impl VerificationResult {
    /// An invalid result that never got as far as hashing.
    pub fn failed(expected_hash: Option<String>, reason: impl Into<String>) -> Self {
        VerificationResult {
            is_valid: false,
            expected_hash,
            actual_hash: None,
            error: Some(reason.into()),
        }
    }

    /// Convert an invalid result into an `IntegrityMismatch` error.
    pub fn into_result(self, path: &Path) -> Result<()> {
        if self.is_valid {
            return Ok(());
        }
        Err(KeeperError::IntegrityMismatch {
            path: path.to_path_buf(),
            expected: self.expected_hash.unwrap_or_default(),
            actual: self
                .actual_hash
                .or(self.error)
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Verify a file's hash against an expected value.
///
/// Never fails: a missing or unreadable file produces an invalid result
/// with the reason in `error`.
pub fn verify_file_hash(
    path: &Path,
    expected_hash: &str,
    algorithm: ChecksumAlgorithm,
) -> VerificationResult {
    if !path.exists() {
        return VerificationResult::failed(Some(expected_hash.to_string()), "File not found");
    }

    match compute_file_checksum(path, algorithm) {
        Ok(actual) => {
            let is_valid = actual.hex() == expected_hash;
            VerificationResult {
                is_valid,
                expected_hash: Some(expected_hash.to_string()),
                actual_hash: Some(actual.into_hex()),
                error: if is_valid {
                    None
                } else {
                    Some("Hash mismatch".to_string())
                },
            }
        }
        Err(e) => VerificationResult::failed(Some(expected_hash.to_string()), e.to_string()),
    }
}
