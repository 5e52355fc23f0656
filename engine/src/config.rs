//! Installation settings.
//!
//! Loaded from an optional `keeper.toml` in the working directory, then
//! `KEEPER_*` environment variables. Front-ends may override fields after
//! loading.

use crate::checksums::ChecksumAlgorithm;
use crate::error::Result;
use crate::manager::VersionManager;
use crate::probe::{FfprobeProbe, ImageProbe};
use crate::scheduler::MAX_WORKERS;
use crate::store::Store;
use crate::verify::Verifier;
use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const DATABASE_FILE: &str = "keeper.db";
const VERSIONS_DIR: &str = "versions";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeeperConfig {
    /// Holds the database and the versions tree
    pub data_dir: PathBuf,

    #[serde(default)]
    pub pin_storage_path: Option<PathBuf>,

    #[serde(default = "default_job_workers")]
    pub job_workers: usize,

    /// Fixed for the lifetime of an installation
    #[serde(default)]
    pub hash_algorithm: ChecksumAlgorithm,

    /// When set, logs are also written to daily files here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_job_workers() -> usize {
    1
}

/// `<platform data dir>/keeper`, or `.keeper` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("keeper"))
        .unwrap_or_else(|| PathBuf::from(".keeper"))
}

impl Default for KeeperConfig {
    fn default() -> Self {
        KeeperConfig {
            data_dir: default_data_dir(),
            pin_storage_path: None,
            job_workers: default_job_workers(),
            hash_algorithm: ChecksumAlgorithm::default(),
            log_dir: None,
        }
    }
}

impl KeeperConfig {
    /// Load `keeper.toml` (if present) and `KEEPER_*` variables.
    pub fn load() -> Result<Self> {
        Self::build(ConfigFile::with_name("keeper").required(false))
    }

    /// Load from an explicit file, still honoring `KEEPER_*` variables.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(ConfigFile::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .set_default("data_dir", default_data_dir().to_string_lossy().into_owned())?
            .add_source(file)
            .add_source(Environment::with_prefix("KEEPER"))
            .build()?;
        Ok(settings.try_deserialize::<KeeperConfig>()?)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.data_dir.join(VERSIONS_DIR)
    }

    /// `job_workers` clamped to the scheduler's bounds.
    pub fn worker_count(&self) -> usize {
        self.job_workers.clamp(1, MAX_WORKERS)
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::new(self.hash_algorithm)
    }

    pub fn open_store(&self) -> Result<Store> {
        Store::open(self.database_path())
    }

    /// Open the store and build a manager with the configured pin root and
    /// the image and ffprobe metadata probes.
    pub fn open_manager(&self) -> Result<VersionManager> {
        let manager = VersionManager::new(self.open_store()?, self.versions_dir(), self.verifier())?
            .with_probe(Arc::new(ImageProbe))
            .with_probe(Arc::new(FfprobeProbe::default()));
        manager.set_pin_storage_path(self.pin_storage_path.clone())?;
        info!(
            data_dir = %self.data_dir.display(),
            algorithm = %self.hash_algorithm,
            "keeper opened"
        );
        Ok(manager)
    }
}
