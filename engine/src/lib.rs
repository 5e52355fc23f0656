//! # Keeper Engine - Per-File Version Tracking
//!
//! A headless library that keeps full-copy versions of individual files
//! under a private data directory, detects when tracked files change or
//! disappear, and finds them again after they move.
//!
//! ## Overview
//!
//! - SQLite metadata store with additive schema migration
//! - Two-stage change detection (size/mtime, then content hash)
//! - Canonical and legacy backup layouts, restore, pin/unpin
//! - Relink of missing files by name, size, hash or mtime
//! - Bounded background job scheduler with pause, resume and cancel
//!
//! ## Basic Usage
//!
//! ```no_run
//! use keeper_engine::{Store, Verifier, VersionManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("/var/lib/keeper/keeper.db")?;
//! let manager = VersionManager::new(store, "/var/lib/keeper/versions", Verifier::default())?;
//!
//! let (file, v1) = manager.register("/home/me/report.docx".as_ref(), "first draft", None)?;
//! println!("tracking {} at version {}", file.display_name, v1.version_number);
//!
//! let status = manager.verify_file(&file.id)?;
//! println!("{}", status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Records (TrackedFile, Version, Tag, Event, Project) and enums
//! - **error**: Error types
//! - **store**: SQLite metadata store
//! - **checksums** / **verify**: Hashing and change detection
//! - **layout** / **fs_ops**: Backup artifact naming and copying
//! - **manager**: Register, commit, restore, pin, rename, delete
//! - **relink**: Missing-file relocation
//! - **job** / **scheduler** / **handlers**: Background jobs
//! - **shell** / **probe**: OS opener and media metadata seams
//! - **config**: Installation settings

pub mod checksums;
pub mod config;
pub mod error;
pub mod fs_ops;
pub mod handlers;
pub mod job;
pub mod layout;
pub mod manager;
pub mod model;
pub mod probe;
pub mod progress;
pub mod relink;
pub mod scheduler;
pub mod shell;
pub mod store;
pub mod verify;

pub use checksums::{ChecksumAlgorithm, VerificationResult};
pub use config::KeeperConfig;
pub use error::{KeeperError, Result};
pub use handlers::{register_default_handlers, verify_and_record};
pub use job::{Job, JobStatus, JobType};
pub use manager::VersionManager;
pub use model::{Event, EventType, FileStatus, Project, Tag, TrackedFile, Version};
pub use progress::{Checkpoint, NoCheckpoint};
pub use relink::{RelinkOptions, RelinkResolver, RelinkSummary};
pub use scheduler::{JobContext, JobEvent, JobObserver, Scheduler};
pub use store::Store;
pub use verify::Verifier;
