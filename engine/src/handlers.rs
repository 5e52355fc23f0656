//! Built-in handlers for the four job types.
//!
//! Each handler reads its typed payload, checks the job's gate at safe
//! boundaries, and records a result summary on the job.

use crate::error::{KeeperError, Result};
use crate::job::JobType;
use crate::manager::VersionManager;
use crate::model::{EventType, FileStatus};
use crate::progress::scaled_percent;
use crate::relink::{RelinkOptions, RelinkResolver};
use crate::scheduler::{JobContext, Scheduler};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Payload of PIN_COPY and RESTORE jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionTarget {
    pub file_id: String,
    pub version_number: i64,
}

/// Result of a VERIFY_ALL job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySummary {
    pub checked: usize,
    pub ok: usize,
    pub modified: usize,
    pub missing: usize,
}

/// Register the VERIFY_ALL, PIN_COPY, RESTORE and RELINK_SCAN handlers.
pub fn register_default_handlers(scheduler: &Scheduler, manager: Arc<VersionManager>) {
    let m = Arc::clone(&manager);
    scheduler.register_handler(JobType::VerifyAll, move |ctx| verify_all(&m, ctx));

    let m = Arc::clone(&manager);
    scheduler.register_handler(JobType::PinCopy, move |ctx| pin_copy(&m, ctx));

    let m = Arc::clone(&manager);
    scheduler.register_handler(JobType::Restore, move |ctx| restore(&m, ctx));

    scheduler.register_handler(JobType::RelinkScan, move |ctx| relink_scan(&manager, ctx));
}

/// Verify one file and append the matching VERIFY_* event.
pub fn verify_and_record(manager: &VersionManager, file_id: &str) -> Result<FileStatus> {
    let status = manager.verify_file(file_id)?;
    let description = match status {
        FileStatus::Ok => "File integrity verified",
        FileStatus::Modified => "File has been modified since last version",
        FileStatus::Missing => "File is missing from disk",
    };
    manager
        .store()
        .append_event(file_id, EventType::for_status(status), Some(description))?;
    Ok(status)
}

fn verify_all(manager: &VersionManager, ctx: &JobContext) -> Result<()> {
    let files = manager.store().list_files(false)?;
    let mut summary = VerifySummary::default();

    for (i, file) in files.iter().enumerate() {
        if !ctx.checkpoint() {
            return Ok(());
        }

        match verify_and_record(manager, &file.id)? {
            FileStatus::Ok => summary.ok += 1,
            FileStatus::Modified => summary.modified += 1,
            FileStatus::Missing => summary.missing += 1,
        }
        summary.checked += 1;

        ctx.set_progress(scaled_percent(i + 1, files.len(), 0, 99));
    }

    info!(
        checked = summary.checked,
        modified = summary.modified,
        missing = summary.missing,
        "verify-all finished"
    );
    ctx.set_result(serde_json::to_value(summary)?);
    Ok(())
}

fn require_file(manager: &VersionManager, file_id: &str) -> Result<()> {
    match manager.store().get_file(file_id)? {
        Some(_) => Ok(()),
        None => Err(KeeperError::not_found("file", file_id)),
    }
}

fn pin_copy(manager: &VersionManager, ctx: &JobContext) -> Result<()> {
    let target: VersionTarget = ctx.parse_payload()?;
    require_file(manager, &target.file_id)?;

    ctx.set_progress(30);
    if !ctx.checkpoint() {
        return Ok(());
    }

    let pinned = manager.pin(&target.file_id, target.version_number)?;
    manager.store().append_event(
        &target.file_id,
        EventType::Pin,
        Some(&format!(
            "Version {} pinned to {}",
            target.version_number,
            pinned.display()
        )),
    )?;
    ctx.set_result(json!({ "pinned_path": pinned }));
    Ok(())
}

fn restore(manager: &VersionManager, ctx: &JobContext) -> Result<()> {
    let target: VersionTarget = ctx.parse_payload()?;
    require_file(manager, &target.file_id)?;

    ctx.set_progress(20);
    if !ctx.checkpoint() {
        return Ok(());
    }

    manager.restore(&target.file_id, target.version_number)?;
    manager.store().append_event(
        &target.file_id,
        EventType::Restore,
        Some(&format!("Restored to version {}", target.version_number)),
    )?;
    ctx.set_result(json!({
        "file_id": target.file_id,
        "version_number": target.version_number,
    }));
    Ok(())
}

fn relink_scan(manager: &VersionManager, ctx: &JobContext) -> Result<()> {
    let options: RelinkOptions = ctx.parse_payload()?;
    if options.root_path.as_os_str().is_empty() {
        return Err(KeeperError::InvalidArgument("No root path provided".to_string()));
    }

    let summary = RelinkResolver::new(manager).run(&options, ctx)?;
    ctx.set_result(serde_json::to_value(summary)?);
    Ok(())
}
