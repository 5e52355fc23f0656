use super::files::require_row;
use super::{new_id, now, optional, path_to_sql, version_from_row, Store, VERSION_COLUMNS};
use crate::error::{KeeperError, Result};
use crate::model::Version;
use rusqlite::{params, TransactionBehavior};
use std::path::Path;
use tracing::debug;

impl Store {
    // ── Versions ────────────────────────────────────────────────────

    /// Append the next version for a file.
    ///
    /// The number is allocated as `max + 1` (or 1) inside an immediate
    /// transaction, so two writers cannot claim the same number.
    pub fn create_version(
        &self,
        file_id: &str,
        commit_message: &str,
        file_size: u64,
        modified_time: f64,
        file_hash: Option<&str>,
    ) -> Result<Version> {
        if commit_message.trim().is_empty() {
            return Err(KeeperError::InvalidArgument(
                "commit message must not be empty".to_string(),
            ));
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let known: Option<()> = optional(tx.query_row(
            "SELECT 1 FROM files WHERE id = ?1",
            params![file_id],
            |_| Ok(()),
        ))?;
        if known.is_none() {
            return Err(KeeperError::not_found("file", file_id));
        }

        let version_number: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version_number), 0) + 1 FROM versions WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;

        let version = Version {
            id: new_id(),
            file_id: file_id.to_string(),
            version_number,
            commit_message: commit_message.to_string(),
            file_size,
            modified_time,
            created_at: now(),
            file_hash: file_hash.map(str::to_string),
            is_pinned: false,
            pinned_path: None,
        };

        tx.execute(
            "INSERT INTO versions (id, file_id, version_number, commit_message, file_size, \
             modified_time, created_at, file_hash, is_pinned, pinned_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL)",
            params![
                version.id,
                version.file_id,
                version.version_number,
                version.commit_message,
                version.file_size as i64,
                version.modified_time,
                version.created_at,
                version.file_hash,
            ],
        )?;
        tx.commit()?;

        debug!(file_id, version_number, "version row created");
        Ok(version)
    }

    /// Versions of a file, newest first.
    pub fn list_versions(&self, file_id: &str) -> Result<Vec<Version>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM versions WHERE file_id = ?1 ORDER BY version_number DESC",
            VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map(params![file_id], version_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    pub fn get_version(&self, file_id: &str, version_number: i64) -> Result<Option<Version>> {
        let conn = self.connect()?;
        optional(conn.query_row(
            &format!(
                "SELECT {} FROM versions WHERE file_id = ?1 AND version_number = ?2",
                VERSION_COLUMNS
            ),
            params![file_id, version_number],
            version_from_row,
        ))
    }

    pub fn get_latest_version(&self, file_id: &str) -> Result<Option<Version>> {
        let conn = self.connect()?;
        optional(conn.query_row(
            &format!(
                "SELECT {} FROM versions WHERE file_id = ?1 ORDER BY version_number DESC LIMIT 1",
                VERSION_COLUMNS
            ),
            params![file_id],
            version_from_row,
        ))
    }

    /// `max(version_number) + 1`, or 1 for a file with no versions.
    pub fn next_version_number(&self, file_id: &str) -> Result<i64> {
        let conn = self.connect()?;
        let next = conn.query_row(
            "SELECT COALESCE(MAX(version_number), 0) + 1 FROM versions WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    /// Drop one version row. Used to undo a version whose backup could not
    /// be written.
    pub fn delete_version(&self, file_id: &str, version_number: i64) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "DELETE FROM versions WHERE file_id = ?1 AND version_number = ?2",
            params![file_id, version_number],
        )?;
        require_row(changed, "version", &format!("{} v{}", file_id, version_number))?;
        debug!(file_id, version_number, "version row deleted");
        Ok(())
    }

    /// Record or clear the pinned artifact of a version.
    ///
    /// A version is only marked pinned together with a path.
    pub fn set_version_pinned(
        &self,
        file_id: &str,
        version_number: i64,
        pinned_path: Option<&Path>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE versions SET is_pinned = ?1, pinned_path = ?2
             WHERE file_id = ?3 AND version_number = ?4",
            params![
                pinned_path.is_some(),
                pinned_path.map(path_to_sql),
                file_id,
                version_number
            ],
        )?;
        require_row(changed, "version", &format!("{} v{}", file_id, version_number))
    }

    /// Pinned versions of one file (newest first) or of every file
    /// (most recently created first).
    pub fn list_pinned_versions(&self, file_id: Option<&str>) -> Result<Vec<Version>> {
        let conn = self.connect()?;
        let versions = match file_id {
            Some(file_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM versions
                     WHERE file_id = ?1 AND is_pinned = 1 AND pinned_path IS NOT NULL
                     ORDER BY version_number DESC",
                    VERSION_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![file_id], version_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM versions
                     WHERE is_pinned = 1 AND pinned_path IS NOT NULL
                     ORDER BY created_at DESC, rowid DESC",
                    VERSION_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], version_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(versions)
    }
}
