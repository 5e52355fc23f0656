use super::{
    file_from_row, new_id, now, optional, path_to_sql, Store, FILE_COLUMNS,
};
use crate::error::{KeeperError, Result};
use crate::model::{FileStatus, SearchData, TrackedFile};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Error out when an UPDATE/DELETE by id touched nothing.
pub(super) fn require_row(changed: usize, entity: &'static str, id: &str) -> Result<()> {
    if changed == 0 {
        Err(KeeperError::not_found(entity, id))
    } else {
        Ok(())
    }
}

fn query_files(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<TrackedFile>> {
    let mut stmt = conn.prepare(sql)?;
    let files = stmt
        .query_map(args, file_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

impl Store {
    // ── Tracked files ───────────────────────────────────────────────

    /// Insert a new tracked file. A duplicate path is a `Constraint` error.
    pub fn create_file(
        &self,
        display_name: &str,
        file_path: &Path,
        file_size: u64,
        modified_time: f64,
        file_hash: Option<&str>,
    ) -> Result<TrackedFile> {
        let file = TrackedFile {
            id: new_id(),
            display_name: display_name.to_string(),
            file_path: file_path.to_path_buf(),
            file_size,
            modified_time,
            status: FileStatus::Ok,
            created_at: now(),
            file_hash: file_hash.map(str::to_string),
            is_favorite: false,
            is_archived: false,
            project_id: None,
        };

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO files (id, display_name, file_path, file_size, modified_time, status, \
             created_at, file_hash, is_favorite, is_archived, project_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, NULL)",
            params![
                file.id,
                file.display_name,
                path_to_sql(&file.file_path),
                file.file_size as i64,
                file.modified_time,
                file.status.as_str(),
                file.created_at,
                file.file_hash,
            ],
        )?;
        debug!(file_id = %file.id, path = %file.file_path.display(), "file row created");
        Ok(file)
    }

    pub fn get_file(&self, file_id: &str) -> Result<Option<TrackedFile>> {
        let conn = self.connect()?;
        optional(conn.query_row(
            &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
            params![file_id],
            file_from_row,
        ))
    }

    pub fn get_file_by_path(&self, file_path: &Path) -> Result<Option<TrackedFile>> {
        let conn = self.connect()?;
        optional(conn.query_row(
            &format!("SELECT {} FROM files WHERE file_path = ?1", FILE_COLUMNS),
            params![path_to_sql(file_path)],
            file_from_row,
        ))
    }

    /// All files, newest first. Archived files only when asked for.
    pub fn list_files(&self, include_archived: bool) -> Result<Vec<TrackedFile>> {
        let conn = self.connect()?;
        let filter = if include_archived {
            ""
        } else {
            "WHERE COALESCE(is_archived, 0) = 0"
        };
        query_files(
            &conn,
            &format!(
                "SELECT {} FROM files {} ORDER BY created_at DESC, rowid DESC",
                FILE_COLUMNS, filter
            ),
            [],
        )
    }

    pub fn list_archived_files(&self) -> Result<Vec<TrackedFile>> {
        let conn = self.connect()?;
        query_files(
            &conn,
            &format!(
                "SELECT {} FROM files WHERE is_archived = 1 ORDER BY created_at DESC, rowid DESC",
                FILE_COLUMNS
            ),
            [],
        )
    }

    /// Files in a project, or unassigned files when `project_id` is `None`.
    pub fn list_files_by_project(
        &self,
        project_id: Option<&str>,
        include_archived: bool,
    ) -> Result<Vec<TrackedFile>> {
        let conn = self.connect()?;
        let archived = if include_archived {
            ""
        } else {
            "AND COALESCE(is_archived, 0) = 0"
        };
        match project_id {
            Some(project_id) => query_files(
                &conn,
                &format!(
                    "SELECT {} FROM files WHERE project_id = ?1 {} \
                     ORDER BY created_at DESC, rowid DESC",
                    FILE_COLUMNS, archived
                ),
                params![project_id],
            ),
            None => query_files(
                &conn,
                &format!(
                    "SELECT {} FROM files WHERE project_id IS NULL {} \
                     ORDER BY created_at DESC, rowid DESC",
                    FILE_COLUMNS, archived
                ),
                [],
            ),
        }
    }

    /// Files carrying a tag, by display name.
    pub fn list_files_by_tag(&self, tag_name: &str) -> Result<Vec<TrackedFile>> {
        let conn = self.connect()?;
        let columns = FILE_COLUMNS
            .split(", ")
            .map(|c| format!("f.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        query_files(
            &conn,
            &format!(
                "SELECT {} FROM files f
                 JOIN tag_links tl ON tl.file_id = f.id
                 JOIN tags t ON t.id = tl.tag_id
                 WHERE t.name = ?1
                 ORDER BY f.display_name, f.rowid",
                columns
            ),
            params![crate::model::Tag::normalize(tag_name)],
        )
    }

    pub fn update_file_status(&self, file_id: &str, status: FileStatus) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE files SET status = ?1 WHERE id = ?2",
            params![status.as_str(), file_id],
        )?;
        require_row(changed, "file", file_id)
    }

    /// Refresh the mirrored snapshot after a commit, restore or verify.
    pub fn update_file_metadata(
        &self,
        file_id: &str,
        file_size: u64,
        modified_time: f64,
        status: FileStatus,
        file_hash: Option<&str>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE files SET file_size = ?1, modified_time = ?2, status = ?3, file_hash = ?4
             WHERE id = ?5",
            params![file_size as i64, modified_time, status.as_str(), file_hash, file_id],
        )?;
        require_row(changed, "file", file_id)
    }

    /// Point a file at a new path in one write. Used by relink.
    pub fn update_file_location(
        &self,
        file_id: &str,
        file_path: &Path,
        file_size: u64,
        modified_time: f64,
        status: FileStatus,
        file_hash: Option<&str>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE files
             SET file_path = ?1, file_size = ?2, modified_time = ?3, status = ?4, file_hash = ?5
             WHERE id = ?6",
            params![
                path_to_sql(file_path),
                file_size as i64,
                modified_time,
                status.as_str(),
                file_hash,
                file_id
            ],
        )?;
        require_row(changed, "file", file_id)
    }

    pub fn update_display_name(&self, file_id: &str, display_name: &str) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE files SET display_name = ?1 WHERE id = ?2",
            params![display_name, file_id],
        )?;
        require_row(changed, "file", file_id)
    }

    pub fn set_favorite(&self, file_id: &str, is_favorite: bool) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE files SET is_favorite = ?1 WHERE id = ?2",
            params![is_favorite, file_id],
        )?;
        require_row(changed, "file", file_id)
    }

    /// Flip the favorite flag and return the new value.
    pub fn toggle_favorite(&self, file_id: &str) -> Result<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE files SET is_favorite = NOT COALESCE(is_favorite, 0) WHERE id = ?1",
            params![file_id],
        )?;
        require_row(changed, "file", file_id)?;
        let value: bool = tx.query_row(
            "SELECT is_favorite FROM files WHERE id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(value)
    }

    pub fn set_archived(&self, file_id: &str, is_archived: bool) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE files SET is_archived = ?1 WHERE id = ?2",
            params![is_archived, file_id],
        )?;
        require_row(changed, "file", file_id)
    }

    /// Assign a file to a project, or clear the assignment with `None`.
    pub fn set_file_project(&self, file_id: &str, project_id: Option<&str>) -> Result<()> {
        let conn = self.connect()?;
        if let Some(project_id) = project_id {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM projects WHERE id = ?1",
                    params![project_id],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Err(KeeperError::not_found("project", project_id));
            }
        }
        let changed = conn.execute(
            "UPDATE files SET project_id = ?1 WHERE id = ?2",
            params![project_id, file_id],
        )?;
        require_row(changed, "file", file_id)
    }

    /// Remove a file and every row that hangs off it.
    ///
    /// Rows are deleted explicitly rather than through `ON DELETE CASCADE`
    /// because databases created before foreign keys were declared lack it.
    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM versions WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM metadata WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM tag_links WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM events WHERE file_id = ?1", params![file_id])?;
        let changed = tx.execute("DELETE FROM files WHERE id = ?1", params![file_id])?;
        require_row(changed, "file", file_id)?;
        tx.execute(
            "DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag_id FROM tag_links)",
            [],
        )?;
        tx.commit()?;
        debug!(file_id, "file rows deleted");
        Ok(())
    }

    // ── Free-form metadata ──────────────────────────────────────────

    /// Store the JSON document for a file, replacing any previous one.
    pub fn set_metadata(&self, file_id: &str, data: &Map<String, Value>) -> Result<()> {
        let json = serde_json::to_string(data)?;
        let timestamp = now();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO metadata (file_id, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(file_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![file_id, json, timestamp],
        )?;
        Ok(())
    }

    /// The stored document, or an empty object when absent or unreadable.
    pub fn get_metadata(&self, file_id: &str) -> Result<Map<String, Value>> {
        let conn = self.connect()?;
        let raw: Option<Option<String>> = optional(conn.query_row(
            "SELECT data FROM metadata WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        ))?;

        let Some(raw) = raw.flatten() else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(e) => {
                warn!(file_id, error = %e, "unparsable metadata ignored");
                Ok(Map::new())
            }
        }
    }

    // ── Search data ─────────────────────────────────────────────────

    pub fn file_search_data(&self, file_id: &str) -> Result<SearchData> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT commit_message FROM versions WHERE file_id = ?1 ORDER BY version_number",
        )?;
        let commit_messages = stmt
            .query_map(params![file_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let mut stmt = conn.prepare(
            "SELECT t.name FROM tags t
             JOIN tag_links tl ON tl.tag_id = t.id
             WHERE tl.file_id = ?1
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![file_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(SearchData {
            commit_messages,
            tags,
        })
    }

    /// Search data for every file that has versions or tags, keyed by file id.
    pub fn all_files_search_data(&self) -> Result<BTreeMap<String, SearchData>> {
        let conn = self.connect()?;
        let mut out: BTreeMap<String, SearchData> = BTreeMap::new();

        let mut stmt = conn.prepare(
            "SELECT file_id, commit_message FROM versions ORDER BY file_id, version_number",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
        for row in rows {
            let (file_id, message) = row?;
            out.entry(file_id).or_default().commit_messages.push(message);
        }

        let mut stmt = conn.prepare(
            "SELECT tl.file_id, t.name FROM tags t
             JOIN tag_links tl ON tl.tag_id = t.id
             WHERE tl.file_id IS NOT NULL
             ORDER BY tl.file_id, t.name",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
        for row in rows {
            let (file_id, tag) = row?;
            out.entry(file_id).or_default().tags.push(tag);
        }

        Ok(out)
    }
}
