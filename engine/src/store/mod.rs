//! SQLite-backed metadata store.
//!
//! Every operation opens its own connection and commits before returning, so
//! the store can be shared freely between scheduler workers and synchronous
//! callers. There is no cache: each read sees the latest committed write.

mod events;
mod files;
mod projects;
mod schema;
mod tags;
mod versions;

pub use projects::ProjectUpdate;
pub use schema::{table_columns, SCHEMA_TABLES};

use crate::error::{KeeperError, Result};
use crate::model::{Event, EventType, FileStatus, Project, Tag, TrackedFile, Version};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Handle to the on-disk database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| KeeperError::io(parent, e))?;
            }
        }

        let store = Store { path };
        {
            let conn = store.connect()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        store.migrate()?;
        debug!(path = %store.path.display(), "metadata store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bring the schema up to date. Safe to run any number of times.
    pub fn migrate(&self) -> Result<usize> {
        let mut conn = self.connect()?;
        schema::migrate(&mut conn)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) const FILE_COLUMNS: &str = "id, display_name, file_path, file_size, modified_time, \
     status, created_at, file_hash, is_favorite, is_archived, project_id";

pub(crate) const VERSION_COLUMNS: &str = "id, file_id, version_number, commit_message, \
     file_size, modified_time, created_at, file_hash, is_pinned, pinned_path";

fn text_enum_error(idx: usize, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

pub(crate) fn file_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedFile> {
    let status: String = row.get(5)?;
    Ok(TrackedFile {
        id: row.get(0)?,
        display_name: row.get(1)?,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        file_size: row.get::<_, i64>(3)?.max(0) as u64,
        modified_time: row.get(4)?,
        status: FileStatus::parse(&status).ok_or_else(|| text_enum_error(5, status))?,
        created_at: row.get(6)?,
        file_hash: row.get(7)?,
        is_favorite: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
        is_archived: row.get::<_, Option<bool>>(9)?.unwrap_or(false),
        project_id: row.get(10)?,
    })
}

pub(crate) fn version_from_row(row: &Row<'_>) -> rusqlite::Result<Version> {
    let pinned_path: Option<String> = row.get(9)?;
    Ok(Version {
        id: row.get(0)?,
        file_id: row.get(1)?,
        version_number: row.get(2)?,
        commit_message: row.get(3)?,
        file_size: row.get::<_, i64>(4)?.max(0) as u64,
        modified_time: row.get(5)?,
        created_at: row.get(6)?,
        file_hash: row.get(7)?,
        is_pinned: row.get::<_, Option<bool>>(8)?.unwrap_or(false) && pinned_path.is_some(),
        pinned_path: pinned_path.map(PathBuf::from),
    })
}

pub(crate) fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

pub(crate) fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let event_type: String = row.get(2)?;
    Ok(Event {
        id: row.get(0)?,
        file_id: row.get(1)?,
        event_type: EventType::parse(&event_type).ok_or_else(|| text_enum_error(2, event_type))?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Turn `QueryReturnedNoRows` into `None`.
pub(crate) fn optional<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
