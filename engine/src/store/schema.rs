use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Tables owned by the store, in creation order.
pub const SCHEMA_TABLES: &[&str] = &[
    "files",
    "versions",
    "tags",
    "tag_links",
    "events",
    "metadata",
    "projects",
];

// Base tables as first shipped. Columns added later live in ADDED_COLUMNS so
// older databases and fresh ones converge on the same shape.
const BASE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    file_path TEXT NOT NULL UNIQUE,
    file_size INTEGER NOT NULL,
    modified_time REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'OK',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS versions (
    id TEXT PRIMARY KEY,
    file_id TEXT NOT NULL,
    version_number INTEGER NOT NULL,
    commit_message TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    modified_time REAL NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tag_links (
    id TEXT PRIMARY KEY,
    tag_id TEXT NOT NULL,
    file_id TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE,
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    file_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS metadata (
    file_id TEXT PRIMARY KEY,
    data TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    color TEXT NOT NULL DEFAULT '#007AFF',
    created_at TEXT NOT NULL
);
";

/// (table, column, declaration) added after the base schema.
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
    ("files", "file_hash", "TEXT"),
    ("versions", "file_hash", "TEXT"),
    ("files", "is_favorite", "INTEGER DEFAULT 0"),
    ("files", "is_archived", "INTEGER DEFAULT 0"),
    ("versions", "is_pinned", "INTEGER DEFAULT 0"),
    ("versions", "pinned_path", "TEXT"),
    ("files", "project_id", "TEXT REFERENCES projects(id)"),
];

// Indexes go last: some of them cover added columns.
const INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_versions_file_id ON versions(file_id);
CREATE INDEX IF NOT EXISTS idx_tag_links_file_id ON tag_links(file_id);
CREATE INDEX IF NOT EXISTS idx_tag_links_tag_id ON tag_links(tag_id);
CREATE INDEX IF NOT EXISTS idx_events_file_id ON events(file_id);
CREATE INDEX IF NOT EXISTS idx_files_project_id ON files(project_id);
";

/// Column names of `table`, in declaration order.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Create missing tables, add missing columns, create missing indexes.
///
/// Additive only: nothing is dropped or rewritten. Returns how many columns
/// were added, so a second run reports zero.
pub(crate) fn migrate(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction()?;
    tx.execute_batch(BASE_SCHEMA)?;

    let mut added = 0;
    for (table, column, decl) in ADDED_COLUMNS {
        let existing = table_columns(&tx, table)?;
        if existing.iter().any(|c| c == column) {
            continue;
        }
        tx.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))?;
        debug!(table, column, "added column");
        added += 1;
    }

    tx.execute_batch(INDEXES)?;
    tx.commit()?;

    if added > 0 {
        info!(added, "schema migrated");
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn schema_snapshot(conn: &Connection) -> Vec<(String, String, Option<String>)> {
        let mut stmt = conn
            .prepare("SELECT type, name, sql FROM sqlite_master ORDER BY type, name")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_migration_is_idempotent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = Store::open(temp_dir.path().join("keeper.db")).unwrap();

        let before = schema_snapshot(&store.connect().unwrap());
        assert_eq!(store.migrate().unwrap(), 0);
        assert_eq!(store.migrate().unwrap(), 0);
        let after = schema_snapshot(&store.connect().unwrap());

        assert_eq!(before, after);
        for table in SCHEMA_TABLES {
            assert!(before.iter().any(|(kind, name, _)| kind == "table" && name == table));
        }
    }

    #[test]
    fn test_upgrades_legacy_database_without_losing_rows() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("legacy.db");

        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE files (
                    id TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    file_path TEXT NOT NULL UNIQUE,
                    file_size INTEGER NOT NULL,
                    modified_time REAL NOT NULL,
                    status TEXT NOT NULL DEFAULT 'OK',
                    created_at TEXT NOT NULL
                );
                CREATE TABLE versions (
                    id TEXT PRIMARY KEY,
                    file_id TEXT NOT NULL,
                    version_number INTEGER NOT NULL,
                    commit_message TEXT NOT NULL,
                    file_size INTEGER NOT NULL,
                    modified_time REAL NOT NULL,
                    created_at TEXT NOT NULL
                );
                INSERT INTO files VALUES ('f1', 'a.txt', '/data/a.txt', 3, 10.5, 'OK', '2023-01-01');
                INSERT INTO versions VALUES ('v1', 'f1', 1, 'first', 3, 10.5, '2023-01-01');",
            )
            .unwrap();
        }

        let store = Store::open(&db_path).unwrap();
        let conn = store.connect().unwrap();
        let file_columns = table_columns(&conn, "files").unwrap();
        for column in ["file_hash", "is_favorite", "is_archived", "project_id"] {
            assert!(file_columns.iter().any(|c| c == column), "missing {}", column);
        }
        let version_columns = table_columns(&conn, "versions").unwrap();
        for column in ["file_hash", "is_pinned", "pinned_path"] {
            assert!(version_columns.iter().any(|c| c == column), "missing {}", column);
        }

        let file = store.get_file("f1").unwrap().expect("legacy row survives");
        assert_eq!(file.display_name, "a.txt");
        assert!(!file.is_favorite);
        assert_eq!(file.file_hash, None);

        let versions = store.list_versions("f1").unwrap();
        assert_eq!(versions.len(), 1);
        assert!(!versions[0].is_pinned);

        assert_eq!(store.migrate().unwrap(), 0);
    }
}
