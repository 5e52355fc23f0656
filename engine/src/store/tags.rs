use super::{new_id, now, tag_from_row, Store};
use crate::error::{KeeperError, Result};
use crate::model::Tag;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

fn find_tag(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    let tag = conn
        .query_row(
            "SELECT id, name, created_at FROM tags WHERE name = ?1",
            params![name],
            tag_from_row,
        )
        .optional()?;
    Ok(tag)
}

impl Store {
    // ── Tags ────────────────────────────────────────────────────────

    /// Look up a tag by (normalized) name, creating it if needed.
    pub fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        let name = Tag::normalize(name);
        if name.is_empty() {
            return Err(KeeperError::InvalidArgument("tag name must not be empty".to_string()));
        }

        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO tags (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![new_id(), name, now()],
        )?;
        find_tag(&conn, &name)?.ok_or_else(|| KeeperError::not_found("tag", name))
    }

    pub fn get_tag(&self, name: &str) -> Result<Option<Tag>> {
        let conn = self.connect()?;
        find_tag(&conn, &Tag::normalize(name))
    }

    /// All tags, by name.
    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM tags ORDER BY name")?;
        let tags = stmt
            .query_map([], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Tags on one file, by name.
    pub fn list_file_tags(&self, file_id: &str) -> Result<Vec<Tag>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.created_at FROM tags t
             JOIN tag_links tl ON tl.tag_id = t.id
             WHERE tl.file_id = ?1
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![file_id], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Link a tag to a file. Linking twice is a no-op; returns whether a
    /// link was added.
    pub fn link_tag(&self, tag_id: &str, file_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let existing = conn
            .query_row(
                "SELECT id FROM tag_links WHERE tag_id = ?1 AND file_id = ?2",
                params![tag_id, file_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO tag_links (id, tag_id, file_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![new_id(), tag_id, file_id, now()],
        )?;
        Ok(true)
    }

    /// Remove the link between a tag and a file; returns whether one existed.
    pub fn unlink_tag(&self, tag_id: &str, file_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM tag_links WHERE tag_id = ?1 AND file_id = ?2",
            params![tag_id, file_id],
        )?;
        Ok(removed > 0)
    }

    /// Drop tags that no file links to. Returns how many were removed.
    pub fn delete_unused_tags(&self) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag_id FROM tag_links)",
            [],
        )?;
        if removed > 0 {
            debug!(removed, "orphaned tags collected");
        }
        Ok(removed)
    }

    /// Get-or-create a tag by name and link it to a file.
    pub fn add_tag_to_file(&self, file_id: &str, name: &str) -> Result<Tag> {
        if self.get_file(file_id)?.is_none() {
            return Err(KeeperError::not_found("file", file_id));
        }
        let tag = self.get_or_create_tag(name)?;
        self.link_tag(&tag.id, file_id)?;
        Ok(tag)
    }

    /// Unlink a tag by name and collect it if nothing else uses it.
    pub fn remove_tag_from_file(&self, file_id: &str, name: &str) -> Result<bool> {
        let Some(tag) = self.get_tag(name)? else {
            return Ok(false);
        };
        let removed = self.unlink_tag(&tag.id, file_id)?;
        self.delete_unused_tags()?;
        Ok(removed)
    }
}
