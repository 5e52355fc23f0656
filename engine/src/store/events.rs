use super::{event_from_row, new_id, now, Store};
use crate::error::Result;
use crate::model::{Event, EventType};
use rusqlite::params;

impl Store {
    // ── Events ──────────────────────────────────────────────────────

    /// Append an entry to a file's timeline.
    pub fn append_event(
        &self,
        file_id: &str,
        event_type: EventType,
        description: Option<&str>,
    ) -> Result<Event> {
        let event = Event {
            id: new_id(),
            file_id: file_id.to_string(),
            event_type,
            description: description.map(str::to_string),
            created_at: now(),
        };
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO events (id, file_id, event_type, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id,
                event.file_id,
                event.event_type.as_str(),
                event.description,
                event.created_at
            ],
        )?;
        Ok(event)
    }

    /// Timeline of a file, newest first unless `oldest_first`, at most
    /// `limit` entries when given.
    pub fn list_events(
        &self,
        file_id: &str,
        limit: Option<usize>,
        oldest_first: bool,
    ) -> Result<Vec<Event>> {
        let order = if oldest_first { "ASC" } else { "DESC" };
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, file_id, event_type, description, created_at FROM events
             WHERE file_id = ?1
             ORDER BY created_at {order}, rowid {order}
             LIMIT ?2",
            order = order
        ))?;
        let events = stmt
            .query_map(params![file_id, limit], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn delete_events_for_file(&self, file_id: &str) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM events WHERE file_id = ?1", params![file_id])?;
        Ok(removed)
    }
}
