use super::files::require_row;
use super::{new_id, now, optional, project_from_row, Store};
use crate::error::{KeeperError, Result};
use crate::model::{Project, DEFAULT_PROJECT_COLOR};
use rusqlite::params;

/// Partial update for a project; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub color: Option<String>,
}

impl Store {
    // ── Projects ────────────────────────────────────────────────────

    pub fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(KeeperError::InvalidArgument(
                "project name must not be empty".to_string(),
            ));
        }
        let project = Project {
            id: new_id(),
            name: name.to_string(),
            description: description.map(str::to_string),
            color: color.unwrap_or(DEFAULT_PROJECT_COLOR).to_string(),
            created_at: now(),
        };
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO projects (id, name, description, color, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project.id,
                project.name,
                project.description,
                project.color,
                project.created_at
            ],
        )?;
        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let conn = self.connect()?;
        optional(conn.query_row(
            "SELECT id, name, description, color, created_at FROM projects WHERE id = ?1",
            params![project_id],
            project_from_row,
        ))
    }

    /// All projects, by name.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, color, created_at FROM projects ORDER BY name, rowid",
        )?;
        let projects = stmt
            .query_map([], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    /// All projects with the number of files assigned to each.
    pub fn list_projects_with_counts(&self) -> Result<Vec<(Project, usize)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.description, p.color, p.created_at,
                    (SELECT COUNT(*) FROM files f WHERE f.project_id = p.id)
             FROM projects p
             ORDER BY p.name, p.rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((project_from_row(row)?, row.get::<_, i64>(5)?.max(0) as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn project_file_count(&self, project_id: &str) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    pub fn update_project(&self, project_id: &str, update: &ProjectUpdate) -> Result<Project> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let current = optional(tx.query_row(
            "SELECT id, name, description, color, created_at FROM projects WHERE id = ?1",
            params![project_id],
            project_from_row,
        ))?
        .ok_or_else(|| KeeperError::not_found("project", project_id))?;

        let updated = Project {
            name: update.name.clone().unwrap_or(current.name),
            description: match &update.description {
                Some(description) => description.clone(),
                None => current.description,
            },
            color: update.color.clone().unwrap_or(current.color),
            ..current
        };
        tx.execute(
            "UPDATE projects SET name = ?1, description = ?2, color = ?3 WHERE id = ?4",
            params![updated.name, updated.description, updated.color, project_id],
        )?;
        tx.commit()?;
        Ok(updated)
    }

    /// Delete a project. Member files stay and become unassigned.
    pub fn delete_project(&self, project_id: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE files SET project_id = NULL WHERE project_id = ?1",
            params![project_id],
        )?;
        let changed = tx.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
        require_row(changed, "project", project_id)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ProjectUpdate;
    use crate::model::DEFAULT_PROJECT_COLOR;
    use crate::store::test_support::temp_store;
    use std::path::Path;

    #[test]
    fn test_project_crud_and_counts() {
        let (_dir, store) = temp_store();
        let beta = store.create_project("Beta", None, Some("#FF0000")).unwrap();
        let alpha = store.create_project("Alpha", Some("first"), None).unwrap();
        assert_eq!(alpha.color, DEFAULT_PROJECT_COLOR);

        let names: Vec<_> = store.list_projects().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);

        let file = store.create_file("a", Path::new("/a"), 1, 1.0, None).unwrap();
        store.set_file_project(&file.id, Some(&alpha.id)).unwrap();
        assert_eq!(store.project_file_count(&alpha.id).unwrap(), 1);

        let counts = store.list_projects_with_counts().unwrap();
        assert_eq!(counts[0].1, 1);
        assert_eq!(counts[1].1, 0);

        let renamed = store
            .update_project(
                &beta.id,
                &ProjectUpdate {
                    name: Some("Gamma".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.name, "Gamma");
        assert_eq!(renamed.color, "#FF0000");
    }

    #[test]
    fn test_update_project_description() {
        let (_dir, store) = temp_store();
        let project = store.create_project("P", Some("draft notes"), None).unwrap();

        let untouched = store
            .update_project(
                &project.id,
                &ProjectUpdate {
                    color: Some("#00FF00".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(untouched.description.as_deref(), Some("draft notes"));

        let cleared = store
            .update_project(
                &project.id,
                &ProjectUpdate {
                    description: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.description, None);
        let stored = store.get_project(&project.id).unwrap().unwrap();
        assert_eq!(stored.description, None);
        assert_eq!(stored.color, "#00FF00");
    }

    #[test]
    fn test_delete_project_unassigns_files() {
        let (_dir, store) = temp_store();
        let project = store.create_project("P", None, None).unwrap();
        let file = store.create_file("a", Path::new("/a"), 1, 1.0, None).unwrap();
        store.set_file_project(&file.id, Some(&project.id)).unwrap();

        let members = store.list_files_by_project(Some(&project.id), false).unwrap();
        assert_eq!(members.len(), 1);
        assert!(store.list_files_by_project(None, false).unwrap().is_empty());

        store.delete_project(&project.id).unwrap();
        let file = store.get_file(&file.id).unwrap().expect("file survives");
        assert_eq!(file.project_id, None);
        assert_eq!(store.list_files_by_project(None, false).unwrap().len(), 1);
        assert!(store.delete_project(&project.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_assigning_unknown_project_fails() {
        let (_dir, store) = temp_store();
        let file = store.create_file("a", Path::new("/a"), 1, 1.0, None).unwrap();
        assert!(store.set_file_project(&file.id, Some("nope")).unwrap_err().is_not_found());
    }
}
