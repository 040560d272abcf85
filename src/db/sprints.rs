use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{TaskboardDb, parse_date};
use crate::errors::BoardError;
use crate::models::*;
use crate::services::dates::{self, DateRange};

const SPRINT_COLUMNS: &str =
    "id, project_id, title, description, date_start, date_end, ignore_weekends, created_at, updated_at";

struct SprintRow {
    id: i64,
    project_id: i64,
    title: String,
    description: String,
    date_start: String,
    date_end: String,
    ignore_weekends: bool,
    created_at: String,
    updated_at: String,
}

impl SprintRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            date_start: row.get(4)?,
            date_end: row.get(5)?,
            ignore_weekends: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_sprint(self) -> Result<Sprint> {
        Ok(Sprint {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            date_start: parse_date(&self.date_start)?,
            date_end: parse_date(&self.date_end)?,
            ignore_weekends: self.ignore_weekends,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TaskboardDb {
    // ── Sprint CRUD ───────────────────────────────────────────────────

    pub fn create_sprint(&self, project_id: i64, new: &NewSprint) -> Result<Sprint> {
        let project = self.require_project(project_id)?;
        let range = DateRange::new(new.date_start, new.date_end)?;
        let others = self.list_sprints(project_id)?;
        dates::check_sprint(&project, range, &others, None)?;

        self.conn
            .execute(
                "INSERT INTO sprints (project_id, title, description, date_start, date_end, ignore_weekends)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    project_id,
                    new.title,
                    new.description,
                    new.date_start.to_string(),
                    new.date_end.to_string(),
                    new.ignore_weekends
                ],
            )
            .context("Failed to insert sprint")?;
        let id = self.conn.last_insert_rowid();
        self.get_sprint(id)?.context("Sprint not found after insert")
    }

    pub fn get_sprint(&self, id: i64) -> Result<Option<Sprint>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SPRINT_COLUMNS} FROM sprints WHERE id = ?1"),
                params![id],
                SprintRow::from_row,
            )
            .optional()
            .context("Failed to query sprint")?;
        row.map(SprintRow::into_sprint).transpose()
    }

    pub fn require_sprint(&self, id: i64) -> Result<Sprint> {
        self.get_sprint(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::sprint(id)).into())
    }

    pub fn list_sprints(&self, project_id: i64) -> Result<Vec<Sprint>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SPRINT_COLUMNS} FROM sprints WHERE project_id = ?1 ORDER BY date_start, id"
            ))
            .context("Failed to prepare list_sprints")?;
        let rows = stmt
            .query_map(params![project_id], SprintRow::from_row)
            .context("Failed to query sprints")?;
        let mut sprints = Vec::new();
        for row in rows {
            let r = row.context("Failed to read sprint row")?;
            sprints.push(r.into_sprint()?);
        }
        Ok(sprints)
    }

    pub fn update_sprint(&self, id: i64, patch: &SprintPatch) -> Result<Sprint> {
        let current = self.require_sprint(id)?;
        let date_start = patch.date_start.unwrap_or(current.date_start);
        let date_end = patch.date_end.unwrap_or(current.date_end);
        if patch.date_start.is_some() || patch.date_end.is_some() {
            let project = self.require_project(current.project_id)?;
            let range = DateRange::new(date_start, date_end)?;
            let others = self.list_sprints(current.project_id)?;
            dates::check_sprint(&project, range, &others, Some(id))?;
        }
        self.conn
            .execute(
                "UPDATE sprints SET title = ?1, description = ?2, date_start = ?3, date_end = ?4, ignore_weekends = ?5,
                    updated_at = datetime('now') WHERE id = ?6",
                params![
                    patch.title.as_ref().unwrap_or(&current.title),
                    patch.description.as_ref().unwrap_or(&current.description),
                    date_start.to_string(),
                    date_end.to_string(),
                    patch.ignore_weekends.unwrap_or(current.ignore_weekends),
                    id
                ],
            )
            .context("Failed to update sprint")?;
        self.require_sprint(id)
    }

    /// Delete a sprint; its stories and tasks fall back to the backlog.
    pub fn delete_sprint(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sprints WHERE id = ?1", params![id])
            .context("Failed to delete sprint")?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{self, date};
    use super::*;

    #[test]
    fn test_create_and_list_sprints() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        fixtures::sprint(&db, &project, date(2024, 3, 1), date(2024, 3, 14));
        fixtures::sprint(&db, &project, date(2024, 2, 1), date(2024, 2, 14));
        let sprints = db.list_sprints(project.id)?;
        assert_eq!(sprints.len(), 2);
        assert_eq!(sprints[0].date_start, date(2024, 2, 1));
        Ok(())
    }

    #[test]
    fn test_overlapping_sprint_rejected() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        fixtures::sprint(&db, &project, date(2024, 3, 1), date(2024, 3, 14));
        let err = db
            .create_sprint(
                project.id,
                &NewSprint {
                    title: "Overlap".into(),
                    description: String::new(),
                    date_start: date(2024, 3, 14),
                    date_end: date(2024, 3, 20),
                    ignore_weekends: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_update_sprint_may_keep_its_own_range() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let sprint = fixtures::sprint(&db, &project, date(2024, 3, 1), date(2024, 3, 14));
        let updated = db.update_sprint(
            sprint.id,
            &SprintPatch {
                date_end: Some(date(2024, 3, 15)),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.date_end, date(2024, 3, 15));
        Ok(())
    }

    #[test]
    fn test_delete_sprint_moves_stories_to_backlog() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let sprint = fixtures::sprint(&db, &project, date(2024, 3, 1), date(2024, 3, 14));
        let story = fixtures::story(&db, &project, Some(sprint.id), "Story");
        let task = fixtures::task(&db, &story, "Task");

        assert!(db.delete_sprint(sprint.id)?);
        assert_eq!(db.require_story(story.id)?.sprint_id, None);
        assert_eq!(db.require_task(task.id)?.sprint_id, None);
        Ok(())
    }
}
