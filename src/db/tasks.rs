use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;

const TASK_COLUMNS: &str = "id, story_id, project_id, sprint_id, user_id, phase_id, type_id, title, description, priority, is_done, time_start, time_end, created_at, updated_at";

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        story_id: row.get(1)?,
        project_id: row.get(2)?,
        sprint_id: row.get(3)?,
        user_id: row.get(4)?,
        phase_id: row.get(5)?,
        type_id: row.get(6)?,
        title: row.get(7)?,
        description: row.get(8)?,
        priority: row.get(9)?,
        is_done: row.get(10)?,
        time_start: row.get(11)?,
        time_end: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl TaskboardDb {
    // ── Task CRUD ─────────────────────────────────────────────────────

    /// Insert a task under `story`. Project and sprint are copied from the
    /// story, and a phase duration row is opened for the starting phase.
    /// A task created past the first phase counts as started, and one created
    /// in a done phase is finished as well.
    pub fn create_task(
        &self,
        story: &Story,
        phase_id: i64,
        type_id: i64,
        new: &NewTask,
    ) -> Result<Task> {
        let phase = self.require_phase(phase_id)?;
        if phase.project_id != story.project_id {
            return Err(BoardError::validation(format!(
                "Phase {} belongs to another project",
                phase_id
            ))
            .into());
        }
        if self.get_task_type(type_id)?.is_none() {
            return Err(BoardError::validation(format!("Unknown task type {}", type_id)).into());
        }
        if let Some(user_id) = new.user_id {
            self.require_user(user_id)?;
        }
        let started = phase.is_done
            || self
                .first_phase(story.project_id)?
                .is_some_and(|first| first.id != phase.id);

        self.conn
            .execute(
                "INSERT INTO tasks (story_id, project_id, sprint_id, user_id, phase_id, type_id, title, description, priority, is_done, time_start, time_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         CASE WHEN ?11 THEN datetime('now') END, CASE WHEN ?10 THEN datetime('now') END)",
                params![
                    story.id,
                    story.project_id,
                    story.sprint_id,
                    new.user_id,
                    phase_id,
                    type_id,
                    new.title,
                    new.description,
                    new.priority,
                    phase.is_done,
                    started
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        let task = self.require_task(id)?;
        self.start_phase_duration(&task)?;
        if started {
            self.mark_story_started(story.id)?;
        }
        Ok(task)
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        self.conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()
            .context("Failed to query task")
    }

    pub fn require_task(&self, id: i64) -> Result<Task> {
        self.get_task(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::task(id)).into())
    }

    fn query_tasks(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare task query")?;
        let rows = stmt
            .query_map(args, task_from_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?);
        }
        Ok(tasks)
    }

    pub fn list_story_tasks(&self, story_id: i64) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE story_id = ?1 ORDER BY priority DESC, id"
            ),
            params![story_id],
        )
    }

    pub fn list_phase_tasks(&self, phase_id: i64) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE phase_id = ?1 ORDER BY id"),
            params![phase_id],
        )
    }

    pub fn list_sprint_tasks(&self, sprint_id: i64) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE sprint_id = ?1 ORDER BY priority DESC, id"
            ),
            params![sprint_id],
        )
    }

    pub fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<Task> {
        let current = self.require_task(id)?;
        if let Some(type_id) = patch.type_id
            && self.get_task_type(type_id)?.is_none()
        {
            return Err(BoardError::validation(format!("Unknown task type {}", type_id)).into());
        }
        let user_id = patch.user_id.unwrap_or(current.user_id);
        if let Some(Some(uid)) = patch.user_id {
            self.require_user(uid)?;
        }
        self.conn
            .execute(
                "UPDATE tasks SET title = ?1, description = ?2, user_id = ?3, type_id = ?4, priority = ?5,
                    updated_at = datetime('now') WHERE id = ?6",
                params![
                    patch.title.as_ref().unwrap_or(&current.title),
                    patch.description.as_ref().unwrap_or(&current.description),
                    user_id,
                    patch.type_id.unwrap_or(current.type_id),
                    patch.priority.unwrap_or(current.priority),
                    id
                ],
            )
            .context("Failed to update task")?;
        self.require_task(id)
    }

    /// Put a task into `phase`. `is_done` follows the phase; `time_end` is
    /// stamped on entering a done phase and cleared otherwise. `started`
    /// stamps `time_start` if it was not set yet.
    pub fn set_task_phase(&self, id: i64, phase: &Phase, started: bool) -> Result<()> {
        self.conn
            .execute(
                "UPDATE tasks SET phase_id = ?1, is_done = ?2,
                    time_start = CASE WHEN ?3 THEN COALESCE(time_start, datetime('now')) ELSE time_start END,
                    time_end = CASE WHEN ?2 THEN COALESCE(time_end, datetime('now')) END,
                    updated_at = datetime('now')
                 WHERE id = ?4",
                params![phase.id, phase.is_done, started, id],
            )
            .context("Failed to update task phase")?;
        Ok(())
    }

    /// Re-parent a task under `story`, copying the story's project and sprint.
    /// Open phase durations follow the task.
    pub fn set_task_story(&self, id: i64, story: &Story) -> Result<()> {
        self.conn
            .execute(
                "UPDATE tasks SET story_id = ?1, project_id = ?2, sprint_id = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                params![story.id, story.project_id, story.sprint_id, id],
            )
            .context("Failed to re-parent task")?;
        self.conn
            .execute(
                "UPDATE phase_durations SET story_id = ?1, sprint_id = ?2 WHERE task_id = ?3 AND time_end IS NULL",
                params![story.id, story.sprint_id, id],
            )
            .context("Failed to re-parent open phase durations")?;
        Ok(())
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{self, date};
    use super::*;

    #[test]
    fn test_create_task_copies_story_placement() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let sprint = fixtures::sprint(&db, &project, date(2024, 2, 1), date(2024, 2, 14));
        let story = fixtures::story(&db, &project, Some(sprint.id), "Story");
        let task = fixtures::task(&db, &story, "Task");

        assert_eq!(task.story_id, story.id);
        assert_eq!(task.project_id, project.id);
        assert_eq!(task.sprint_id, Some(sprint.id));
        assert!(!task.is_done);
        assert!(task.time_start.is_none());
        Ok(())
    }

    #[test]
    fn test_create_task_opens_phase_duration() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Story");
        let task = fixtures::task(&db, &story, "Task");

        let durations = db.list_phase_durations(task.id)?;
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].phase_id, task.phase_id);
        assert!(durations[0].time_end.is_none());
        Ok(())
    }

    #[test]
    fn test_create_task_rejects_foreign_phase() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let other = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Story");
        let foreign = db.first_phase(other.id)?.unwrap();
        let type_id = db.list_task_types()?[0].id;
        let err = db
            .create_task(
                &story,
                foreign.id,
                type_id,
                &NewTask {
                    title: "x".into(),
                    description: String::new(),
                    user_id: None,
                    phase_id: None,
                    type_id: None,
                    priority: 0,
                },
            )
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_create_task_in_done_phase_is_started_and_finished() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Story");
        let done_phase = db
            .list_phases(project.id)?
            .into_iter()
            .find(|p| p.is_done)
            .unwrap();
        let type_id = db.list_task_types()?[0].id;
        let task = db.create_task(
            &story,
            done_phase.id,
            type_id,
            &NewTask {
                title: "Already shipped".into(),
                description: String::new(),
                user_id: None,
                phase_id: Some(done_phase.id),
                type_id: None,
                priority: 0,
            },
        )?;
        assert!(task.is_done);
        assert!(task.time_start.is_some());
        assert!(task.time_end.is_some());
        assert!(db.require_story(story.id)?.time_start.is_some());
        Ok(())
    }

    #[test]
    fn test_set_task_phase_tracks_done_state() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Story");
        let task = fixtures::task(&db, &story, "Task");
        let phases = db.list_phases(project.id)?;

        db.set_task_phase(task.id, &phases[2], true)?;
        let done = db.require_task(task.id)?;
        assert!(done.is_done);
        assert!(done.time_start.is_some());
        assert!(done.time_end.is_some());

        db.set_task_phase(task.id, &phases[1], true)?;
        let reopened = db.require_task(task.id)?;
        assert!(!reopened.is_done);
        assert!(reopened.time_end.is_none());
        assert_eq!(reopened.time_start, done.time_start);
        Ok(())
    }

    #[test]
    fn test_update_task_assigns_and_unassigns_user() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let dev = fixtures::user(&db, "dev", false);
        let project = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Story");
        let task = fixtures::task(&db, &story, "Task");

        let assigned = db.update_task(
            task.id,
            &TaskPatch {
                user_id: Some(Some(dev.id)),
                ..Default::default()
            },
        )?;
        assert_eq!(assigned.user_id, Some(dev.id));

        let cleared = db.update_task(
            task.id,
            &TaskPatch {
                user_id: Some(None),
                ..Default::default()
            },
        )?;
        assert_eq!(cleared.user_id, None);
        Ok(())
    }

    #[test]
    fn test_deleting_story_deletes_tasks() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Story");
        let task = fixtures::task(&db, &story, "Task");
        assert!(db.delete_story(story.id)?);
        assert!(db.get_task(task.id)?.is_none());
        assert!(db.list_phase_durations(task.id)?.is_empty());
        Ok(())
    }
}
