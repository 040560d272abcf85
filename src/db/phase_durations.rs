use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::TaskboardDb;
use crate::models::*;

const DURATION_COLUMNS: &str =
    "id, task_id, phase_id, story_id, sprint_id, project_id, time_start, time_end";

fn duration_from_row(row: &Row) -> rusqlite::Result<PhaseDuration> {
    Ok(PhaseDuration {
        id: row.get(0)?,
        task_id: row.get(1)?,
        phase_id: row.get(2)?,
        story_id: row.get(3)?,
        sprint_id: row.get(4)?,
        project_id: row.get(5)?,
        time_start: row.get(6)?,
        time_end: row.get(7)?,
    })
}

impl TaskboardDb {
    // ── Phase durations ───────────────────────────────────────────────

    /// Open a duration row for the task's current phase.
    pub fn start_phase_duration(&self, task: &Task) -> Result<PhaseDuration> {
        self.conn
            .execute(
                "INSERT INTO phase_durations (task_id, phase_id, story_id, sprint_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    task.id,
                    task.phase_id,
                    task.story_id,
                    task.sprint_id,
                    task.project_id
                ],
            )
            .context("Failed to open phase duration")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {DURATION_COLUMNS} FROM phase_durations WHERE id = ?1"),
                params![id],
                duration_from_row,
            )
            .context("Phase duration not found after insert")
    }

    /// Close every open duration row of a task. Returns how many were closed.
    pub fn close_phase_durations(&self, task_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE phase_durations SET time_end = datetime('now') WHERE task_id = ?1 AND time_end IS NULL",
                params![task_id],
            )
            .context("Failed to close phase durations")
    }

    /// The most recent open row of a task, if any.
    pub fn open_phase_duration(&self, task_id: i64) -> Result<Option<PhaseDuration>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {DURATION_COLUMNS} FROM phase_durations
                     WHERE task_id = ?1 AND time_end IS NULL ORDER BY id DESC LIMIT 1"
                ),
                params![task_id],
                duration_from_row,
            )
            .optional()
            .context("Failed to query open phase duration")
    }

    pub fn list_phase_durations(&self, task_id: i64) -> Result<Vec<PhaseDuration>> {
        self.query_durations(
            &format!("SELECT {DURATION_COLUMNS} FROM phase_durations WHERE task_id = ?1 ORDER BY id"),
            params![task_id],
        )
    }

    /// Every duration row recorded while tasks sat in `sprint_id`.
    pub fn list_sprint_phase_durations(&self, sprint_id: i64) -> Result<Vec<PhaseDuration>> {
        self.query_durations(
            &format!(
                "SELECT {DURATION_COLUMNS} FROM phase_durations WHERE sprint_id = ?1 ORDER BY phase_id, id"
            ),
            params![sprint_id],
        )
    }

    fn query_durations(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PhaseDuration>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare phase duration query")?;
        let rows = stmt
            .query_map(args, duration_from_row)
            .context("Failed to query phase durations")?;
        let mut durations = Vec::new();
        for row in rows {
            durations.push(row.context("Failed to read phase duration row")?);
        }
        Ok(durations)
    }

    /// Current database clock, in the same format as stored timestamps.
    pub fn now(&self) -> Result<String> {
        self.conn
            .query_row("SELECT datetime('now')", [], |row| row.get(0))
            .context("Failed to read database clock")
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;

    #[test]
    fn test_close_then_open_keeps_one_open_row() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Story");
        let task = fixtures::task(&db, &story, "Task");

        assert_eq!(db.close_phase_durations(task.id)?, 1);
        assert!(db.open_phase_duration(task.id)?.is_none());
        assert_eq!(db.close_phase_durations(task.id)?, 0);

        let reopened = db.start_phase_duration(&task)?;
        assert_eq!(db.open_phase_duration(task.id)?.map(|d| d.id), Some(reopened.id));
        assert_eq!(db.list_phase_durations(task.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_now_matches_stored_format() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let now = db.now()?;
        assert!(chrono::NaiveDateTime::parse_from_str(&now, "%Y-%m-%d %H:%M:%S").is_ok());
        Ok(())
    }
}
