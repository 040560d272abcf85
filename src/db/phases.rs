use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;

const PHASE_COLUMNS: &str = "id, project_id, title, description, sort_order, tasks, is_done, background_color, created_at, updated_at";

fn phase_from_row(row: &Row) -> rusqlite::Result<Phase> {
    Ok(Phase {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        order: row.get(4)?,
        tasks: row.get(5)?,
        is_done: row.get(6)?,
        background_color: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl TaskboardDb {
    // ── Phase CRUD ────────────────────────────────────────────────────

    pub fn create_phase(&self, project_id: i64, new: &NewPhase) -> Result<Phase> {
        if new.tasks < 0 {
            return Err(BoardError::validation("Phase task limit must not be negative").into());
        }
        let order = match new.order {
            Some(o) => o,
            None => {
                let max: i32 = self
                    .conn
                    .query_row(
                        "SELECT COALESCE(MAX(sort_order), -1) FROM phases WHERE project_id = ?1",
                        params![project_id],
                        |row| row.get(0),
                    )
                    .context("Failed to get max phase order")?;
                max + 1
            }
        };
        self.conn
            .execute(
                "INSERT INTO phases (project_id, title, description, sort_order, tasks, is_done, background_color)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    project_id,
                    new.title,
                    new.description,
                    order,
                    new.tasks,
                    new.is_done,
                    new.background_color
                ],
            )
            .context("Failed to insert phase")?;
        let id = self.conn.last_insert_rowid();
        self.get_phase(id)?.context("Phase not found after insert")
    }

    pub fn get_phase(&self, id: i64) -> Result<Option<Phase>> {
        self.conn
            .query_row(
                &format!("SELECT {PHASE_COLUMNS} FROM phases WHERE id = ?1"),
                params![id],
                phase_from_row,
            )
            .optional()
            .context("Failed to query phase")
    }

    pub fn require_phase(&self, id: i64) -> Result<Phase> {
        self.get_phase(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::new(ObjectKind::Phase, id)).into())
    }

    /// Phases of a project in board order.
    pub fn list_phases(&self, project_id: i64) -> Result<Vec<Phase>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PHASE_COLUMNS} FROM phases WHERE project_id = ?1 ORDER BY sort_order, id"
            ))
            .context("Failed to prepare list_phases")?;
        let rows = stmt
            .query_map(params![project_id], phase_from_row)
            .context("Failed to query phases")?;
        let mut phases = Vec::new();
        for row in rows {
            phases.push(row.context("Failed to read phase row")?);
        }
        Ok(phases)
    }

    /// The lowest-order phase, where new tasks start.
    pub fn first_phase(&self, project_id: i64) -> Result<Option<Phase>> {
        Ok(self.list_phases(project_id)?.into_iter().next())
    }

    pub fn update_phase(&self, id: i64, patch: &PhasePatch) -> Result<Phase> {
        let current = self.require_phase(id)?;
        let tasks = patch.tasks.unwrap_or(current.tasks);
        if tasks < 0 {
            return Err(BoardError::validation("Phase task limit must not be negative").into());
        }
        self.conn
            .execute(
                "UPDATE phases SET title = ?1, description = ?2, tasks = ?3, is_done = ?4, background_color = ?5,
                    updated_at = datetime('now') WHERE id = ?6",
                params![
                    patch.title.as_ref().unwrap_or(&current.title),
                    patch.description.as_ref().unwrap_or(&current.description),
                    tasks,
                    patch.is_done.unwrap_or(current.is_done),
                    patch.background_color.as_ref().unwrap_or(&current.background_color),
                    id
                ],
            )
            .context("Failed to update phase")?;
        self.require_phase(id)
    }

    /// Delete a phase. Phases still holding tasks cannot be removed.
    pub fn delete_phase(&self, id: i64) -> Result<bool> {
        let in_use: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE phase_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to count phase tasks")?;
        if in_use > 0 {
            return Err(BoardError::Conflict(format!(
                "Phase {} still holds {} task(s); move them first",
                id, in_use
            ))
            .into());
        }
        let count = self
            .conn
            .execute("DELETE FROM phases WHERE id = ?1", params![id])
            .context("Failed to delete phase")?;
        Ok(count > 0)
    }

    /// Rewrite phase order to match `ids`. The list must name every phase of
    /// the project exactly once.
    pub fn reorder_phases(&self, project_id: i64, ids: &[i64]) -> Result<Vec<Phase>> {
        let mut current: Vec<i64> = self.list_phases(project_id)?.iter().map(|p| p.id).collect();
        let mut requested = ids.to_vec();
        current.sort_unstable();
        requested.sort_unstable();
        if current != requested {
            return Err(BoardError::validation(
                "Phase order must list every phase of the project exactly once",
            )
            .into());
        }
        for (order, id) in ids.iter().enumerate() {
            self.conn
                .execute(
                    "UPDATE phases SET sort_order = ?1, updated_at = datetime('now') WHERE id = ?2",
                    params![order as i32, id],
                )
                .context("Failed to update phase order")?;
        }
        self.list_phases(project_id)
    }

    /// Tasks currently in `phase_id` within one sprint (or the backlog when
    /// `sprint_id` is `None`).
    pub fn count_tasks_in_phase(&self, phase_id: i64, sprint_id: Option<i64>) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE phase_id = ?1 AND sprint_id IS ?2",
                params![phase_id, sprint_id],
                |row| row.get(0),
            )
            .context("Failed to count tasks in phase")
    }

    // ── Task types ────────────────────────────────────────────────────

    pub fn list_task_types(&self) -> Result<Vec<TaskType>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, sort_order, chart_color, class FROM task_types ORDER BY sort_order, id")
            .context("Failed to prepare list_task_types")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TaskType {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    order: row.get(2)?,
                    chart_color: row.get(3)?,
                    class: row.get(4)?,
                })
            })
            .context("Failed to query task types")?;
        let mut types = Vec::new();
        for row in rows {
            types.push(row.context("Failed to read task type row")?);
        }
        Ok(types)
    }

    pub fn get_task_type(&self, id: i64) -> Result<Option<TaskType>> {
        Ok(self.list_task_types()?.into_iter().find(|t| t.id == id))
    }
}
