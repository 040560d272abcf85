use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{TaskboardDb, parse_optional_date};
use crate::errors::BoardError;
use crate::models::*;

const MILESTONE_COLUMNS: &str =
    "id, project_id, title, description, deadline, created_at, updated_at";

struct MilestoneRow {
    id: i64,
    project_id: i64,
    title: String,
    description: String,
    deadline: Option<String>,
    created_at: String,
    updated_at: String,
}

impl MilestoneRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            deadline: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_milestone(self) -> Result<Milestone> {
        Ok(Milestone {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            deadline: parse_optional_date(self.deadline)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TaskboardDb {
    // ── Milestones ────────────────────────────────────────────────────

    pub fn create_milestone(&self, project_id: i64, new: &NewMilestone) -> Result<Milestone> {
        self.require_project(project_id)?;
        self.conn
            .execute(
                "INSERT INTO milestones (project_id, title, description, deadline) VALUES (?1, ?2, ?3, ?4)",
                params![
                    project_id,
                    new.title,
                    new.description,
                    new.deadline.map(|d| d.to_string())
                ],
            )
            .context("Failed to insert milestone")?;
        let id = self.conn.last_insert_rowid();
        self.require_milestone(id)
    }

    pub fn get_milestone(&self, id: i64) -> Result<Option<Milestone>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE id = ?1"),
                params![id],
                MilestoneRow::from_row,
            )
            .optional()
            .context("Failed to query milestone")?;
        row.map(MilestoneRow::into_milestone).transpose()
    }

    pub fn require_milestone(&self, id: i64) -> Result<Milestone> {
        self.get_milestone(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::new(ObjectKind::Milestone, id)).into())
    }

    /// Milestones of a project, soonest deadline first; undated ones last.
    pub fn list_milestones(&self, project_id: i64) -> Result<Vec<Milestone>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {MILESTONE_COLUMNS} FROM milestones WHERE project_id = ?1
                 ORDER BY deadline IS NULL, deadline, id"
            ))
            .context("Failed to prepare list_milestones")?;
        let rows = stmt
            .query_map(params![project_id], MilestoneRow::from_row)
            .context("Failed to query milestones")?;
        let mut milestones = Vec::new();
        for row in rows {
            let r = row.context("Failed to read milestone row")?;
            milestones.push(r.into_milestone()?);
        }
        Ok(milestones)
    }

    pub fn update_milestone(&self, id: i64, patch: &MilestonePatch) -> Result<Milestone> {
        let current = self.require_milestone(id)?;
        let deadline = patch.deadline.unwrap_or(current.deadline);
        self.conn
            .execute(
                "UPDATE milestones SET title = ?1, description = ?2, deadline = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                params![
                    patch.title.as_ref().unwrap_or(&current.title),
                    patch.description.as_ref().unwrap_or(&current.description),
                    deadline.map(|d| d.to_string()),
                    id
                ],
            )
            .context("Failed to update milestone")?;
        self.require_milestone(id)
    }

    /// Delete a milestone; its stories keep existing without one.
    pub fn delete_milestone(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM milestones WHERE id = ?1", params![id])
            .context("Failed to delete milestone")?;
        Ok(count > 0)
    }
}
