use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;

const STORY_COLUMNS: &str = "id, project_id, sprint_id, milestone_id, parent_id, title, description, estimate, priority, is_done, time_start, time_end, created_at, updated_at";

fn story_from_row(row: &Row) -> rusqlite::Result<Story> {
    Ok(Story {
        id: row.get(0)?,
        project_id: row.get(1)?,
        sprint_id: row.get(2)?,
        milestone_id: row.get(3)?,
        parent_id: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        estimate: row.get(7)?,
        priority: row.get(8)?,
        is_done: row.get(9)?,
        time_start: row.get(10)?,
        time_end: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl TaskboardDb {
    // ── Story CRUD ────────────────────────────────────────────────────

    pub fn create_story(&self, project_id: i64, new: &NewStory) -> Result<Story> {
        self.check_story_relations(project_id, new.sprint_id, new.milestone_id)?;
        if let Some(estimate) = new.estimate
            && estimate < 0.0
        {
            return Err(BoardError::validation("Story estimate must not be negative").into());
        }
        self.conn
            .execute(
                "INSERT INTO stories (project_id, sprint_id, milestone_id, title, description, estimate, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    project_id,
                    new.sprint_id,
                    new.milestone_id,
                    new.title,
                    new.description,
                    new.estimate,
                    new.priority
                ],
            )
            .context("Failed to insert story")?;
        let id = self.conn.last_insert_rowid();
        self.require_story(id)
    }

    /// Insert a copy of `original` into `sprint_id`, pointing back at it via
    /// `parent_id`. Tasks are not copied.
    pub fn insert_split_story(&self, original: &Story, sprint_id: Option<i64>) -> Result<Story> {
        self.check_story_relations(original.project_id, sprint_id, None)?;
        self.conn
            .execute(
                "INSERT INTO stories (project_id, sprint_id, milestone_id, parent_id, title, description, estimate, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    original.project_id,
                    sprint_id,
                    original.milestone_id,
                    original.id,
                    original.title,
                    original.description,
                    original.estimate,
                    original.priority
                ],
            )
            .context("Failed to insert split story")?;
        let id = self.conn.last_insert_rowid();
        self.require_story(id)
    }

    /// Sprint and milestone references must belong to the story's project.
    fn check_story_relations(
        &self,
        project_id: i64,
        sprint_id: Option<i64>,
        milestone_id: Option<i64>,
    ) -> Result<()> {
        if let Some(sprint_id) = sprint_id {
            let sprint = self.require_sprint(sprint_id)?;
            if sprint.project_id != project_id {
                return Err(BoardError::validation(format!(
                    "Sprint {} belongs to another project",
                    sprint_id
                ))
                .into());
            }
        }
        if let Some(milestone_id) = milestone_id {
            let milestone = self.require_milestone(milestone_id)?;
            if milestone.project_id != project_id {
                return Err(BoardError::validation(format!(
                    "Milestone {} belongs to another project",
                    milestone_id
                ))
                .into());
            }
        }
        Ok(())
    }

    pub fn get_story(&self, id: i64) -> Result<Option<Story>> {
        self.conn
            .query_row(
                &format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1"),
                params![id],
                story_from_row,
            )
            .optional()
            .context("Failed to query story")
    }

    pub fn require_story(&self, id: i64) -> Result<Story> {
        self.get_story(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::story(id)).into())
    }

    fn query_stories(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Story>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare story query")?;
        let rows = stmt
            .query_map(args, story_from_row)
            .context("Failed to query stories")?;
        let mut stories = Vec::new();
        for row in rows {
            stories.push(row.context("Failed to read story row")?);
        }
        Ok(stories)
    }

    /// Stories of a sprint, highest priority first.
    pub fn list_sprint_stories(&self, sprint_id: i64) -> Result<Vec<Story>> {
        self.query_stories(
            &format!(
                "SELECT {STORY_COLUMNS} FROM stories WHERE sprint_id = ?1 ORDER BY priority DESC, id"
            ),
            params![sprint_id],
        )
    }

    /// Every story of a project, planned or not.
    pub fn list_project_stories(&self, project_id: i64) -> Result<Vec<Story>> {
        self.query_stories(
            &format!("SELECT {STORY_COLUMNS} FROM stories WHERE project_id = ?1 ORDER BY id"),
            params![project_id],
        )
    }

    /// Stories of a project not planned into any sprint.
    pub fn list_backlog(&self, project_id: i64) -> Result<Vec<Story>> {
        self.query_stories(
            &format!(
                "SELECT {STORY_COLUMNS} FROM stories WHERE project_id = ?1 AND sprint_id IS NULL ORDER BY priority DESC, id"
            ),
            params![project_id],
        )
    }

    pub fn list_milestone_stories(&self, milestone_id: i64) -> Result<Vec<Story>> {
        self.query_stories(
            &format!(
                "SELECT {STORY_COLUMNS} FROM stories WHERE milestone_id = ?1 ORDER BY priority DESC, id"
            ),
            params![milestone_id],
        )
    }

    pub fn update_story(&self, id: i64, patch: &StoryPatch) -> Result<Story> {
        let current = self.require_story(id)?;
        let milestone_id = patch.milestone_id.unwrap_or(current.milestone_id);
        if patch.milestone_id.is_some() {
            self.check_story_relations(current.project_id, None, milestone_id)?;
        }
        let estimate = patch.estimate.unwrap_or(current.estimate);
        if let Some(e) = estimate
            && e < 0.0
        {
            return Err(BoardError::validation("Story estimate must not be negative").into());
        }
        self.conn
            .execute(
                "UPDATE stories SET title = ?1, description = ?2, milestone_id = ?3, estimate = ?4, priority = ?5,
                    updated_at = datetime('now') WHERE id = ?6",
                params![
                    patch.title.as_ref().unwrap_or(&current.title),
                    patch.description.as_ref().unwrap_or(&current.description),
                    milestone_id,
                    estimate,
                    patch.priority.unwrap_or(current.priority),
                    id
                ],
            )
            .context("Failed to update story")?;
        if let Some(done) = patch.is_done
            && done != current.is_done
        {
            self.set_story_done(id, done)?;
        }
        self.require_story(id)
    }

    /// Flip the done flag, stamping or clearing `time_end`.
    pub fn set_story_done(&self, id: i64, done: bool) -> Result<()> {
        let sql = if done {
            "UPDATE stories SET is_done = 1, time_end = COALESCE(time_end, datetime('now')), updated_at = datetime('now') WHERE id = ?1"
        } else {
            "UPDATE stories SET is_done = 0, time_end = NULL, updated_at = datetime('now') WHERE id = ?1"
        };
        self.conn
            .execute(sql, params![id])
            .context("Failed to update story done state")?;
        Ok(())
    }

    /// Stamp `time_start` the first time work begins on the story.
    pub fn mark_story_started(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE stories SET time_start = datetime('now') WHERE id = ?1 AND time_start IS NULL",
                params![id],
            )
            .context("Failed to stamp story start")?;
        Ok(())
    }

    /// Move a story to another sprint (or the backlog). Tasks and their open
    /// phase durations follow the story.
    pub fn set_story_sprint(&self, id: i64, sprint_id: Option<i64>) -> Result<Story> {
        let current = self.require_story(id)?;
        self.check_story_relations(current.project_id, sprint_id, None)?;
        self.conn
            .execute(
                "UPDATE stories SET sprint_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![sprint_id, id],
            )
            .context("Failed to move story")?;
        self.conn
            .execute(
                "UPDATE tasks SET sprint_id = ?1, updated_at = datetime('now') WHERE story_id = ?2",
                params![sprint_id, id],
            )
            .context("Failed to move story tasks")?;
        self.conn
            .execute(
                "UPDATE phase_durations SET sprint_id = ?1 WHERE story_id = ?2 AND time_end IS NULL",
                params![sprint_id, id],
            )
            .context("Failed to move open phase durations")?;
        self.require_story(id)
    }

    pub fn delete_story(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM stories WHERE id = ?1", params![id])
            .context("Failed to delete story")?;
        Ok(count > 0)
    }
}
