use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;
use crate::services::rights;

const COMMENT_COLUMNS: &str =
    "id, object_name, object_id, parent_id, comment, created_user_id, created_at, updated_at";

struct CommentRow {
    id: i64,
    object_name: String,
    object_id: i64,
    parent_id: Option<i64>,
    comment: String,
    created_user_id: i64,
    created_at: String,
    updated_at: String,
}

impl CommentRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            object_name: row.get(1)?,
            object_id: row.get(2)?,
            parent_id: row.get(3)?,
            comment: row.get(4)?,
            created_user_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_comment(self) -> Result<Comment> {
        Ok(Comment {
            id: self.id,
            object_name: self.object_name.parse().map_err(anyhow::Error::msg)?,
            object_id: self.object_id,
            parent_id: self.parent_id,
            comment: self.comment,
            created_user_id: self.created_user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TaskboardDb {
    // ── Comments ──────────────────────────────────────────────────────

    /// Attach a comment to `object`. A reply must point at a comment on the
    /// same object.
    pub fn create_comment(
        &self,
        object: ObjectRef,
        parent_id: Option<i64>,
        text: &str,
        user_id: i64,
    ) -> Result<Comment> {
        rights::check_attachable(object)?;
        if text.trim().is_empty() {
            return Err(BoardError::validation("Comment must not be empty").into());
        }
        if let Some(parent_id) = parent_id {
            let parent = self.require_comment(parent_id)?;
            if parent.object_name != object.kind || parent.object_id != object.id {
                return Err(BoardError::validation(format!(
                    "Comment {} is attached to a different object",
                    parent_id
                ))
                .into());
            }
        }
        self.conn
            .execute(
                "INSERT INTO comments (object_name, object_id, parent_id, comment, created_user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![object.kind.as_str(), object.id, parent_id, text, user_id],
            )
            .context("Failed to insert comment")?;
        let id = self.conn.last_insert_rowid();
        self.require_comment(id)
    }

    pub fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                params![id],
                CommentRow::from_row,
            )
            .optional()
            .context("Failed to query comment")?;
        row.map(CommentRow::into_comment).transpose()
    }

    pub fn require_comment(&self, id: i64) -> Result<Comment> {
        self.get_comment(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::new(ObjectKind::Comment, id)).into())
    }

    fn query_comments(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare comment query")?;
        let rows = stmt
            .query_map(args, CommentRow::from_row)
            .context("Failed to query comments")?;
        let mut comments = Vec::new();
        for row in rows {
            let r = row.context("Failed to read comment row")?;
            comments.push(r.into_comment()?);
        }
        Ok(comments)
    }

    /// All comments on an object, oldest first.
    pub fn list_comments(&self, object: ObjectRef) -> Result<Vec<Comment>> {
        self.query_comments(
            &format!(
                "SELECT {COMMENT_COLUMNS} FROM comments WHERE object_name = ?1 AND object_id = ?2 ORDER BY id"
            ),
            params![object.kind.as_str(), object.id],
        )
    }

    /// Direct replies to a comment.
    pub fn list_replies(&self, parent_id: i64) -> Result<Vec<Comment>> {
        self.query_comments(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE parent_id = ?1 ORDER BY id"),
            params![parent_id],
        )
    }

    pub fn list_user_comments(&self, user_id: i64) -> Result<Vec<Comment>> {
        self.query_comments(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE created_user_id = ?1 ORDER BY id"),
            params![user_id],
        )
    }

    pub fn count_comments(&self, object: ObjectRef) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM comments WHERE object_name = ?1 AND object_id = ?2",
                params![object.kind.as_str(), object.id],
                |row| row.get(0),
            )
            .context("Failed to count comments")
    }

    pub fn update_comment(&self, id: i64, text: &str) -> Result<Comment> {
        if text.trim().is_empty() {
            return Err(BoardError::validation("Comment must not be empty").into());
        }
        let count = self
            .conn
            .execute(
                "UPDATE comments SET comment = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![text, id],
            )
            .context("Failed to update comment")?;
        if count == 0 {
            return Err(BoardError::not_found(ObjectRef::new(ObjectKind::Comment, id)).into());
        }
        self.require_comment(id)
    }

    /// Delete a comment together with its replies.
    pub fn delete_comment(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])
            .context("Failed to delete comment")?;
        Ok(count > 0)
    }

    /// Remove the comments and links attached to a deleted object.
    pub fn delete_attachments(&self, object: ObjectRef) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM comments WHERE object_name = ?1 AND object_id = ?2",
                params![object.kind.as_str(), object.id],
            )
            .context("Failed to delete attached comments")?;
        self.conn
            .execute(
                "DELETE FROM links WHERE object_name = ?1 AND object_id = ?2",
                params![object.kind.as_str(), object.id],
            )
            .context("Failed to delete attached links")?;
        Ok(())
    }
}

/// Arrange a flat comment list into threads by `parent_id`. Comments whose
/// parent is missing from the list are treated as top-level.
pub fn build_threads(comments: Vec<Comment>) -> Vec<CommentThread> {
    let ids: std::collections::HashSet<i64> = comments.iter().map(|c| c.id).collect();
    let mut children: HashMap<i64, Vec<Comment>> = HashMap::new();
    let mut roots = Vec::new();
    for comment in comments {
        match comment.parent_id {
            Some(parent) if ids.contains(&parent) => {
                children.entry(parent).or_default().push(comment)
            }
            _ => roots.push(comment),
        }
    }

    fn attach(comment: Comment, children: &mut HashMap<i64, Vec<Comment>>) -> CommentThread {
        let replies = children
            .remove(&comment.id)
            .unwrap_or_default()
            .into_iter()
            .map(|c| attach(c, children))
            .collect();
        CommentThread { comment, replies }
    }

    roots
        .into_iter()
        .map(|c| attach(c, &mut children))
        .collect()
}
