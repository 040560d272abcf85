use anyhow::{Context, Result};
use rusqlite::{Row, params};

use super::TaskboardDb;
use crate::models::*;

const HISTORY_COLUMNS: &str = "id, object_name, object_id, object_data, message, user_id, created_at";

struct HistoryDbRow {
    id: i64,
    object_name: String,
    object_id: i64,
    object_data: String,
    message: Option<String>,
    user_id: Option<i64>,
    created_at: String,
}

impl HistoryDbRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            object_name: row.get(1)?,
            object_id: row.get(2)?,
            object_data: row.get(3)?,
            message: row.get(4)?,
            user_id: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_history(self) -> Result<HistoryRow> {
        Ok(HistoryRow {
            id: self.id,
            object_name: self.object_name.parse().map_err(anyhow::Error::msg)?,
            object_id: self.object_id,
            object_data: serde_json::from_str(&self.object_data)
                .with_context(|| format!("Invalid snapshot in history row {}", self.id))?,
            message: self.message,
            user_id: self.user_id,
            created_at: self.created_at,
        })
    }
}

impl TaskboardDb {
    // ── History ───────────────────────────────────────────────────────

    pub fn insert_history(
        &self,
        object: ObjectRef,
        data: &serde_json::Value,
        message: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<HistoryRow> {
        self.conn
            .execute(
                "INSERT INTO history (object_name, object_id, object_data, message, user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    object.kind.as_str(),
                    object.id,
                    serde_json::to_string(data)?,
                    message,
                    user_id
                ],
            )
            .context("Failed to insert history row")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {HISTORY_COLUMNS} FROM history WHERE id = ?1"),
                params![id],
                HistoryDbRow::from_row,
            )
            .context("History row not found after insert")?
            .into_history()
    }

    /// Every snapshot of an object, oldest first.
    pub fn list_history(&self, object: ObjectRef) -> Result<Vec<HistoryRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM history WHERE object_name = ?1 AND object_id = ?2 ORDER BY id"
            ))
            .context("Failed to prepare list_history")?;
        let rows = stmt
            .query_map(params![object.kind.as_str(), object.id], HistoryDbRow::from_row)
            .context("Failed to query history")?;
        let mut out = Vec::new();
        for row in rows {
            let r = row.context("Failed to read history row")?;
            out.push(r.into_history()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_history_rows_in_insert_order() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let user = fixtures::user(&db, "u", false);
        let target = ObjectRef::story(1);
        db.insert_history(target, &json!({"title": "a"}), None, Some(user.id))?;
        db.insert_history(target, &json!({"title": "b"}), Some("renamed"), Some(user.id))?;
        db.insert_history(ObjectRef::story(2), &json!({}), None, None)?;

        let rows = db.list_history(target)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].object_data["title"], "a");
        assert_eq!(rows[1].message.as_deref(), Some("renamed"));
        assert_eq!(rows[1].object_name, ObjectKind::Story);
        Ok(())
    }
}
