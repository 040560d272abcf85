use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;
use crate::services::{links, rights};

const EXTERNAL_LINK_COLUMNS: &str =
    "id, project_id, title, description, link, parameters, created_at";
const LINK_COLUMNS: &str = "id, object_name, object_id, external_link_id, name, url, created_at";

struct ExternalLinkRow {
    id: i64,
    project_id: i64,
    title: String,
    description: String,
    link: String,
    parameters: String,
    created_at: String,
}

impl ExternalLinkRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            link: row.get(4)?,
            parameters: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_external_link(self) -> Result<ExternalLink> {
        Ok(ExternalLink {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            link: self.link,
            parameters: serde_json::from_str(&self.parameters)
                .context("Invalid external link parameters")?,
            created_at: self.created_at,
        })
    }
}

struct LinkRow {
    id: i64,
    object_name: String,
    object_id: i64,
    external_link_id: i64,
    name: String,
    url: String,
    created_at: String,
}

impl LinkRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            object_name: row.get(1)?,
            object_id: row.get(2)?,
            external_link_id: row.get(3)?,
            name: row.get(4)?,
            url: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_link(self) -> Result<Link> {
        Ok(Link {
            id: self.id,
            object_name: self.object_name.parse().map_err(anyhow::Error::msg)?,
            object_id: self.object_id,
            external_link_id: self.external_link_id,
            name: self.name,
            url: self.url,
            created_at: self.created_at,
        })
    }
}

impl TaskboardDb {
    // ── External link templates ───────────────────────────────────────

    pub fn create_external_link(
        &self,
        project_id: i64,
        new: &NewExternalLink,
    ) -> Result<ExternalLink> {
        self.require_project(project_id)?;
        let parameters = links::parameters(&new.link)?;
        self.conn
            .execute(
                "INSERT INTO external_links (project_id, title, description, link, parameters)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    project_id,
                    new.title,
                    new.description,
                    new.link,
                    serde_json::to_string(&parameters)?
                ],
            )
            .context("Failed to insert external link")?;
        let id = self.conn.last_insert_rowid();
        self.require_external_link(id)
    }

    pub fn get_external_link(&self, id: i64) -> Result<Option<ExternalLink>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {EXTERNAL_LINK_COLUMNS} FROM external_links WHERE id = ?1"),
                params![id],
                ExternalLinkRow::from_row,
            )
            .optional()
            .context("Failed to query external link")?;
        row.map(ExternalLinkRow::into_external_link).transpose()
    }

    pub fn require_external_link(&self, id: i64) -> Result<ExternalLink> {
        self.get_external_link(id)?.ok_or_else(|| {
            BoardError::not_found(ObjectRef::new(ObjectKind::ExternalLink, id)).into()
        })
    }

    pub fn list_external_links(&self, project_id: i64) -> Result<Vec<ExternalLink>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {EXTERNAL_LINK_COLUMNS} FROM external_links WHERE project_id = ?1 ORDER BY title, id"
            ))
            .context("Failed to prepare list_external_links")?;
        let rows = stmt
            .query_map(params![project_id], ExternalLinkRow::from_row)
            .context("Failed to query external links")?;
        let mut out = Vec::new();
        for row in rows {
            let r = row.context("Failed to read external link row")?;
            out.push(r.into_external_link()?);
        }
        Ok(out)
    }

    pub fn update_external_link(
        &self,
        id: i64,
        patch: &ExternalLinkPatch,
    ) -> Result<ExternalLink> {
        let current = self.require_external_link(id)?;
        let link = patch.link.as_ref().unwrap_or(&current.link);
        let parameters = links::parameters(link)?;
        self.conn
            .execute(
                "UPDATE external_links SET title = ?1, description = ?2, link = ?3, parameters = ?4 WHERE id = ?5",
                params![
                    patch.title.as_ref().unwrap_or(&current.title),
                    patch.description.as_ref().unwrap_or(&current.description),
                    link,
                    serde_json::to_string(&parameters)?,
                    id
                ],
            )
            .context("Failed to update external link")?;
        self.require_external_link(id)
    }

    /// Delete a template together with every link expanded from it.
    pub fn delete_external_link(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM external_links WHERE id = ?1", params![id])
            .context("Failed to delete external link")?;
        Ok(count > 0)
    }

    // ── Links on objects ──────────────────────────────────────────────

    /// Expand the template with `new.parameters` and attach the result to
    /// the target object.
    pub fn create_link(&self, new: &NewLink) -> Result<Link> {
        rights::check_attachable(ObjectRef::new(new.object_name, new.object_id))?;
        let template = self.require_external_link(new.external_link_id)?;
        let url = links::expand(&template, &new.parameters)?;
        self.conn
            .execute(
                "INSERT INTO links (object_name, object_id, external_link_id, name, url)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.object_name.as_str(),
                    new.object_id,
                    new.external_link_id,
                    new.name,
                    url
                ],
            )
            .context("Failed to insert link")?;
        let id = self.conn.last_insert_rowid();
        self.require_link(id)
    }

    pub fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?1"),
                params![id],
                LinkRow::from_row,
            )
            .optional()
            .context("Failed to query link")?;
        row.map(LinkRow::into_link).transpose()
    }

    pub fn require_link(&self, id: i64) -> Result<Link> {
        self.get_link(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::new(ObjectKind::Link, id)).into())
    }

    fn query_links(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Link>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare link query")?;
        let rows = stmt
            .query_map(args, LinkRow::from_row)
            .context("Failed to query links")?;
        let mut out = Vec::new();
        for row in rows {
            let r = row.context("Failed to read link row")?;
            out.push(r.into_link()?);
        }
        Ok(out)
    }

    pub fn list_links(&self, object: ObjectRef) -> Result<Vec<Link>> {
        self.query_links(
            &format!(
                "SELECT {LINK_COLUMNS} FROM links WHERE object_name = ?1 AND object_id = ?2 ORDER BY id"
            ),
            params![object.kind.as_str(), object.id],
        )
    }

    /// Links expanded from one external link template.
    pub fn list_template_links(&self, external_link_id: i64) -> Result<Vec<Link>> {
        self.query_links(
            &format!("SELECT {LINK_COLUMNS} FROM links WHERE external_link_id = ?1 ORDER BY id"),
            params![external_link_id],
        )
    }

    pub fn delete_link(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM links WHERE id = ?1", params![id])
            .context("Failed to delete link")?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::fixtures;
    use super::*;

    fn tracker(db: &TaskboardDb, project_id: i64) -> ExternalLink {
        db.create_external_link(
            project_id,
            &NewExternalLink {
                title: "Tracker".into(),
                description: String::new(),
                link: "https://tracker.example.com/:project/issues/:issue".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_external_link_extracts_parameters() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let template = tracker(&db, project.id);
        assert_eq!(template.parameters, vec!["project", "issue"]);
        assert_eq!(db.list_external_links(project.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_create_link_expands_template() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Story");
        let template = tracker(&db, project.id);

        let link = db.create_link(&NewLink {
            object_name: ObjectKind::Story,
            object_id: story.id,
            external_link_id: template.id,
            name: "Issue".into(),
            parameters: BTreeMap::from([
                ("project".to_string(), "apollo".to_string()),
                ("issue".to_string(), "42".to_string()),
            ]),
        })?;
        assert_eq!(link.url, "https://tracker.example.com/apollo/issues/42");
        assert_eq!(db.list_links(ObjectRef::story(story.id))?.len(), 1);

        db.delete_external_link(template.id)?;
        assert!(db.get_link(link.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_create_link_missing_parameter_rejected() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let template = tracker(&db, project.id);
        let err = db
            .create_link(&NewLink {
                object_name: ObjectKind::Project,
                object_id: project.id,
                external_link_id: template.id,
                name: "Issue".into(),
                parameters: BTreeMap::from([("issue".to_string(), "42".to_string())]),
            })
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_link_on_user_rejected() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let template = tracker(&db, project.id);
        let err = db
            .create_link(&NewLink {
                object_name: ObjectKind::User,
                object_id: manager.id,
                external_link_id: template.id,
                name: "Profile".into(),
                parameters: BTreeMap::from([
                    ("project".to_string(), "apollo".to_string()),
                    ("issue".to_string(), "42".to_string()),
                ]),
            })
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));
        Ok(())
    }
}
