use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{TaskboardDb, parse_date};
use crate::errors::BoardError;
use crate::models::*;
use crate::services::dates::{self, DateRange};

const PROJECT_COLUMNS: &str =
    "id, title, description, manager_id, date_start, date_end, created_at, updated_at";

struct ProjectRow {
    id: i64,
    title: String,
    description: String,
    manager_id: i64,
    date_start: String,
    date_end: String,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            manager_id: row.get(3)?,
            date_start: row.get(4)?,
            date_end: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_project(self) -> Result<Project> {
        Ok(Project {
            id: self.id,
            title: self.title,
            description: self.description,
            manager_id: self.manager_id,
            date_start: parse_date(&self.date_start)?,
            date_end: parse_date(&self.date_end)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TaskboardDb {
    // ── Project CRUD ──────────────────────────────────────────────────

    /// Insert a project. `new.manager_id` must already be resolved by the
    /// caller; phases are not created here.
    pub fn create_project(&self, new: &NewProject) -> Result<Project> {
        let manager_id = new
            .manager_id
            .ok_or_else(|| BoardError::validation("Project manager is required"))?;
        DateRange::new(new.date_start, new.date_end)?;
        self.conn
            .execute(
                "INSERT INTO projects (title, description, manager_id, date_start, date_end) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.title,
                    new.description,
                    manager_id,
                    new.date_start.to_string(),
                    new.date_end.to_string()
                ],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![id],
                ProjectRow::from_row,
            )
            .optional()
            .context("Failed to query project")?;
        row.map(ProjectRow::into_project).transpose()
    }

    /// Fetch a project or fail with `NotFound`.
    pub fn require_project(&self, id: i64) -> Result<Project> {
        self.get_project(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::project(id)).into())
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.query_projects(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY date_start, id"),
            params![],
        )
    }

    /// Projects the user manages or is a member of.
    pub fn list_projects_for_user(&self, user_id: i64) -> Result<Vec<Project>> {
        self.query_projects(
            &format!(
                "SELECT {PROJECT_COLUMNS} FROM projects
                 WHERE manager_id = ?1
                    OR id IN (SELECT project_id FROM project_users WHERE user_id = ?1)
                 ORDER BY date_start, id"
            ),
            params![user_id],
        )
    }

    fn query_projects(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare project query")?;
        let rows = stmt
            .query_map(args, ProjectRow::from_row)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            let r = row.context("Failed to read project row")?;
            projects.push(r.into_project()?);
        }
        Ok(projects)
    }

    pub fn update_project(&self, id: i64, patch: &ProjectPatch) -> Result<Project> {
        let current = self.require_project(id)?;
        let title = patch.title.as_ref().unwrap_or(&current.title);
        let description = patch.description.as_ref().unwrap_or(&current.description);
        let manager_id = patch.manager_id.unwrap_or(current.manager_id);
        let date_start = patch.date_start.unwrap_or(current.date_start);
        let date_end = patch.date_end.unwrap_or(current.date_end);
        if patch.date_start.is_some() || patch.date_end.is_some() {
            let range = DateRange::new(date_start, date_end)?;
            dates::check_project(range, &self.list_sprints(id)?)?;
        }
        self.conn
            .execute(
                "UPDATE projects SET title = ?1, description = ?2, manager_id = ?3, date_start = ?4, date_end = ?5,
                    updated_at = datetime('now') WHERE id = ?6",
                params![
                    title,
                    description,
                    manager_id,
                    date_start.to_string(),
                    date_end.to_string(),
                    id
                ],
            )
            .context("Failed to update project")?;
        self.require_project(id)
    }

    pub fn delete_project(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    pub fn count_sprints(&self, project_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM sprints WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to count sprints")
    }

    pub fn count_backlog(&self, project_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM stories WHERE project_id = ?1 AND sprint_id IS NULL",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to count backlog stories")
    }

    // ── Memberships ───────────────────────────────────────────────────

    pub fn member_role(&self, project_id: i64, user_id: i64) -> Result<Option<Role>> {
        let raw: Option<i64> = self
            .conn
            .query_row(
                "SELECT role FROM project_users WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query membership")?;
        match raw {
            Some(value) => Role::from_i64(value)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("invalid role in database: {}", value)),
            None => Ok(None),
        }
    }

    /// Add a member or change an existing member's role.
    pub fn set_member(&self, project_id: i64, user_id: i64, role: Role) -> Result<ProjectMember> {
        self.conn
            .execute(
                "INSERT INTO project_users (project_id, user_id, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(project_id, user_id) DO UPDATE SET role = ?3",
                params![project_id, user_id, role.as_i64()],
            )
            .context("Failed to upsert project member")?;
        self.conn
            .query_row(
                "SELECT id, project_id, user_id, role FROM project_users WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?)),
            )
            .context("Project member not found after upsert")
            .and_then(|(id, project_id, user_id, raw)| {
                Ok(ProjectMember {
                    id,
                    project_id,
                    user_id,
                    role: Role::from_i64(raw)
                        .ok_or_else(|| anyhow::anyhow!("invalid role in database: {}", raw))?,
                })
            })
    }

    pub fn remove_member(&self, project_id: i64, user_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM project_users WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
            )
            .context("Failed to delete project member")?;
        Ok(count > 0)
    }

    pub fn list_members(&self, project_id: i64) -> Result<Vec<ProjectMemberView>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT pu.id, pu.project_id, pu.user_id, pu.role
                 FROM project_users pu JOIN users u ON u.id = pu.user_id
                 WHERE pu.project_id = ?1 ORDER BY u.username",
            )
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .context("Failed to query project members")?;
        let mut members = Vec::new();
        for row in rows {
            let (id, project_id, user_id, raw) = row.context("Failed to read project member row")?;
            let role = Role::from_i64(raw)
                .ok_or_else(|| anyhow::anyhow!("invalid role in database: {}", raw))?;
            let user = self
                .get_user(user_id)?
                .context("Member user vanished during listing")?;
            members.push(ProjectMemberView {
                member: ProjectMember {
                    id,
                    project_id,
                    user_id,
                    role,
                },
                user,
            });
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;

    #[test]
    fn test_create_project() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        assert_eq!(project.title, "Apollo");
        assert_eq!(project.manager_id, manager.id);
        assert_eq!(project.date_start, fixtures::date(2024, 1, 1));
        Ok(())
    }

    #[test]
    fn test_create_project_requires_manager() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let err = db
            .create_project(&NewProject {
                title: "Orphan".into(),
                description: String::new(),
                manager_id: None,
                date_start: fixtures::date(2024, 1, 1),
                date_end: fixtures::date(2024, 2, 1),
            })
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_list_projects_for_user() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let member = fixtures::user(&db, "member", false);
        let outsider = fixtures::user(&db, "outsider", false);
        let project = fixtures::project(&db, &manager);
        db.set_member(project.id, member.id, Role::Viewer)?;

        assert_eq!(db.list_projects_for_user(manager.id)?.len(), 1);
        assert_eq!(db.list_projects_for_user(member.id)?.len(), 1);
        assert!(db.list_projects_for_user(outsider.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_update_project_fields() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let updated = db.update_project(
            project.id,
            &ProjectPatch {
                title: Some("Artemis".into()),
                date_end: Some(fixtures::date(2025, 6, 30)),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.title, "Artemis");
        assert_eq!(updated.date_end, fixtures::date(2025, 6, 30));
        assert_eq!(updated.date_start, project.date_start);
        Ok(())
    }

    #[test]
    fn test_update_project_cannot_strand_sprints() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        fixtures::sprint(&db, &project, fixtures::date(2024, 11, 1), fixtures::date(2024, 11, 14));
        let err = db
            .update_project(
                project.id,
                &ProjectPatch {
                    date_end: Some(fixtures::date(2024, 10, 31)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_membership_upsert_and_remove() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let member = fixtures::user(&db, "member", false);
        let project = fixtures::project(&db, &manager);

        db.set_member(project.id, member.id, Role::Viewer)?;
        let updated = db.set_member(project.id, member.id, Role::Contributor)?;
        assert_eq!(updated.role, Role::Contributor);
        assert_eq!(db.member_role(project.id, member.id)?, Some(Role::Contributor));
        assert_eq!(db.list_members(project.id)?.len(), 1);

        assert!(db.remove_member(project.id, member.id)?);
        assert_eq!(db.member_role(project.id, member.id)?, None);
        Ok(())
    }

    #[test]
    fn test_delete_project_cascades() -> Result<()> {
        let db = TaskboardDb::new_in_memory()?;
        let manager = fixtures::user(&db, "manager", false);
        let project = fixtures::project(&db, &manager);
        let story = fixtures::story(&db, &project, None, "Login page");
        fixtures::task(&db, &story, "Form");

        assert!(db.delete_project(project.id)?);
        assert!(db.get_story(story.id)?.is_none());
        assert!(db.list_phases(project.id)?.is_empty());
        Ok(())
    }
}
