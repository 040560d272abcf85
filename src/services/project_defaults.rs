//! New-project setup.

use anyhow::Result;

use crate::config::PhaseTemplate;
use crate::db::TaskboardDb;
use crate::models::{NewPhase, NewProject, Project, User};

/// Create a project with its default board columns. The creator manages the
/// project unless `new.manager_id` names someone else. Must run inside a
/// transaction so a failed phase insert leaves no half-built project.
pub fn create_project(
    db: &TaskboardDb,
    creator: &User,
    new: &NewProject,
    phases: &[PhaseTemplate],
) -> Result<Project> {
    let manager_id = new.manager_id.unwrap_or(creator.id);
    db.require_user(manager_id)?;
    let project = db.create_project(&NewProject {
        manager_id: Some(manager_id),
        ..new.clone()
    })?;
    for (order, template) in phases.iter().enumerate() {
        db.create_phase(
            project.id,
            &NewPhase {
                title: template.title.clone(),
                description: template.description.clone(),
                order: Some(order as i32),
                tasks: template.tasks,
                is_done: template.is_done,
                background_color: template.background_color.clone(),
            },
        )?;
    }
    tracing::debug!(project_id = project.id, phases = phases.len(), "Created project");
    Ok(project)
}
