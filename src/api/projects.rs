use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;

use super::{ApiError, CurrentUser, SharedState};
use crate::db::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;
use crate::services::{history, project_defaults, rights};
use crate::ws::{WsMessage, broadcast_message};

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: i64,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route(
            "/api/projects/{id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/api/projects/{id}/members/{user_id}",
            put(set_member_role).delete(remove_member),
        )
}

fn summary(db: &TaskboardDb, user: &User, project: Project) -> anyhow::Result<ProjectSummary> {
    let role = rights::project_role(db, user, project.id)?
        .ok_or_else(|| BoardError::Forbidden(format!("Not a member of project {}", project.id)))?;
    Ok(ProjectSummary {
        role,
        sprint_count: db.count_sprints(project.id)?,
        backlog_count: db.count_backlog(project.id)?,
        project,
    })
}

async fn list_projects(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let projects = state
        .db
        .call(move |db| {
            let user = current.user;
            let projects = if user.admin {
                db.list_projects()?
            } else {
                db.list_projects_for_user(user.id)?
            };
            projects
                .into_iter()
                .map(|p| summary(db, &user, p))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await?;
    Ok(Json(projects))
}

async fn get_project(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, id, Role::Viewer)?;
            let project = db.require_project(id)?;
            summary(db, &current.user, project)
        })
        .await?;
    Ok(Json(project))
}

async fn create_project(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<NewProject>,
) -> Result<impl IntoResponse, ApiError> {
    rights::require_admin(&current.user)?;
    let phases = state.config.default_phases().to_vec();
    let project = state
        .db
        .call(move |db| {
            db.transaction(|db| {
                let project = project_defaults::create_project(db, &current.user, &req, &phases)?;
                history::record(db, ObjectRef::project(project.id), &project, None, Some(current.user.id))?;
                for phase in db.list_phases(project.id)? {
                    history::record(
                        db,
                        ObjectRef::new(ObjectKind::Phase, phase.id),
                        &phase,
                        None,
                        Some(current.user.id),
                    )?;
                }
                Ok(project)
            })
        })
        .await?;
    tracing::info!(project_id = project.id, title = %project.title, "Created project");
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::Project, project.id, Some(project.id), &project),
    );
    Ok((StatusCode::CREATED, Json(project)))
}

async fn update_project(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<ProjectPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, id, Role::Administrator)?;
            db.transaction(|db| {
                if let Some(manager_id) = patch.manager_id {
                    db.require_user(manager_id)?;
                }
                let project = db.update_project(id, &patch)?;
                history::record(db, ObjectRef::project(id), &project, None, Some(current.user.id))?;
                Ok(project)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Project, id, Some(id), &project),
    );
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, id, Role::Administrator)?;
            db.transaction(|db| {
                let project = db.require_project(id)?;
                history::record_deletion(db, ObjectRef::project(id), &project, Some(current.user.id))?;
                db.delete_project(id)?;
                Ok(project)
            })
        })
        .await?;
    tracing::info!(project_id = id, title = %project.title, "Deleted project");
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::Project, id, Some(id), &project),
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Members ───────────────────────────────────────────────────────────

async fn list_members(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let members = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, id, Role::Viewer)?;
            db.list_members(id)
        })
        .await?;
    Ok(Json(members))
}

fn store_member(
    db: &TaskboardDb,
    actor: &User,
    project_id: i64,
    user_id: i64,
    role: Role,
) -> anyhow::Result<ProjectMember> {
    rights::authorize_project(db, actor, project_id, Role::Administrator)?;
    db.require_user(user_id)?;
    db.transaction(|db| {
        let member = db.set_member(project_id, user_id, role)?;
        history::record(
            db,
            ObjectRef::project(project_id),
            &db.require_project(project_id)?,
            Some(&format!("member {} set to {}", user_id, role)),
            Some(actor.id),
        )?;
        Ok(member)
    })
}

async fn add_member(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = state
        .db
        .call(move |db| store_member(db, &current.user, id, req.user_id, req.role))
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Project, id, Some(id), &member),
    );
    Ok((StatusCode::CREATED, Json(member)))
}

async fn set_member_role(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path((id, user_id)): Path<(i64, i64)>,
    Json(req): Json<SetRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = state
        .db
        .call(move |db| store_member(db, &current.user, id, user_id, req.role))
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Project, id, Some(id), &member),
    );
    Ok(Json(member))
}

async fn remove_member(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path((id, user_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, id, Role::Administrator)?;
            db.transaction(|db| {
                if !db.remove_member(id, user_id)? {
                    return Err(BoardError::not_found(ObjectRef::new(ObjectKind::User, user_id)).into());
                }
                history::record(
                    db,
                    ObjectRef::project(id),
                    &db.require_project(id)?,
                    Some(&format!("member {} removed", user_id)),
                    Some(current.user.id),
                )?;
                Ok(())
            })
        })
        .await?;
    let removed = serde_json::json!({"removed_user_id": user_id});
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Project, id, Some(id), &removed),
    );
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use super::*;
    use crate::db::fixtures;
    use serde_json::json;

    fn new_project() -> serde_json::Value {
        json!({"title": "Apollo", "date_start": "2024-01-01", "date_end": "2024-06-30"})
    }

    #[tokio::test]
    async fn test_admin_creates_project_with_default_phases() {
        let app = TestApp::new();
        let admin = app.user("admin", true);
        let token = app.token(&admin);

        let (status, body) = app.post("/api/projects", &token, new_project()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["manager_id"], admin.id);
        let id = body["id"].as_i64().unwrap();

        let phases = app.with_db(|db| db.list_phases(id).unwrap());
        let titles: Vec<&str> = phases.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Tasks", "In progress", "Done"]);
        assert!(phases[2].is_done);
    }

    #[tokio::test]
    async fn test_non_admin_cannot_create_project() {
        let app = TestApp::new();
        let bob = app.user("bob", false);
        let (status, _) = app.post("/api/projects", &app.token(&bob), new_project()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invalid_project_dates_rejected() {
        let app = TestApp::new();
        let admin = app.user("admin", true);
        let (status, body) = app
            .post(
                "/api/projects",
                &app.token(&admin),
                json!({"title": "x", "date_start": "2024-06-01", "date_end": "2024-01-01"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_project_list_only_shows_accessible_projects() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let viewer = app.user("viewer", false);
        let outsider = app.user("outsider", false);
        let project = app.project(&manager);
        app.with_db(|db| db.set_member(project.id, viewer.id, Role::Viewer).unwrap());

        let (_, body) = app.get("/api/projects", &app.token(&viewer)).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["role"], "viewer");
        assert_eq!(body[0]["sprint_count"], 0);

        let (_, body) = app.get("/api/projects", &app.token(&outsider)).await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, _) = app
            .get(&format!("/api/projects/{}", project.id), &app.token(&outsider))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.get("/api/projects/999", &app.token(&outsider)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_only_administrators_update_project() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let contributor = app.user("contributor", false);
        let project = app.project(&manager);
        app.with_db(|db| db.set_member(project.id, contributor.id, Role::Contributor).unwrap());
        let uri = format!("/api/projects/{}", project.id);

        let (status, _) = app
            .patch(&uri, &app.token(&contributor), json!({"title": "Renamed"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .patch(&uri, &app.token(&manager), json!({"title": "Renamed"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Renamed");

        let rows = app.with_db(|db| db.list_history(ObjectRef::project(project.id)).unwrap());
        assert_eq!(rows.last().unwrap().object_data["title"], "Renamed");
    }

    #[tokio::test]
    async fn test_member_management() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let bob = app.user("bob", false);
        let project = app.project(&manager);
        let token = app.token(&manager);
        let members = format!("/api/projects/{}/members", project.id);

        let (status, body) = app
            .post(&members, &token, json!({"user_id": bob.id, "role": "contributor"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "contributor");

        let (status, body) = app
            .send(
                "PUT",
                &format!("{}/{}", members, bob.id),
                Some(&token),
                Some(json!({"role": "viewer"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "viewer");

        let (_, body) = app.get(&members, &app.token(&bob)).await;
        assert_eq!(body[0]["user"]["username"], "bob");

        let (status, _) = app
            .post(&members, &app.token(&bob), json!({"user_id": bob.id, "role": "administrator"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.delete(&format!("{}/{}", members, bob.id), &token).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.delete(&format!("{}/{}", members, bob.id), &token).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_project_records_history() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let project = app.project(&manager);
        let (status, _) = app
            .delete(&format!("/api/projects/{}", project.id), &app.token(&manager))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let rows = app.with_db(|db| db.list_history(ObjectRef::project(project.id)).unwrap());
        assert_eq!(rows.last().unwrap().message.as_deref(), Some(history::DELETED_MESSAGE));
        assert!(app.with_db(|db| db.get_project(project.id).unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_delete_project_purges_attachments_of_children() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let project = app.project(&manager);
        let (task, comment, link) = app.with_db(|db| {
            let story = fixtures::story(db, &project, None, "Story");
            let task = fixtures::task(db, &story, "Task");
            let template = db
                .create_external_link(
                    project.id,
                    &NewExternalLink {
                        title: "Tracker".into(),
                        description: String::new(),
                        link: "https://tracker.example.com/:issue".into(),
                    },
                )
                .unwrap();
            let comment = db
                .create_comment(ObjectRef::task(task.id), None, "Blocked", manager.id)
                .unwrap();
            let link = db
                .create_link(&NewLink {
                    object_name: ObjectKind::Task,
                    object_id: task.id,
                    external_link_id: template.id,
                    name: "Ticket".into(),
                    parameters: [("issue".to_string(), "7".to_string())].into(),
                })
                .unwrap();
            (task, comment, link)
        });

        let (status, _) = app
            .delete(&format!("/api/projects/{}", project.id), &app.token(&manager))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        app.with_db(|db| {
            assert!(db.list_comments(ObjectRef::task(task.id)).unwrap().is_empty());
            assert!(db.list_links(ObjectRef::task(task.id)).unwrap().is_empty());
            for object in [
                ObjectRef::task(task.id),
                ObjectRef::new(ObjectKind::Comment, comment.id),
                ObjectRef::new(ObjectKind::Link, link.id),
            ] {
                let rows = db.list_history(object).unwrap();
                assert_eq!(
                    rows.last().unwrap().message.as_deref(),
                    Some(history::DELETED_MESSAGE),
                    "{object}"
                );
            }
        });
    }
}
