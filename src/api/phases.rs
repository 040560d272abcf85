use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;

use super::{ApiError, CurrentUser, SharedState};
use crate::models::*;
use crate::services::{board, history, rights};
use crate::ws::{WsMessage, broadcast_message};

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<i64>,
}

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/projects/{id}/phases",
            get(list_phases).post(create_phase),
        )
        .route("/api/projects/{id}/phases/order", put(reorder_phases))
        .route(
            "/api/phases/{id}",
            get(get_phase).patch(update_phase).delete(delete_phase),
        )
        .route("/api/task-types", get(list_task_types))
}

fn phase_ref(id: i64) -> ObjectRef {
    ObjectRef::new(ObjectKind::Phase, id)
}

async fn list_phases(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let phases = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Viewer)?;
            db.list_phases(project_id)
        })
        .await?;
    Ok(Json(phases))
}

async fn create_phase(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
    Json(req): Json<NewPhase>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Administrator)?;
            db.transaction(|db| {
                let phase = db.create_phase(project_id, &req)?;
                history::record(db, phase_ref(phase.id), &phase, None, Some(current.user.id))?;
                Ok(phase)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::Phase, phase.id, Some(project_id), &phase),
    );
    Ok((StatusCode::CREATED, Json(phase)))
}

async fn reorder_phases(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let phases = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Administrator)?;
            db.transaction(|db| {
                let phases = db.reorder_phases(project_id, &req.ids)?;
                for phase in &phases {
                    history::record(db, phase_ref(phase.id), phase, None, Some(current.user.id))?;
                }
                Ok(phases)
            })
        })
        .await?;
    for phase in &phases {
        broadcast_message(
            &state.ws_tx,
            WsMessage::updated(ObjectKind::Phase, phase.id, Some(project_id), phase),
        );
    }
    Ok(Json(phases))
}

async fn get_phase(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, phase_ref(id), Role::Viewer)?;
            db.require_phase(id)
        })
        .await?;
    Ok(Json(phase))
}

async fn update_phase(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<PhasePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let update = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, phase_ref(id), Role::Administrator)?;
            db.transaction(|db| {
                let update = board::update_phase(db, id, &patch)?;
                let user_id = Some(current.user.id);
                history::record(db, phase_ref(id), &update.phase, None, user_id)?;
                for task in &update.tasks {
                    history::record(db, ObjectRef::task(task.id), task, None, user_id)?;
                }
                for story in &update.stories {
                    history::record(db, ObjectRef::story(story.id), story, None, user_id)?;
                }
                Ok(update)
            })
        })
        .await?;
    let project_id = Some(update.phase.project_id);
    for task in &update.tasks {
        broadcast_message(
            &state.ws_tx,
            WsMessage::updated(ObjectKind::Task, task.id, project_id, task),
        );
    }
    for story in &update.stories {
        broadcast_message(
            &state.ws_tx,
            WsMessage::updated(ObjectKind::Story, story.id, project_id, story),
        );
    }
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Phase, id, project_id, &update.phase),
    );
    Ok(Json(update.phase))
}

async fn delete_phase(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, phase_ref(id), Role::Administrator)?;
            db.transaction(|db| {
                let phase = db.require_phase(id)?;
                db.delete_phase(id)?;
                history::record_deletion(db, phase_ref(id), &phase, Some(current.user.id))?;
                Ok(phase)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::Phase, id, Some(phase.project_id), &phase),
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn list_task_types(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let types = state.db.call(|db| db.list_task_types()).await?;
    Ok(Json(types))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use super::*;
    use crate::db::fixtures;
    use serde_json::json;

    #[tokio::test]
    async fn test_viewer_lists_but_cannot_create_phases() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let viewer = app.user("viewer", false);
        let project = app.project(&manager);
        app.with_db(|db| db.set_member(project.id, viewer.id, Role::Viewer).unwrap());
        let uri = format!("/api/projects/{}/phases", project.id);

        let (status, body) = app.get(&uri, &app.token(&viewer)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (status, _) = app
            .post(&uri, &app.token(&viewer), json!({"title": "Review"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .post(&uri, &app.token(&manager), json!({"title": "Review", "tasks": 2}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["order"], 3);
        assert_eq!(body["tasks"], 2);
    }

    #[tokio::test]
    async fn test_reorder_phases() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let project = app.project(&manager);
        let ids: Vec<i64> = app.with_db(|db| {
            db.list_phases(project.id).unwrap().iter().map(|p| p.id).collect()
        });
        let uri = format!("/api/projects/{}/phases/order", project.id);
        let token = app.token(&manager);

        let reversed: Vec<i64> = ids.iter().rev().copied().collect();
        let (status, body) = app
            .send("PUT", &uri, Some(&token), Some(json!({"ids": reversed})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["title"], "Done");

        let (status, _) = app
            .send("PUT", &uri, Some(&token), Some(json!({"ids": [ids[0]]})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_phase_holding_tasks_cannot_be_deleted() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let project = app.project(&manager);
        let phase_id = app.with_db(|db| {
            let story = fixtures::story(db, &project, None, "Story");
            fixtures::task(db, &story, "Task").phase_id
        });
        let (status, _) = app
            .delete(&format!("/api/phases/{}", phase_id), &app.token(&manager))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_task_types_are_seeded() {
        let app = TestApp::new();
        let bob = app.user("bob", false);
        let (status, body) = app.get("/api/task-types", &app.token(&bob)).await;
        assert_eq!(status, StatusCode::OK);
        let titles: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["Task", "Test", "Bug"]);
    }

    #[tokio::test]
    async fn test_marking_phase_done_finishes_its_tasks() {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let project = app.project(&manager);
        let (phase_id, story_id, task_id) = app.with_db(|db| {
            let story = fixtures::story(db, &project, None, "Story");
            let task = fixtures::task(db, &story, "Task");
            (task.phase_id, story.id, task.id)
        });

        let (status, body) = app
            .patch(
                &format!("/api/phases/{}", phase_id),
                &app.token(&manager),
                json!({"is_done": true}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_done"], true);
        app.with_db(|db| {
            let task = db.require_task(task_id).unwrap();
            assert!(task.is_done);
            assert!(task.time_end.is_some());
            assert!(db.require_story(story_id).unwrap().is_done);
            let rows = db.list_history(ObjectRef::task(task_id)).unwrap();
            assert_eq!(rows.last().unwrap().object_data["is_done"], true);
        });
    }
}
