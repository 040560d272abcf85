use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use serde::Deserialize;

use super::{ApiError, CurrentUser, SharedState};
use crate::models::*;
use crate::services::{board, history, phase_duration, rights};
use crate::ws::{WsMessage, broadcast_message};

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub phase_id: i64,
    pub story_id: Option<i64>,
}

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", patch(move_task))
        .route("/api/tasks/{id}/phase-durations", get(list_phase_durations))
}

async fn get_task(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::task(id), Role::Viewer)?;
            db.require_task(id)
        })
        .await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<TaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::task(id), Role::Contributor)?;
            db.transaction(|db| {
                let task = db.update_task(id, &patch)?;
                history::record(db, ObjectRef::task(id), &task, None, Some(current.user.id))?;
                Ok(task)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Task, id, Some(task.project_id), &task),
    );
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::task(id), Role::Contributor)?;
            db.transaction(|db| {
                let task = db.require_task(id)?;
                history::record_deletion(db, ObjectRef::task(id), &task, Some(current.user.id))?;
                db.delete_task(id)?;
                board::refresh_story_done(db, task.story_id)?;
                Ok(task)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::Task, id, Some(task.project_id), &task),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Drag a task to another phase (and optionally another story).
async fn move_task(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let moved = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::task(id), Role::Contributor)?;
            if let Some(story_id) = req.story_id {
                rights::authorize(db, &current.user, ObjectRef::story(story_id), Role::Contributor)?;
            }
            db.transaction(|db| {
                let before = db.require_story(db.require_task(id)?.story_id)?;
                let moved = board::move_task(db, id, req.phase_id, req.story_id)?;
                let actor = Some(current.user.id);
                history::record(db, ObjectRef::task(id), &moved.task, None, actor)?;
                history::record(db, ObjectRef::story(moved.story.id), &moved.story, None, actor)?;
                if before.id != moved.story.id {
                    let old_story = db.require_story(before.id)?;
                    history::record(db, ObjectRef::story(old_story.id), &old_story, None, actor)?;
                }
                Ok(moved)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::TaskMoved {
            project_id: moved.task.project_id,
            task: moved.task.clone(),
            from_phase_id: moved.from_phase_id,
            from_story_id: moved.from_story_id,
        },
    );
    Ok(Json(moved))
}

async fn list_phase_durations(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let durations = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::task(id), Role::Viewer)?;
            phase_duration::task_durations(db, id)
        })
        .await?;
    Ok(Json(durations))
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestApp;
    use super::*;
    use crate::db::fixtures::{self, date};
    use serde_json::json;

    struct Setup {
        app: TestApp,
        token: String,
        phases: Vec<Phase>,
        story: Story,
        task: Task,
    }

    fn setup() -> Setup {
        let app = TestApp::new();
        let manager = app.user("manager", false);
        let project = app.project(&manager);
        let (phases, story, task) = app.with_db(|db| {
            let sprint = fixtures::sprint(db, &project, date(2024, 3, 4), date(2024, 3, 15));
            let story = fixtures::story(db, &project, Some(sprint.id), "Login");
            let task = fixtures::task(db, &story, "Form");
            (db.list_phases(project.id).unwrap(), story, task)
        });
        let token = app.token(&manager);
        Setup {
            app,
            token,
            phases,
            story,
            task,
        }
    }

    #[tokio::test]
    async fn test_move_task_through_phases() {
        let s = setup();
        let uri = format!("/api/tasks/{}/move", s.task.id);

        let (status, body) = s
            .app
            .patch(&uri, &s.token, json!({"phase_id": s.phases[1].id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["phase_id"], s.phases[1].id);
        assert_eq!(body["from_phase_id"], s.phases[0].id);
        assert!(body["task"]["time_start"].is_string());
        assert_eq!(body["story"]["is_done"], false);

        let (status, body) = s
            .app
            .patch(&uri, &s.token, json!({"phase_id": s.phases[2].id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["is_done"], true);
        assert_eq!(body["story"]["is_done"], true);

        let (status, durations) = s
            .app
            .get(&format!("/api/tasks/{}/phase-durations", s.task.id), &s.token)
            .await;
        assert_eq!(status, StatusCode::OK);
        let durations = durations.as_array().unwrap();
        assert_eq!(durations.len(), 3);
        assert!(durations[0]["time_end"].is_string());
        assert!(durations[2]["time_end"].is_null());
    }

    #[tokio::test]
    async fn test_wip_limit_rejects_move() {
        let s = setup();
        let limited = s.phases[1].id;
        s.app.with_db(|db| {
            db.update_phase(limited, &PhasePatch {
                tasks: Some(1),
                ..Default::default()
            })
            .unwrap();
        });
        let second = s.app.with_db(|db| fixtures::task(db, &s.story, "Second"));

        let (status, _) = s
            .app
            .patch(&format!("/api/tasks/{}/move", s.task.id), &s.token, json!({"phase_id": limited}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = s
            .app
            .patch(&format!("/api/tasks/{}/move", second.id), &s.token, json!({"phase_id": limited}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("limited"));
    }

    #[tokio::test]
    async fn test_viewer_cannot_move_task() {
        let s = setup();
        let viewer = s.app.user("viewer", false);
        s.app
            .with_db(|db| db.set_member(s.story.project_id, viewer.id, Role::Viewer).unwrap());
        let (status, _) = s
            .app
            .patch(
                &format!("/api/tasks/{}/move", s.task.id),
                &s.app.token(&viewer),
                json!({"phase_id": s.phases[1].id}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = s
            .app
            .get(&format!("/api/tasks/{}", s.task.id), &s.app.token(&viewer))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_and_delete_task() {
        let s = setup();
        let uri = format!("/api/tasks/{}", s.task.id);
        let (status, body) = s
            .app
            .patch(&uri, &s.token, json!({"title": "Login form", "priority": 2}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Login form");

        let (status, _) = s.app.delete(&uri, &s.token).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = s.app.get(&uri, &s.token).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
