use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use super::{ApiError, CurrentUser, SharedState};
use crate::models::*;
use crate::services::{board, history, rights};
use crate::ws::{WsMessage, broadcast_message};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/projects/{id}/sprints",
            get(list_sprints).post(create_sprint),
        )
        .route(
            "/api/sprints/{id}",
            get(get_sprint).patch(update_sprint).delete(delete_sprint),
        )
        .route("/api/sprints/{id}/board", get(get_board))
        .route("/api/sprints/{id}/stats", get(get_stats))
        .route("/api/sprints/{id}/stories", get(list_sprint_stories))
}

async fn list_sprints(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let sprints = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Viewer)?;
            db.list_sprints(project_id)
        })
        .await?;
    Ok(Json(sprints))
}

async fn create_sprint(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
    Json(req): Json<NewSprint>,
) -> Result<impl IntoResponse, ApiError> {
    let sprint = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Administrator)?;
            db.transaction(|db| {
                let sprint = db.create_sprint(project_id, &req)?;
                history::record(db, ObjectRef::sprint(sprint.id), &sprint, None, Some(current.user.id))?;
                Ok(sprint)
            })
        })
        .await?;
    tracing::info!(sprint_id = sprint.id, project_id, "Created sprint");
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::Sprint, sprint.id, Some(project_id), &sprint),
    );
    Ok((StatusCode::CREATED, Json(sprint)))
}

async fn get_sprint(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let sprint = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::sprint(id), Role::Viewer)?;
            db.require_sprint(id)
        })
        .await?;
    Ok(Json(sprint))
}

async fn update_sprint(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<SprintPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let sprint = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::sprint(id), Role::Administrator)?;
            db.transaction(|db| {
                let sprint = db.update_sprint(id, &patch)?;
                history::record(db, ObjectRef::sprint(id), &sprint, None, Some(current.user.id))?;
                Ok(sprint)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Sprint, id, Some(sprint.project_id), &sprint),
    );
    Ok(Json(sprint))
}

/// Delete a sprint. Its stories and their tasks return to the backlog.
async fn delete_sprint(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let sprint = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::sprint(id), Role::Administrator)?;
            db.transaction(|db| {
                let sprint = db.require_sprint(id)?;
                for story in db.list_sprint_stories(id)? {
                    board::move_story(db, story.id, None)?;
                }
                history::record_deletion(db, ObjectRef::sprint(id), &sprint, Some(current.user.id))?;
                db.delete_sprint(id)?;
                Ok(sprint)
            })
        })
        .await?;
    tracing::info!(sprint_id = id, "Deleted sprint");
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::Sprint, id, Some(sprint.project_id), &sprint),
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn get_board(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::sprint(id), Role::Viewer)?;
            board::board_view(db, id)
        })
        .await?;
    Ok(Json(view))
}

async fn get_stats(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::sprint(id), Role::Viewer)?;
            board::sprint_stats(db, id)
        })
        .await?;
    Ok(Json(stats))
}

async fn list_sprint_stories(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let stories = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::sprint(id), Role::Viewer)?;
            db.list_sprint_stories(id)
        })
        .await?;
    Ok(Json(stories))
}
