use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::Deserialize;

use super::{ApiError, CurrentUser, SharedState};
use crate::db::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;
use crate::services::{board, history, rights};
use crate::ws::{WsMessage, broadcast_message};

/// Target of a story move or split; `null` means the backlog.
#[derive(Deserialize)]
pub struct SprintTarget {
    #[serde(default)]
    pub sprint_id: Option<i64>,
}

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/projects/{id}/backlog", get(list_backlog))
        .route("/api/projects/{id}/stories", post(create_story))
        .route(
            "/api/stories/{id}",
            get(get_story).patch(update_story).delete(delete_story),
        )
        .route("/api/stories/{id}/move", patch(move_story))
        .route("/api/stories/{id}/split", post(split_story))
        .route(
            "/api/stories/{id}/tasks",
            get(list_tasks).post(create_task),
        )
}

/// Snapshot every task of a story after a change that rewrote them.
fn record_tasks(db: &TaskboardDb, tasks: &[Task], user_id: i64) -> anyhow::Result<()> {
    for task in tasks {
        history::record(db, ObjectRef::task(task.id), task, None, Some(user_id))?;
    }
    Ok(())
}

async fn list_backlog(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let stories = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Viewer)?;
            db.list_backlog(project_id)
        })
        .await?;
    Ok(Json(stories))
}

async fn create_story(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
    Json(req): Json<NewStory>,
) -> Result<impl IntoResponse, ApiError> {
    let story = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Contributor)?;
            db.transaction(|db| {
                let story = db.create_story(project_id, &req)?;
                history::record(db, ObjectRef::story(story.id), &story, None, Some(current.user.id))?;
                Ok(story)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::Story, story.id, Some(project_id), &story),
    );
    Ok((StatusCode::CREATED, Json(story)))
}

async fn get_story(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::story(id), Role::Viewer)?;
            board::story_detail(db, id)
        })
        .await?;
    Ok(Json(detail))
}

async fn update_story(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<StoryPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let story = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::story(id), Role::Contributor)?;
            db.transaction(|db| {
                let story = db.update_story(id, &patch)?;
                history::record(db, ObjectRef::story(id), &story, None, Some(current.user.id))?;
                Ok(story)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Story, id, Some(story.project_id), &story),
    );
    Ok(Json(story))
}

/// Delete a story with its tasks.
async fn delete_story(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let story = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::story(id), Role::Contributor)?;
            db.transaction(|db| {
                let story = db.require_story(id)?;
                history::record_deletion(db, ObjectRef::story(id), &story, Some(current.user.id))?;
                db.delete_story(id)?;
                Ok(story)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::Story, id, Some(story.project_id), &story),
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn move_story(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(target): Json<SprintTarget>,
) -> Result<impl IntoResponse, ApiError> {
    let (story, from_sprint_id) = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::story(id), Role::Contributor)?;
            db.transaction(|db| {
                let from = db.require_story(id)?.sprint_id;
                let story = board::move_story(db, id, target.sprint_id)?;
                history::record(db, ObjectRef::story(id), &story, None, Some(current.user.id))?;
                record_tasks(db, &db.list_story_tasks(id)?, current.user.id)?;
                Ok((story, from))
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::StoryMoved {
            project_id: story.project_id,
            story: story.clone(),
            from_sprint_id,
        },
    );
    Ok(Json(story))
}

async fn split_story(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(target): Json<SprintTarget>,
) -> Result<impl IntoResponse, ApiError> {
    let split = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::story(id), Role::Contributor)?;
            db.transaction(|db| {
                let split = board::split_story(db, id, target.sprint_id)?;
                let actor = Some(current.user.id);
                history::record(db, ObjectRef::story(split.original.id), &split.original, None, actor)?;
                history::record(
                    db,
                    ObjectRef::story(split.copy.id),
                    &split.copy,
                    Some(&format!("split from story {}", split.original.id)),
                    actor,
                )?;
                record_tasks(db, &db.list_story_tasks(split.copy.id)?, current.user.id)?;
                Ok(split)
            })
        })
        .await?;
    tracing::info!(
        story_id = id,
        copy_id = split.copy.id,
        moved = split.moved_task_ids.len(),
        "Split story"
    );
    broadcast_message(
        &state.ws_tx,
        WsMessage::StorySplit {
            project_id: split.original.project_id,
            original: split.original.clone(),
            copy: split.copy.clone(),
            moved_task_ids: split.moved_task_ids.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(split)))
}

async fn list_tasks(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::story(id), Role::Viewer)?;
            db.list_story_tasks(id)
        })
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, ObjectRef::story(id), Role::Contributor)?;
            db.transaction(|db| {
                let story = db.require_story(id)?;
                let phase_id = match req.phase_id {
                    Some(phase_id) => phase_id,
                    None => {
                        db.first_phase(story.project_id)?
                            .ok_or_else(|| BoardError::validation("Project has no phases"))?
                            .id
                    }
                };
                let type_id = match req.type_id {
                    Some(type_id) => type_id,
                    None => {
                        db.list_task_types()?
                            .first()
                            .ok_or_else(|| BoardError::validation("No task types defined"))?
                            .id
                    }
                };
                let task = db.create_task(&story, phase_id, type_id, &req)?;
                history::record(db, ObjectRef::task(task.id), &task, None, Some(current.user.id))?;
                let refreshed = board::refresh_story_done(db, story.id)?;
                if refreshed.is_done != story.is_done {
                    history::record(db, ObjectRef::story(story.id), &refreshed, None, Some(current.user.id))?;
                }
                Ok(task)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::Task, task.id, Some(task.project_id), &task),
    );
    Ok((StatusCode::CREATED, Json(task)))
}
