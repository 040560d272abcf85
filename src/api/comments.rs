use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, CurrentUser, ObjectQuery, SharedState};
use crate::db::{TaskboardDb, build_threads};
use crate::errors::BoardError;
use crate::models::*;
use crate::services::{history, rights};
use crate::ws::{WsMessage, broadcast_message};

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub object_name: ObjectKind,
    pub object_id: i64,
    pub parent_id: Option<i64>,
    pub comment: String,
}

#[derive(Deserialize)]
pub struct UpdateCommentRequest {
    pub comment: String,
}

#[derive(Serialize)]
pub struct CommentCount {
    pub count: i64,
}

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/comments", get(list_comments).post(create_comment))
        .route("/api/comments/count", get(count_comments))
        .route(
            "/api/comments/{id}",
            get(get_comment).patch(update_comment).delete(delete_comment),
        )
}

fn comment_ref(id: i64) -> ObjectRef {
    ObjectRef::new(ObjectKind::Comment, id)
}

/// Authors may change their own comments; project administrators may change
/// any. Returns the comment and its project.
fn authorize_edit(db: &TaskboardDb, user: &User, id: i64) -> anyhow::Result<(Comment, i64)> {
    let project_id = rights::authorize(db, user, comment_ref(id), Role::Viewer)?;
    let comment = db.require_comment(id)?;
    let required = if comment.created_user_id == user.id {
        Role::Contributor
    } else {
        Role::Administrator
    };
    rights::authorize_project(db, user, project_id, required)?;
    Ok((comment, project_id))
}

async fn list_comments(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ObjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let object = ObjectRef::from(query);
    let threads = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, object, Role::Viewer)?;
            Ok(build_threads(db.list_comments(object)?))
        })
        .await?;
    Ok(Json(threads))
}

async fn count_comments(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ObjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let object = ObjectRef::from(query);
    let count = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, object, Role::Viewer)?;
            db.count_comments(object)
        })
        .await?;
    Ok(Json(CommentCount { count }))
}

async fn create_comment(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let object = ObjectRef::new(req.object_name, req.object_id);
    let (comment, project_id) = state
        .db
        .call(move |db| {
            rights::check_attachable(object)?;
            let project_id = rights::authorize(db, &current.user, object, Role::Contributor)?;
            db.transaction(|db| {
                let comment = db.create_comment(object, req.parent_id, &req.comment, current.user.id)?;
                history::record(db, comment_ref(comment.id), &comment, None, Some(current.user.id))?;
                Ok((comment, project_id))
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::Comment, comment.id, Some(project_id), &comment),
    );
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn get_comment(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, comment_ref(id), Role::Viewer)?;
            db.require_comment(id)
        })
        .await?;
    Ok(Json(comment))
}

async fn update_comment(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (comment, project_id) = state
        .db
        .call(move |db| {
            let (_, project_id) = authorize_edit(db, &current.user, id)?;
            db.transaction(|db| {
                let comment = db.update_comment(id, &req.comment)?;
                history::record(db, comment_ref(id), &comment, None, Some(current.user.id))?;
                Ok((comment, project_id))
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::Comment, id, Some(project_id), &comment),
    );
    Ok(Json(comment))
}

/// Delete a comment and its replies.
async fn delete_comment(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (comment, project_id) = state
        .db
        .call(move |db| {
            let (comment, project_id) = authorize_edit(db, &current.user, id)?;
            db.transaction(|db| {
                history::record_deletion(db, comment_ref(id), &comment, Some(current.user.id))?;
                if !db.delete_comment(id)? {
                    return Err(BoardError::not_found(comment_ref(id)).into());
                }
                Ok((comment, project_id))
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::Comment, id, Some(project_id), &comment),
    );
    Ok(StatusCode::NO_CONTENT)
}
