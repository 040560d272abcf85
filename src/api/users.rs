use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;

use super::{ApiError, CurrentUser, SharedState};
use crate::errors::BoardError;
use crate::models::{NewUser, ObjectKind, ObjectRef, User, UserPatch};
use crate::services::{history, rights};
use crate::ws::{WsMessage, broadcast_message};

/// Number of recent logins returned by the login listing.
const LOGIN_LIST_LIMIT: i64 = 50;

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub new_password: String,
}

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/api/users/{id}/password", put(change_password))
        .route("/api/users/{id}/logins", get(list_logins))
}

fn user_ref(id: i64) -> ObjectRef {
    ObjectRef::new(ObjectKind::User, id)
}

/// Only the user themself or a site admin may act on a user record.
fn require_self_or_admin(current: &User, user_id: i64) -> Result<(), BoardError> {
    if current.id == user_id || current.admin {
        Ok(())
    } else {
        Err(BoardError::Forbidden(
            "Only the user or an administrator may do this".to_string(),
        ))
    }
}

async fn list_users(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let users = state.db.call(|db| db.list_users()).await?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.db.call(move |db| db.require_user(id)).await?;
    Ok(Json(user))
}

async fn create_user(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    rights::require_admin(&current.user)?;
    let actor = current.user.id;
    let user = state
        .db
        .call(move |db| {
            db.transaction(|db| {
                let user = db.create_user(&req)?;
                history::record(db, user_ref(user.id), &user, None, Some(actor))?;
                Ok(user)
            })
        })
        .await?;
    tracing::info!(user_id = user.id, username = %user.username, "Created user");
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::User, user.id, None, &user),
    );
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<UserPatch>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_admin(&current.user, id)?;
    if patch.admin.is_some() && !current.user.admin {
        return Err(BoardError::Forbidden(
            "Only administrators may change administrator status".to_string(),
        )
        .into());
    }
    let actor = current.user.id;
    let user = state
        .db
        .call(move |db| {
            db.transaction(|db| {
                let user = db.update_user(id, &patch)?;
                history::record(db, user_ref(id), &user, None, Some(actor))?;
                Ok(user)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::User, user.id, None, &user),
    );
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    rights::require_admin(&current.user)?;
    if current.user.id == id {
        return Err(BoardError::validation("Administrators cannot delete themselves").into());
    }
    let actor = current.user.id;
    let user = state
        .db
        .call(move |db| {
            db.transaction(|db| {
                let user = db.require_user(id)?;
                if let Some(project) = db.list_projects()?.into_iter().find(|p| p.manager_id == id) {
                    return Err(BoardError::Conflict(format!(
                        "User manages project '{}'; assign another manager first",
                        project.title
                    ))
                    .into());
                }
                history::record_deletion(db, user_ref(id), &user, Some(actor))?;
                db.delete_user(id)?;
                Ok(user)
            })
        })
        .await?;
    tracing::info!(user_id = id, username = %user.username, "Deleted user");
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::User, id, None, &user),
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn change_password(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_admin(&current.user, id)?;
    let by_admin = current.user.admin;
    state
        .db
        .call(move |db| {
            let target = db.require_user(id)?;
            if !by_admin {
                let old = req.old_password.as_deref().unwrap_or_default();
                if db.verify_credentials(&target.username, old)?.is_none() {
                    return Err(BoardError::Forbidden(
                        "Current password is incorrect".to_string(),
                    )
                    .into());
                }
            }
            db.set_password(id, &req.new_password)
        })
        .await?;
    tracing::info!(user_id = id, "Changed password");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_logins(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_admin(&current.user, id)?;
    let logins = state
        .db
        .call(move |db| {
            db.require_user(id)?;
            db.list_logins(id, LOGIN_LIST_LIMIT)
        })
        .await?;
    Ok(Json(logins))
}
