use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use super::{ApiError, CurrentUser, ObjectQuery, SharedState};
use crate::errors::BoardError;
use crate::models::*;
use crate::services::{history, rights};
use crate::ws::{WsMessage, broadcast_message};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/projects/{id}/external-links",
            get(list_external_links).post(create_external_link),
        )
        .route(
            "/api/external-links/{id}",
            get(get_external_link)
                .patch(update_external_link)
                .delete(delete_external_link),
        )
        .route("/api/links", get(list_links).post(create_link))
        .route("/api/links/{id}", get(get_link).delete(delete_link))
}

fn external_ref(id: i64) -> ObjectRef {
    ObjectRef::new(ObjectKind::ExternalLink, id)
}

fn link_ref(id: i64) -> ObjectRef {
    ObjectRef::new(ObjectKind::Link, id)
}

// ── External link templates ───────────────────────────────────────────

async fn list_external_links(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let links = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Viewer)?;
            db.list_external_links(project_id)
        })
        .await?;
    Ok(Json(links))
}

async fn create_external_link(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(project_id): Path<i64>,
    Json(req): Json<NewExternalLink>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state
        .db
        .call(move |db| {
            rights::authorize_project(db, &current.user, project_id, Role::Administrator)?;
            db.transaction(|db| {
                let link = db.create_external_link(project_id, &req)?;
                history::record(db, external_ref(link.id), &link, None, Some(current.user.id))?;
                Ok(link)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::ExternalLink, link.id, Some(project_id), &link),
    );
    Ok((StatusCode::CREATED, Json(link)))
}

async fn get_external_link(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, external_ref(id), Role::Viewer)?;
            db.require_external_link(id)
        })
        .await?;
    Ok(Json(link))
}

async fn update_external_link(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(patch): Json<ExternalLinkPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, external_ref(id), Role::Administrator)?;
            db.transaction(|db| {
                let link = db.update_external_link(id, &patch)?;
                history::record(db, external_ref(id), &link, None, Some(current.user.id))?;
                Ok(link)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::updated(ObjectKind::ExternalLink, id, Some(link.project_id), &link),
    );
    Ok(Json(link))
}

async fn delete_external_link(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, external_ref(id), Role::Administrator)?;
            db.transaction(|db| {
                let link = db.require_external_link(id)?;
                history::record_deletion(db, external_ref(id), &link, Some(current.user.id))?;
                db.delete_external_link(id)?;
                Ok(link)
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::ExternalLink, id, Some(link.project_id), &link),
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Links on objects ──────────────────────────────────────────────────

async fn list_links(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ObjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let object = ObjectRef::from(query);
    let links = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, object, Role::Viewer)?;
            db.list_links(object)
        })
        .await?;
    Ok(Json(links))
}

async fn create_link(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<NewLink>,
) -> Result<impl IntoResponse, ApiError> {
    let (link, project_id) = state
        .db
        .call(move |db| {
            let object = ObjectRef::new(req.object_name, req.object_id);
            rights::check_attachable(object)?;
            let project_id = rights::authorize(db, &current.user, object, Role::Contributor)?;
            let template = db.require_external_link(req.external_link_id)?;
            if template.project_id != project_id {
                return Err(BoardError::validation(format!(
                    "External link '{}' belongs to another project",
                    template.title
                ))
                .into());
            }
            db.transaction(|db| {
                let link = db.create_link(&req)?;
                history::record(db, link_ref(link.id), &link, None, Some(current.user.id))?;
                Ok((link, project_id))
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::created(ObjectKind::Link, link.id, Some(project_id), &link),
    );
    Ok((StatusCode::CREATED, Json(link)))
}

async fn get_link(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state
        .db
        .call(move |db| {
            rights::authorize(db, &current.user, link_ref(id), Role::Viewer)?;
            db.require_link(id)
        })
        .await?;
    Ok(Json(link))
}

async fn delete_link(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (link, project_id) = state
        .db
        .call(move |db| {
            let project_id = rights::authorize(db, &current.user, link_ref(id), Role::Contributor)?;
            db.transaction(|db| {
                let link = db.require_link(id)?;
                history::record_deletion(db, link_ref(id), &link, Some(current.user.id))?;
                db.delete_link(id)?;
                Ok((link, project_id))
            })
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        WsMessage::deleted(ObjectKind::Link, id, Some(project_id), &link),
    );
    Ok(StatusCode::NO_CONTENT)
}
