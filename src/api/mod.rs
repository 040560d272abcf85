//! JSON API.
//!
//! Every route under `/api` except `/api/auth/authenticate` sits behind
//! [`auth::require_session`]. Handlers authorize against the role cascade
//! inside their database closure, record a history snapshot for every
//! mutation and broadcast the change to connected sockets.

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::config::TaskboardConfig;
use crate::db::DbHandle;
use crate::errors::BoardError;
use crate::models::{ObjectKind, ObjectRef};
use crate::ws::WsMessage;

pub mod auth;
mod comments;
mod history;
mod links;
mod milestones;
mod phases;
mod projects;
mod sprints;
mod stories;
mod tasks;
mod users;

pub use auth::CurrentUser;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<WsMessage>,
    pub config: TaskboardConfig,
}

pub type SharedState = Arc<AppState>;

/// `?object_name=&object_id=` selector used by comment and link listings.
#[derive(Debug, Deserialize)]
pub struct ObjectQuery {
    pub object_name: ObjectKind,
    pub object_id: i64,
}

impl From<ObjectQuery> for ObjectRef {
    fn from(q: ObjectQuery) -> Self {
        ObjectRef::new(q.object_name, q.object_id)
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::Other(inner) => inner.into(),
            other => classify(&other),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match find_board_error(&err) {
            Some(board) => classify(board),
            None => ApiError::Internal(format!("{:#}", err)),
        }
    }
}

/// First `BoardError` in the chain, looking through `BoardError::Other`.
fn find_board_error(err: &anyhow::Error) -> Option<&BoardError> {
    for cause in err.chain() {
        if let Some(board) = cause.downcast_ref::<BoardError>() {
            return match board {
                BoardError::Other(inner) => find_board_error(inner),
                _ => Some(board),
            };
        }
    }
    None
}

fn classify(err: &BoardError) -> ApiError {
    let msg = err.to_string();
    match err {
        BoardError::Unauthorized | BoardError::InvalidCredentials => ApiError::Unauthorized(msg),
        BoardError::Forbidden(_) => ApiError::Forbidden(msg),
        BoardError::NotFound { .. } => ApiError::NotFound(msg),
        BoardError::Validation(_) => ApiError::BadRequest(msg),
        BoardError::Conflict(_) => ApiError::Conflict(msg),
        BoardError::Other(_) | BoardError::Database(_) | BoardError::LockPoisoned => {
            ApiError::Internal(msg)
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

/// All `/api` routes plus `/health`. `state` is needed up front for the
/// session middleware.
pub fn api_router(state: SharedState) -> Router<SharedState> {
    let protected = Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(projects::routes())
        .merge(phases::routes())
        .merge(sprints::routes())
        .merge(stories::routes())
        .merge(tasks::routes())
        .merge(milestones::routes())
        .merge(comments::routes())
        .merge(links::routes())
        .merge(history::routes())
        .layer(middleware::from_fn_with_state(state, auth::require_session));

    Router::new()
        .merge(auth::public_routes())
        .merge(protected)
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}


#[cfg(test)]
mod tests {
    use super::testing::TestApp;
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let app = TestApp::new();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unauthenticated_request_is_rejected() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/api/projects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = app.send("GET", "/api/projects", Some("not-a-token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_board_error_maps_through_anyhow_context() {
        let err: anyhow::Error = BoardError::validation("bad").into();
        let err = err.context("while doing something");
        assert!(matches!(ApiError::from(err), ApiError::BadRequest(msg) if msg == "bad"));

        let nested = BoardError::Other(BoardError::not_found(ObjectRef::task(3)).into());
        let err: anyhow::Error = nested.into();
        assert!(matches!(ApiError::from(err), ApiError::NotFound(_)));

        let err = anyhow::anyhow!("disk on fire");
        assert!(matches!(ApiError::from(err), ApiError::Internal(_)));
    }
}
