//! Session authentication.
//!
//! `POST /api/auth/authenticate` trades a username and password for a
//! bearer token. [`require_session`] resolves that token on every other
//! API request and hands the user to handlers as an [`CurrentUser`]
//! extension.

use axum::{
    Extension, Json, Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, SharedState};
use crate::errors::BoardError;
use crate::models::User;

/// The authenticated requester.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

#[derive(Deserialize)]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthenticateResponse {
    pub token: String,
    pub expires_at: String,
    pub user: User,
}

pub(super) fn public_routes() -> Router<SharedState> {
    Router::new().route("/api/auth/authenticate", post(authenticate))
}

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Reject requests without a live session.
pub async fn require_session(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(BoardError::Unauthorized)?;
    let lookup = token.clone();
    let user = state
        .db
        .call(move |db| db.get_session_user(&lookup))
        .await?
        .ok_or(BoardError::Unauthorized)?;
    req.extensions_mut().insert(CurrentUser { user, token });
    Ok(next.run(req).await)
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_default()
}

async fn authenticate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<AuthenticateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers);
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let ttl = state.config.session_ttl_hours();
    let username = req.username.clone();

    let result = state
        .db
        .call(move |db| {
            let Some(user) = db.verify_credentials(&req.username, &req.password)? else {
                return Err(BoardError::InvalidCredentials.into());
            };
            db.transaction(|db| {
                db.purge_expired_sessions()?;
                let session = db.create_session(user.id, ttl)?;
                db.record_login(user.id, &ip, &agent)?;
                Ok(AuthenticateResponse {
                    token: session.token,
                    expires_at: session.expires_at,
                    user,
                })
            })
        })
        .await;

    match result {
        Ok(response) => {
            tracing::info!(username = %username, "User logged in");
            Ok(Json(response))
        }
        Err(e) => {
            tracing::warn!(username = %username, "Login failed: {}", e);
            Err(e.into())
        }
    }
}

async fn logout(
    State(state): State<SharedState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.delete_session(&current.token))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(Extension(current): Extension<CurrentUser>) -> Json<User> {
    Json(current.user)
}
