use std::collections::HashSet;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::api::{ApiError, SharedState};
use crate::models::{ObjectKind, Story, Task, User};
use crate::services::rights;

/// Interval between server-initiated Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// If no Pong is received within this duration after a Ping, the connection
/// is considered dead and will be closed.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Message types ────────────────────────────────────────────────────

/// Change notifications pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    Created {
        object: ObjectKind,
        id: i64,
        project_id: Option<i64>,
        payload: Value,
    },
    Updated {
        object: ObjectKind,
        id: i64,
        project_id: Option<i64>,
        payload: Value,
    },
    Deleted {
        object: ObjectKind,
        id: i64,
        project_id: Option<i64>,
        payload: Value,
    },
    TaskMoved {
        project_id: i64,
        task: Task,
        from_phase_id: i64,
        from_story_id: i64,
    },
    StoryMoved {
        project_id: i64,
        story: Story,
        from_sprint_id: Option<i64>,
    },
    StorySplit {
        project_id: i64,
        original: Story,
        copy: Story,
        moved_task_ids: Vec<i64>,
    },
}

impl WsMessage {
    pub fn created<T: Serialize>(object: ObjectKind, id: i64, project_id: Option<i64>, value: &T) -> Self {
        Self::Created {
            object,
            id,
            project_id,
            payload: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }

    pub fn updated<T: Serialize>(object: ObjectKind, id: i64, project_id: Option<i64>, value: &T) -> Self {
        Self::Updated {
            object,
            id,
            project_id,
            payload: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }

    pub fn deleted<T: Serialize>(object: ObjectKind, id: i64, project_id: Option<i64>, value: &T) -> Self {
        Self::Deleted {
            object,
            id,
            project_id,
            payload: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }

    /// Project the event concerns; `None` for site-wide objects (users).
    pub fn project_id(&self) -> Option<i64> {
        match self {
            Self::Created { project_id, .. }
            | Self::Updated { project_id, .. }
            | Self::Deleted { project_id, .. } => *project_id,
            Self::TaskMoved { project_id, .. }
            | Self::StoryMoved { project_id, .. }
            | Self::StorySplit { project_id, .. } => Some(*project_id),
        }
    }
}

/// Which events a socket may see, fixed when it connects.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    All,
    Projects(HashSet<i64>),
}

impl Scope {
    pub fn for_user(user: &User, projects: Vec<i64>) -> Self {
        if user.admin {
            Self::All
        } else {
            Self::Projects(projects.into_iter().collect())
        }
    }

    pub fn allows(&self, msg: &WsMessage) -> bool {
        match (self, msg.project_id()) {
            (Self::All, _) | (_, None) => true,
            (Self::Projects(ids), Some(id)) => ids.contains(&id),
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the session
/// token travels in the query string.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let token = query.token.ok_or(ApiError::Unauthorized(
        "Missing session token".to_string(),
    ))?;
    let scope = state
        .db
        .call(move |db| {
            let user = db
                .get_session_user(&token)?
                .ok_or(crate::errors::BoardError::Unauthorized)?;
            let projects = rights::accessible_projects(db, &user)?;
            Ok(Scope::for_user(&user, projects))
        })
        .await?;
    let rx = state.ws_tx.subscribe();
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, rx, scope))
        .into_response())
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<WsMessage>, scope: Scope) {
    let (sender, receiver) = socket.split();
    tracing::debug!(?scope, "WebSocket client connected");
    run_socket_loop(sender, receiver, rx, scope).await;
    tracing::debug!("WebSocket client disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<WsMessage>,
    scope: Scope,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("WebSocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if !scope.allows(&msg) {
                            continue;
                        }
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::warn!("Failed to serialize WsMessage: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket client lagging behind broadcasts");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Fan a message out to every connected socket. Returns silently even if
/// no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<WsMessage>, msg: WsMessage) {
    let _ = tx.send(msg);
}
