use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    http::{StatusCode, Uri},
    response::IntoResponse,
    routing::get,
};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::{self, AppState, SharedState};
use crate::config::TaskboardConfig;
use crate::db::{DbHandle, TaskboardDb};
use crate::ws::{self, WsMessage};

/// Capacity of the change-event channel feeding connected sockets.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Build the full application router with the JSON API and the WebSocket.
pub fn build_router(state: SharedState) -> Router {
    let dev = state.config.toml.server.dev;
    let app = api::api_router(state.clone())
        .route("/ws", get(ws::ws_handler))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if dev { app.layer(CorsLayer::permissive()) } else { app }
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("No route for {}", uri.path()) })),
    )
}

/// Open the database, bind the listener and serve until Ctrl+C.
pub async fn start_server(config: TaskboardConfig) -> Result<()> {
    let db_path = config.db_path().to_path_buf();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = TaskboardDb::new(&db_path).context("Failed to initialize taskboard database")?;
    let (ws_tx, _rx) = broadcast::channel::<WsMessage>(WS_CHANNEL_CAPACITY);
    let addr = format!("{}:{}", config.toml.server.host, config.toml.server.port);

    let state = Arc::new(AppState {
        db: DbHandle::new(db),
        ws_tx,
        config,
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, db = %db_path.display(), "Taskboard listening");
    println!("Taskboard running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
