//! Route table for the control API

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::handlers::{
    file_info, list_files, pause, recent_changes, rescan, resume, stats, status,
};
use crate::websocket::ws_handler;
use crate::ServerState;

pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/files", get(list_files))
        .route("/api/v1/file/*path", get(file_info))
        .route("/api/v1/changes", get(recent_changes))
        .route("/api/v1/rescan", post(rescan))
        .route("/api/v1/pause", post(pause))
        .route("/api/v1/resume", post(resume))
        .route("/ws/events", get(ws_handler))
        // The API is called from browser-based viewers on other origins.
        .layer(CorsLayer::permissive())
        .with_state(state)
}
