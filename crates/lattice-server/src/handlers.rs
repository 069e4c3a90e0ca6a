//! REST handlers for the control API

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ServerState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub paused: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub version: String,
}

pub async fn status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(StatusResponse {
        running: state.engine.is_running(),
        paused: state.engine.is_paused(),
        start_time: state.engine.start_time(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn stats(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.engine.stats())
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub total: usize,
    pub files: Vec<String>,
}

pub async fn list_files(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let files = state.engine.list_monitored();
    Json(FilesResponse {
        total: files.len(),
        files,
    })
}

#[derive(Debug, Serialize)]
pub struct FileInfoResponse {
    pub path: String,
    pub monitored: bool,
    pub timestamp: DateTime<Utc>,
}

/// 404 when the path is not currently tracked. Monitored paths are stored
/// as watched; a suffix match lets clients pass root-relative paths.
pub async fn file_info(
    State(state): State<Arc<ServerState>>,
    UrlPath(path): UrlPath<String>,
) -> Result<Json<FileInfoResponse>, StatusCode> {
    let monitored = state
        .engine
        .list_monitored()
        .iter()
        .any(|f| f == &path || f.ends_with(&path));
    if !monitored {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(FileInfoResponse {
        path,
        monitored: true,
        timestamp: Utc::now(),
    }))
}

pub async fn recent_changes(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let stats = state.engine.stats();
    Json(serde_json::json!({
        "last_change": stats.last_change,
        "changes_detected": stats.changes_detected,
        "files_processed": stats.files_processed,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RescanRequest {
    pub path: Option<String>,
}

pub async fn rescan(
    State(state): State<Arc<ServerState>>,
    body: Option<Json<RescanRequest>>,
) -> impl IntoResponse {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let queued = state
        .engine
        .rescan(request.path.as_deref().map(Path::new));
    Json(serde_json::json!({
        "status": "rescan queued",
        "queued": queued,
        "path": request.path,
        "timestamp": Utc::now(),
    }))
}

pub async fn pause(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.engine.pause();
    Json(serde_json::json!({
        "status": "paused",
        "timestamp": Utc::now(),
    }))
}

pub async fn resume(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.engine.resume();
    Json(serde_json::json!({
        "status": "resumed",
        "timestamp": Utc::now(),
    }))
}
