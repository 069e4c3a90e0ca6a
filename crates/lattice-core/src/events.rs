//! Change events flowing through the pipeline and control-plane events
//! published to subscribers

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a path. Past the watcher, `Create` and `Modify` both mean
/// "reprocess this path"; only `Remove` is handled separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    Remove,
}

/// A pending change for one path, carried through the batch coalescer.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        ChangeEvent {
            path: path.into(),
            kind,
            timestamp: Utc::now(),
            retries: 0,
        }
    }
}

/// Kind of a control-plane event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    Connected,
    Create,
    CreateDir,
    Modify,
    Remove,
    Rename,
}

/// Event published to the engine's subscriber (and from there to WebSocket
/// clients).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub kind: SyncEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SyncEvent {
    pub fn for_path(kind: SyncEventKind, path: &Path) -> Self {
        SyncEvent {
            kind,
            file_path: Some(path.to_string_lossy().into_owned()),
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn connected() -> Self {
        SyncEvent {
            kind: SyncEventKind::Connected,
            file_path: None,
            timestamp: Utc::now(),
            details: Some(serde_json::json!({
                "message": "connected to sync events"
            })),
        }
    }
}
