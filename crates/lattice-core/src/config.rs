//! Engine configuration and the literal support / skip sets

use std::path::{Path, PathBuf};
use std::time::Duration;

/// File extensions the engine processes (case-sensitive suffix match).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "css", "scss"];

/// Directory base names never watched or scanned.
pub const SKIP_DIRECTORIES: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    "coverage",
    "vendor",
    ".vscode",
    ".idea",
    "__pycache__",
    ".pytest_cache",
];

pub fn is_supported_path(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => SUPPORTED_EXTENSIONS.contains(&ext),
        None => false,
    }
}

pub fn is_skipped_dir(name: &str) -> bool {
    SKIP_DIRECTORIES.contains(&name)
}

/// True when any component of the path is a skipped directory.
pub fn is_under_skipped_dir(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(is_skipped_dir)
            .unwrap_or(false)
    })
}

/// All knobs the engine consumes. The constructor takes explicit values; no
/// environment reads happen below this struct.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub root: PathBuf,
    pub enable_batching: bool,
    pub batch_size: usize,
    pub batch_flush_interval: Duration,
    pub enable_diff: bool,
    pub enable_scm: bool,
    pub scm_poll_interval: Duration,
    pub state_save_interval: Duration,
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        EngineConfig {
            root: root.into(),
            enable_batching: false,
            batch_size: 50,
            batch_flush_interval: Duration::from_secs(10),
            enable_diff: false,
            enable_scm: false,
            scm_poll_interval: Duration::from_secs(30),
            state_save_interval: Duration::from_secs(300),
        }
    }
}
