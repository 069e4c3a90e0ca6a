//! Error types shared across the workspace

use std::path::PathBuf;

use thiserror::Error;

/// Failures from the source parser. None of these are fatal to the engine;
/// they are logged and counted.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load grammar: {0}")]
    Grammar(String),

    #[error("parser produced no tree for {0}")]
    NoTree(PathBuf),
}

/// Failures from a graph or embedding sink driver.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unknown sink driver: {0}")]
    UnknownDriver(String),

    #[error("sink operation failed: {0}")]
    Driver(String),
}
