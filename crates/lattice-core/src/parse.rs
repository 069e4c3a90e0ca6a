//! Boundary trait for the source parser

use std::path::Path;

use crate::error::ParseError;
use crate::model::ParsedFile;

/// Turns a file on disk into typed entity collections. Implementations are
/// expected to be pure with respect to the file bytes and safe to call from
/// multiple tasks.
pub trait SourceParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<ParsedFile, ParseError>;
}
