//! Embedding sink boundary
//!
//! The engine hands the full parse plus file content to an [`EmbeddingSink`]
//! after every successful processing. Chunking happens here; turning chunks
//! into vectors is a driver concern and stays out of this crate's scope. The
//! in-memory store keeps the chunks themselves, which is all tests need.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use lattice_core::model::ParsedFile;
use lattice_core::SinkError;
use serde::Serialize;

/// A chunk of code prepared for embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeChunk {
    pub file_path: String,
    pub language: String,
    /// "function", "class", or "file".
    pub chunk_type: String,
    pub name: String,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Accepts per-file entity bundles for vectorization.
#[async_trait]
pub trait EmbeddingSink: Send + Sync {
    async fn process_file(&self, parse: &ParsedFile, content: &str) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError>;
}

/// Cut a parse into chunks: one per function and class, or a whole-file
/// chunk when the parse has neither (stylesheets, pure type files).
pub fn build_chunks(parse: &ParsedFile, content: &str) -> Vec<CodeChunk> {
    let mut chunks = Vec::new();

    for function in &parse.functions {
        chunks.push(CodeChunk {
            file_path: parse.file_path.clone(),
            language: parse.language.clone(),
            chunk_type: "function".to_string(),
            name: function.name.clone(),
            content: extract_lines(content, function.start_line, function.end_line),
            start_line: function.start_line,
            end_line: function.end_line,
        });
    }

    for class in &parse.classes {
        chunks.push(CodeChunk {
            file_path: parse.file_path.clone(),
            language: parse.language.clone(),
            chunk_type: "class".to_string(),
            name: class.name.clone(),
            content: extract_lines(content, class.start_line, class.end_line),
            start_line: class.start_line,
            end_line: class.end_line,
        });
    }

    if chunks.is_empty() && !content.is_empty() {
        let line_count = content.lines().count() as u32;
        chunks.push(CodeChunk {
            file_path: parse.file_path.clone(),
            language: parse.language.clone(),
            chunk_type: "file".to_string(),
            name: parse.file_path.clone(),
            content: content.to_string(),
            start_line: 1,
            end_line: line_count.max(1),
        });
    }

    chunks
}

/// Lines `start..=end`, 1-based, clamped to the file. Out-of-range input
/// yields an empty chunk body.
fn extract_lines(content: &str, start: u32, end: u32) -> String {
    if start == 0 || end == 0 {
        return String::new();
    }
    let lines: Vec<&str> = content.lines().collect();
    let start = start as usize;
    if start > lines.len() {
        return String::new();
    }
    let end = (end as usize).min(lines.len());
    lines[start - 1..end].join("\n")
}

/// Chunk store keyed by file. The latest processing of a file replaces its
/// chunks wholesale.
#[derive(Default)]
pub struct MemoryEmbeddingStore {
    chunks: RwLock<HashMap<String, Vec<CodeChunk>>>,
}

impl MemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks_for(&self, file_path: &str) -> Vec<CodeChunk> {
        let chunks = self.chunks.read().expect("embedding lock poisoned");
        chunks.get(file_path).cloned().unwrap_or_default()
    }

    pub fn file_count(&self) -> usize {
        let chunks = self.chunks.read().expect("embedding lock poisoned");
        chunks.len()
    }
}

#[async_trait]
impl EmbeddingSink for MemoryEmbeddingStore {
    async fn process_file(&self, parse: &ParsedFile, content: &str) -> Result<(), SinkError> {
        let built = build_chunks(parse, content);
        let mut chunks = self.chunks.write().expect("embedding lock poisoned");
        chunks.insert(parse.file_path.clone(), built);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::model::{FunctionEntity, SourceLanguage};

    fn parse_with_function(start: u32, end: u32) -> ParsedFile {
        let mut parse = ParsedFile::new("a.ts", SourceLanguage::TypeScript);
        parse.functions.push(FunctionEntity {
            name: "f".to_string(),
            file_path: "a.ts".to_string(),
            start_line: start,
            end_line: end,
            signature: "f()".to_string(),
            is_async: false,
            is_export: false,
        });
        parse
    }

    #[test]
    fn function_chunks_carry_their_lines() {
        let content = "line1\nline2\nline3\nline4";
        let chunks = build_chunks(&parse_with_function(2, 3), content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "function");
        assert_eq!(chunks[0].content, "line2\nline3");
    }

    #[test]
    fn out_of_range_lines_yield_empty_content() {
        let chunks = build_chunks(&parse_with_function(10, 12), "only\ntwo");
        assert_eq!(chunks[0].content, "");
    }

    #[test]
    fn files_without_entities_chunk_whole() {
        let parse = ParsedFile::new("a.css", SourceLanguage::Css);
        let chunks = build_chunks(&parse, ".btn { color: red; }");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "file");
    }

    #[tokio::test]
    async fn store_replaces_chunks_per_file() {
        let store = MemoryEmbeddingStore::new();
        store
            .process_file(&parse_with_function(1, 2), "a\nb\nc")
            .await
            .unwrap();
        store
            .process_file(&parse_with_function(2, 3), "a\nb\nc")
            .await
            .unwrap();

        assert_eq!(store.file_count(), 1);
        let chunks = store.chunks_for("a.ts");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "b\nc");
    }
}
