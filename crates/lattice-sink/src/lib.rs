//! Graph sink capability interface and drivers
//!
//! The engine talks to exactly one trait; concrete drivers are selected by
//! name through [`build_graph_sink`]. Networked drivers (labelled-graph
//! databases, SQL property-graph extensions) implement the same trait out of
//! tree; the in-memory driver ships here because tests and demos need one.

pub mod embedding;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use lattice_core::model::*;
use lattice_core::SinkError;

pub use embedding::{build_chunks, CodeChunk, EmbeddingSink, MemoryEmbeddingStore};
pub use memory::MemoryGraphSink;

/// Capability set every graph driver must expose. Every operation is an
/// idempotent upsert keyed by the entity's identity, so retries are safe.
/// Within one file the engine calls: file, then entities, then relationships.
#[async_trait]
pub trait GraphSink: Send + Sync {
    /// Idempotent schema setup.
    async fn create_indexes(&self) -> Result<(), SinkError>;

    /// Ensure a file node exists; overwrites the language.
    async fn upsert_file(&self, path: &str, language: &str) -> Result<(), SinkError>;

    async fn upsert_function(&self, entity: &FunctionEntity) -> Result<(), SinkError>;
    async fn upsert_import(&self, entity: &ImportEntity) -> Result<(), SinkError>;
    async fn upsert_variable(&self, entity: &VariableEntity) -> Result<(), SinkError>;
    async fn upsert_type(&self, entity: &TypeEntity) -> Result<(), SinkError>;
    async fn upsert_interface(&self, entity: &InterfaceEntity) -> Result<(), SinkError>;
    async fn upsert_class(&self, entity: &ClassEntity) -> Result<(), SinkError>;
    async fn upsert_constant(&self, entity: &ConstantEntity) -> Result<(), SinkError>;
    async fn upsert_jsx_element(&self, entity: &JsxElementEntity) -> Result<(), SinkError>;
    async fn upsert_css_rule(&self, entity: &CssRuleEntity) -> Result<(), SinkError>;

    async fn upsert_function_call(&self, rel: &FunctionCallEntity) -> Result<(), SinkError>;
    async fn upsert_type_usage(&self, rel: &TypeUsageEntity) -> Result<(), SinkError>;
    async fn upsert_extends(&self, rel: &ExtendsEntity) -> Result<(), SinkError>;
    async fn upsert_implements(&self, rel: &ImplementsEntity) -> Result<(), SinkError>;
    async fn upsert_reference(&self, rel: &ReferenceEntity) -> Result<(), SinkError>;

    /// Release driver resources. Called once at shutdown.
    async fn close(&self) -> Result<(), SinkError>;
}

impl fmt::Debug for dyn GraphSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn GraphSink")
    }
}

/// Build a graph sink by driver name.
pub fn build_graph_sink(driver: &str) -> Result<Arc<dyn GraphSink>, SinkError> {
    match driver {
        "memory" => Ok(Arc::new(MemoryGraphSink::new())),
        other => Err(SinkError::UnknownDriver(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_memory_driver() {
        assert!(build_graph_sink("memory").is_ok());
    }

    #[test]
    fn factory_rejects_unknown_driver() {
        let err = build_graph_sink("neo4j").unwrap_err();
        assert!(matches!(err, SinkError::UnknownDriver(_)));
    }
}
