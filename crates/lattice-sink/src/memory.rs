//! In-memory property-graph driver
//!
//! A `StableDiGraph` with a side index from identity keys to node indices.
//! Entity nodes hang off their file node via `contains` edges; relationship
//! edges target symbol nodes when the far endpoint is not resolvable to a
//! concrete entity (calls into other files, library types, and so on).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use lattice_core::model::*;
use lattice_core::SinkError;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::GraphSink;

/// Identity of a node in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    File(String),
    Function(String, String),
    Import(String, String),
    Variable(String, String),
    Type(String, String),
    Interface(String, String),
    Class(String, String),
    Constant(String, String),
    JsxElement(String, String, u32),
    CssRule(String, String),
    /// Named endpoint that no parsed entity resolves to.
    Symbol(String),
}

#[derive(Debug)]
struct SinkNode {
    label: &'static str,
    data: serde_json::Value,
}

#[derive(Debug)]
struct SinkEdge {
    kind: &'static str,
    data: serde_json::Value,
}

#[derive(Default)]
struct GraphStore {
    graph: StableDiGraph<SinkNode, SinkEdge>,
    index: HashMap<NodeKey, NodeIndex>,
}

impl GraphStore {
    /// Insert or overwrite a node; structural fields live in `data`.
    fn upsert_node(
        &mut self,
        key: NodeKey,
        label: &'static str,
        data: serde_json::Value,
    ) -> NodeIndex {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.graph.node_weight_mut(idx) {
                node.data = data;
            }
            return idx;
        }
        let idx = self.graph.add_node(SinkNode { label, data });
        self.index.insert(key, idx);
        idx
    }

    fn ensure_file(&mut self, path: &str) -> NodeIndex {
        let key = NodeKey::File(path.to_string());
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        self.upsert_node(key, "File", serde_json::json!({ "path": path }))
    }

    fn ensure_symbol(&mut self, name: &str) -> NodeIndex {
        let key = NodeKey::Symbol(name.to_string());
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        self.upsert_node(key, "Symbol", serde_json::json!({ "name": name }))
    }

    /// Create or refresh a directed edge. Idempotent on (source, target,
    /// kind).
    fn link(
        &mut self,
        source: NodeIndex,
        target: NodeIndex,
        kind: &'static str,
        data: serde_json::Value,
    ) {
        let existing = self
            .graph
            .edges_directed(source, Direction::Outgoing)
            .find(|e| e.target() == target && e.weight().kind == kind)
            .map(|e| e.id());
        match existing {
            Some(edge) => {
                if let Some(weight) = self.graph.edge_weight_mut(edge) {
                    weight.data = data;
                }
            }
            None => {
                self.graph.add_edge(source, target, SinkEdge { kind, data });
            }
        }
    }

    /// Upsert an entity node and its containment edge from the file node.
    fn upsert_entity(
        &mut self,
        file_path: &str,
        key: NodeKey,
        label: &'static str,
        data: serde_json::Value,
    ) -> NodeIndex {
        let file = self.ensure_file(file_path);
        let entity = self.upsert_node(key, label, data);
        self.link(file, entity, "contains", serde_json::Value::Null);
        entity
    }
}

/// The in-memory driver. All state lives behind one reader-writer lock.
pub struct MemoryGraphSink {
    store: RwLock<GraphStore>,
}

impl Default for MemoryGraphSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphSink {
    pub fn new() -> Self {
        MemoryGraphSink {
            store: RwLock::new(GraphStore::default()),
        }
    }

    // ── Introspection used by tests and demos ───────────────

    pub fn node_count(&self) -> usize {
        self.store.read().expect("sink lock poisoned").graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.store.read().expect("sink lock poisoned").graph.edge_count()
    }

    pub fn count_label(&self, label: &str) -> usize {
        let store = self.store.read().expect("sink lock poisoned");
        store
            .graph
            .node_weights()
            .filter(|n| n.label == label)
            .count()
    }

    pub fn count_edge_kind(&self, kind: &str) -> usize {
        let store = self.store.read().expect("sink lock poisoned");
        store
            .graph
            .edge_weights()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn language_of(&self, path: &str) -> Option<String> {
        let store = self.store.read().expect("sink lock poisoned");
        let idx = store.index.get(&NodeKey::File(path.to_string()))?;
        store
            .graph
            .node_weight(*idx)
            .and_then(|n| n.data.get("language"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn function(&self, name: &str, file_path: &str) -> Option<FunctionEntity> {
        let store = self.store.read().expect("sink lock poisoned");
        let key = NodeKey::Function(name.to_string(), file_path.to_string());
        let idx = store.index.get(&key)?;
        store
            .graph
            .node_weight(*idx)
            .and_then(|n| serde_json::from_value(n.data.clone()).ok())
    }

    pub fn has_file(&self, path: &str) -> bool {
        let store = self.store.read().expect("sink lock poisoned");
        store.index.contains_key(&NodeKey::File(path.to_string()))
    }
}

fn to_value<T: serde::Serialize>(entity: &T) -> Result<serde_json::Value, SinkError> {
    serde_json::to_value(entity).map_err(|e| SinkError::Driver(e.to_string()))
}

#[async_trait]
impl GraphSink for MemoryGraphSink {
    async fn create_indexes(&self) -> Result<(), SinkError> {
        // The identity index is structural here; nothing to prepare.
        Ok(())
    }

    async fn upsert_file(&self, path: &str, language: &str) -> Result<(), SinkError> {
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_node(
            NodeKey::File(path.to_string()),
            "File",
            serde_json::json!({ "path": path, "language": language }),
        );
        Ok(())
    }

    async fn upsert_function(&self, entity: &FunctionEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::Function(entity.name.clone(), entity.file_path.clone()),
            "Function",
            data,
        );
        Ok(())
    }

    async fn upsert_import(&self, entity: &ImportEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::Import(entity.module.clone(), entity.file_path.clone()),
            "Import",
            data,
        );
        Ok(())
    }

    async fn upsert_variable(&self, entity: &VariableEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::Variable(entity.name.clone(), entity.file_path.clone()),
            "Variable",
            data,
        );
        Ok(())
    }

    async fn upsert_type(&self, entity: &TypeEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::Type(entity.name.clone(), entity.file_path.clone()),
            "Type",
            data,
        );
        Ok(())
    }

    async fn upsert_interface(&self, entity: &InterfaceEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::Interface(entity.name.clone(), entity.file_path.clone()),
            "Interface",
            data,
        );
        Ok(())
    }

    async fn upsert_class(&self, entity: &ClassEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::Class(entity.name.clone(), entity.file_path.clone()),
            "Class",
            data,
        );
        Ok(())
    }

    async fn upsert_constant(&self, entity: &ConstantEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::Constant(entity.name.clone(), entity.file_path.clone()),
            "Constant",
            data,
        );
        Ok(())
    }

    async fn upsert_jsx_element(&self, entity: &JsxElementEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::JsxElement(entity.tag_name.clone(), entity.file_path.clone(), entity.line),
            "JsxElement",
            data,
        );
        Ok(())
    }

    async fn upsert_css_rule(&self, entity: &CssRuleEntity) -> Result<(), SinkError> {
        let data = to_value(entity)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        store.upsert_entity(
            &entity.file_path,
            NodeKey::CssRule(entity.selector.clone(), entity.file_path.clone()),
            "CssRule",
            data,
        );
        Ok(())
    }

    async fn upsert_function_call(&self, rel: &FunctionCallEntity) -> Result<(), SinkError> {
        let data = to_value(rel)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        let source = if rel.caller_func.is_empty() {
            store.ensure_file(&rel.caller_file)
        } else {
            let key = NodeKey::Function(rel.caller_func.clone(), rel.caller_file.clone());
            match store.index.get(&key).copied() {
                Some(idx) => idx,
                None => store.ensure_file(&rel.caller_file),
            }
        };
        let target = {
            let key = NodeKey::Function(rel.called_func.clone(), rel.caller_file.clone());
            match store.index.get(&key).copied() {
                Some(idx) => idx,
                None => store.ensure_symbol(&rel.called_func),
            }
        };
        store.link(source, target, "calls", data);
        Ok(())
    }

    async fn upsert_type_usage(&self, rel: &TypeUsageEntity) -> Result<(), SinkError> {
        let data = to_value(rel)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        let source = store.ensure_file(&rel.using_file);
        let target = {
            let key = NodeKey::Interface(rel.used_type.clone(), rel.using_file.clone());
            match store.index.get(&key).copied() {
                Some(idx) => idx,
                None => store.ensure_symbol(&rel.used_type),
            }
        };
        store.link(source, target, "uses_type", data);
        Ok(())
    }

    async fn upsert_extends(&self, rel: &ExtendsEntity) -> Result<(), SinkError> {
        let data = to_value(rel)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        let source = {
            let key = NodeKey::Class(rel.child_name.clone(), rel.file_path.clone());
            match store.index.get(&key).copied() {
                Some(idx) => idx,
                None => store.ensure_symbol(&rel.child_name),
            }
        };
        let target = {
            let key = NodeKey::Class(rel.parent_name.clone(), rel.file_path.clone());
            match store.index.get(&key).copied() {
                Some(idx) => idx,
                None => store.ensure_symbol(&rel.parent_name),
            }
        };
        store.link(source, target, "extends", data);
        Ok(())
    }

    async fn upsert_implements(&self, rel: &ImplementsEntity) -> Result<(), SinkError> {
        let data = to_value(rel)?;
        let mut store = self.store.write().expect("sink lock poisoned");
        let source = {
            let key = NodeKey::Class(rel.class_name.clone(), rel.file_path.clone());
            match store.index.get(&key).copied() {
                Some(idx) => idx,
                None => store.ensure_symbol(&rel.class_name),
            }
        };
        let target = {
            let key = NodeKey::Interface(rel.interface_name.clone(), rel.file_path.clone());
            match store.index.get(&key).copied() {
                Some(idx) => idx,
                None => store.ensure_symbol(&rel.interface_name),
            }
        };
        store.link(source, target, "implements", data);
        Ok(())
    }

    async fn upsert_reference(&self, rel: &ReferenceEntity) -> Result<(), SinkError> {
        let data = to_value(rel)?;
        let kind: &'static str = match rel.ref_type.as_str() {
            "instantiates" => "instantiates",
            "exports" => "exports",
            _ => "references",
        };
        let mut store = self.store.write().expect("sink lock poisoned");
        let source = store.ensure_file(&rel.source_file);
        let target = store.ensure_symbol(&rel.target_entity);
        store.link(source, target, kind, data);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, file: &str, start: u32) -> FunctionEntity {
        FunctionEntity {
            name: name.to_string(),
            file_path: file.to_string(),
            start_line: start,
            end_line: start + 2,
            signature: format!("{}()", name),
            is_async: false,
            is_export: true,
        }
    }

    #[tokio::test]
    async fn upserts_are_idempotent() {
        let sink = MemoryGraphSink::new();
        sink.upsert_file("a.ts", "typescript").await.unwrap();
        let f = function("f", "a.ts", 1);
        sink.upsert_function(&f).await.unwrap();
        sink.upsert_function(&f).await.unwrap();

        assert_eq!(sink.count_label("File"), 1);
        assert_eq!(sink.count_label("Function"), 1);
        assert_eq!(sink.count_edge_kind("contains"), 1);
    }

    #[tokio::test]
    async fn upsert_overwrites_structural_fields() {
        let sink = MemoryGraphSink::new();
        sink.upsert_function(&function("f", "a.ts", 1)).await.unwrap();
        sink.upsert_function(&function("f", "a.ts", 9)).await.unwrap();

        let stored = sink.function("f", "a.ts").unwrap();
        assert_eq!(stored.start_line, 9);
        assert_eq!(sink.count_label("Function"), 1);
    }

    #[tokio::test]
    async fn file_language_is_overwritten() {
        let sink = MemoryGraphSink::new();
        sink.upsert_file("a.ts", "typescript").await.unwrap();
        sink.upsert_file("a.ts", "javascript").await.unwrap();
        assert_eq!(sink.language_of("a.ts").unwrap(), "javascript");
        assert_eq!(sink.count_label("File"), 1);
    }

    #[tokio::test]
    async fn call_edges_resolve_within_file() {
        let sink = MemoryGraphSink::new();
        sink.upsert_function(&function("caller", "a.ts", 1)).await.unwrap();
        sink.upsert_function(&function("callee", "a.ts", 5)).await.unwrap();

        let call = FunctionCallEntity {
            caller_file: "a.ts".to_string(),
            caller_func: "caller".to_string(),
            called_func: "callee".to_string(),
            call_location: 2,
            call_context: String::new(),
        };
        sink.upsert_function_call(&call).await.unwrap();
        sink.upsert_function_call(&call).await.unwrap();

        assert_eq!(sink.count_edge_kind("calls"), 1);
        // Both endpoints resolved; no symbol node was needed.
        assert_eq!(sink.count_label("Symbol"), 0);
    }

    #[tokio::test]
    async fn unresolved_endpoints_become_symbols() {
        let sink = MemoryGraphSink::new();
        let rel = ExtendsEntity {
            child_name: "Child".to_string(),
            parent_name: "LibraryBase".to_string(),
            file_path: "a.ts".to_string(),
        };
        sink.upsert_extends(&rel).await.unwrap();

        assert_eq!(sink.count_edge_kind("extends"), 1);
        assert_eq!(sink.count_label("Symbol"), 2);
    }
}
