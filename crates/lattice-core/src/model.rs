//! Entity and relationship model for parsed source files

use std::hash::Hash;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Languages the parser produces entities for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceLanguage {
    TypeScript,
    JavaScript,
    Css,
}

impl SourceLanguage {
    /// Detect language from file extension. `None` means the file is not in
    /// the support set.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("ts") | Some("tsx") => Some(SourceLanguage::TypeScript),
            Some("js") | Some("jsx") => Some(SourceLanguage::JavaScript),
            Some("css") | Some("scss") => Some(SourceLanguage::Css),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLanguage::TypeScript => "typescript",
            SourceLanguage::JavaScript => "javascript",
            SourceLanguage::Css => "css",
        }
    }
}

// ── Entities ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionEntity {
    pub name: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Signature text including parameters.
    pub signature: String,
    pub is_async: bool,
    pub is_export: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportEntity {
    pub module: String,
    pub file_path: String,
    pub imported_names: Vec<String>,
    pub is_default: bool,
    pub is_namespace: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEntity {
    pub name: String,
    pub file_path: String,
    /// Type annotation text, empty when the declaration has none.
    pub var_type: String,
    pub is_const: bool,
    pub is_let: bool,
    pub start_line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeEntity {
    pub name: String,
    pub file_path: String,
    /// "type_alias" or "enum".
    pub kind: String,
    pub definition: String,
    pub is_export: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceEntity {
    pub name: String,
    pub file_path: String,
    pub is_export: bool,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEntity {
    pub name: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub is_export: bool,
    pub is_abstract: bool,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantEntity {
    pub name: String,
    pub file_path: String,
    /// Literal initializer rendered as text.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsxElementEntity {
    pub tag_name: String,
    pub file_path: String,
    /// Name of the function or class the element appears in.
    pub containing_component: String,
    pub props: Vec<String>,
    pub line: u32,
    /// True when the tag starts with an uppercase letter.
    pub is_custom_component: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CssRuleEntity {
    pub selector: String,
    /// "class", "id", "element", "variable", or "other".
    pub rule_type: String,
    pub file_path: String,
    pub line: u32,
    /// Set for custom properties only.
    pub property_name: String,
    pub value: String,
}

// ── Relationships ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallEntity {
    pub caller_file: String,
    /// Function making the call, empty at module top level.
    pub caller_func: String,
    pub called_func: String,
    pub call_location: u32,
    /// Object or class context for method calls.
    pub call_context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeUsageEntity {
    pub using_file: String,
    pub using_entity: String,
    pub used_type: String,
    /// "annotation", "parameter", "return_type", ...
    pub usage_context: String,
    pub usage_location: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendsEntity {
    pub child_name: String,
    pub parent_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementsEntity {
    pub class_name: String,
    pub interface_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntity {
    pub source_file: String,
    pub source_entity: String,
    pub target_entity: String,
    /// "instantiates", "exports", ...
    pub ref_type: String,
    pub line: u32,
}

// ── Parsed file ─────────────────────────────────────────────

/// Everything the parser extracted from one source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub file_path: String,
    pub language: String,
    pub functions: Vec<FunctionEntity>,
    pub imports: Vec<ImportEntity>,
    pub variables: Vec<VariableEntity>,
    pub types: Vec<TypeEntity>,
    pub interfaces: Vec<InterfaceEntity>,
    pub classes: Vec<ClassEntity>,
    pub constants: Vec<ConstantEntity>,
    pub jsx_elements: Vec<JsxElementEntity>,
    pub css_rules: Vec<CssRuleEntity>,
    pub function_calls: Vec<FunctionCallEntity>,
    pub type_usages: Vec<TypeUsageEntity>,
    pub extends: Vec<ExtendsEntity>,
    pub implements: Vec<ImplementsEntity>,
    pub references: Vec<ReferenceEntity>,
}

impl ParsedFile {
    pub fn new(file_path: impl Into<String>, language: SourceLanguage) -> Self {
        ParsedFile {
            file_path: file_path.into(),
            language: language.as_str().to_string(),
            ..Default::default()
        }
    }

    /// Rewrite the file path on the parse and on every entity and
    /// relationship it contains, so downstream identity keys all live in the
    /// same (root-relative) path space.
    pub fn rebase(&mut self, new_path: &str) {
        self.file_path = new_path.to_string();
        for e in &mut self.functions {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.imports {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.variables {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.types {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.interfaces {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.classes {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.constants {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.jsx_elements {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.css_rules {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.function_calls {
            e.caller_file = new_path.to_string();
        }
        for e in &mut self.type_usages {
            e.using_file = new_path.to_string();
        }
        for e in &mut self.extends {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.implements {
            e.file_path = new_path.to_string();
        }
        for e in &mut self.references {
            e.source_file = new_path.to_string();
        }
    }

    /// Total entity and relationship count, used for log lines.
    pub fn entity_count(&self) -> usize {
        self.functions.len()
            + self.imports.len()
            + self.variables.len()
            + self.types.len()
            + self.interfaces.len()
            + self.classes.len()
            + self.constants.len()
            + self.jsx_elements.len()
            + self.css_rules.len()
            + self.function_calls.len()
            + self.type_usages.len()
            + self.extends.len()
            + self.implements.len()
            + self.references.len()
    }
}

// ── Identity and structural equality ────────────────────────

/// How the delta analyzer addresses and compares entities of one kind.
///
/// `identity` locates an entity within its file; `same_shape` compares the
/// structural fields whose change counts as a modification. Cosmetic
/// differences outside those fields do not produce a delta.
pub trait EntityIdentity {
    type Key: Eq + Hash + Clone;

    fn identity(&self) -> Self::Key;
    fn same_shape(&self, other: &Self) -> bool;
}

impl EntityIdentity for FunctionEntity {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.name.clone(), self.file_path.clone())
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.start_line == other.start_line
            && self.end_line == other.end_line
            && self.signature == other.signature
            && self.is_async == other.is_async
            && self.is_export == other.is_export
    }
}

impl EntityIdentity for ImportEntity {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.module.clone(), self.file_path.clone())
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.imported_names == other.imported_names
            && self.is_default == other.is_default
            && self.is_namespace == other.is_namespace
    }
}

impl EntityIdentity for VariableEntity {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.name.clone(), self.file_path.clone())
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.var_type == other.var_type
            && self.is_const == other.is_const
            && self.is_let == other.is_let
            && self.start_line == other.start_line
    }
}

impl EntityIdentity for TypeEntity {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.name.clone(), self.file_path.clone())
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.definition == other.definition
            && self.is_export == other.is_export
    }
}

impl EntityIdentity for InterfaceEntity {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.name.clone(), self.file_path.clone())
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.is_export == other.is_export && self.properties == other.properties
    }
}

impl EntityIdentity for ClassEntity {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.name.clone(), self.file_path.clone())
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.start_line == other.start_line
            && self.end_line == other.end_line
            && self.is_export == other.is_export
            && self.is_abstract == other.is_abstract
            && self.methods == other.methods
    }
}

impl EntityIdentity for ConstantEntity {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.name.clone(), self.file_path.clone())
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl EntityIdentity for JsxElementEntity {
    // The same tag can recur in one file, so the line is part of the identity.
    type Key = (String, String, u32);

    fn identity(&self) -> Self::Key {
        (self.tag_name.clone(), self.file_path.clone(), self.line)
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.containing_component == other.containing_component
            && self.props == other.props
            && self.is_custom_component == other.is_custom_component
    }
}

impl EntityIdentity for CssRuleEntity {
    type Key = (String, String);

    fn identity(&self) -> Self::Key {
        (self.selector.clone(), self.file_path.clone())
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.rule_type == other.rule_type
            && self.line == other.line
            && self.property_name == other.property_name
            && self.value == other.value
    }
}

// Relationships are structural tuples: the whole tuple is the identity, so
// they are only ever added or removed, never modified.

impl EntityIdentity for FunctionCallEntity {
    type Key = (String, String, String, u32);

    fn identity(&self) -> Self::Key {
        (
            self.caller_file.clone(),
            self.caller_func.clone(),
            self.called_func.clone(),
            self.call_location,
        )
    }

    fn same_shape(&self, _other: &Self) -> bool {
        true
    }
}

impl EntityIdentity for TypeUsageEntity {
    type Key = (String, String, String, u32);

    fn identity(&self) -> Self::Key {
        (
            self.using_file.clone(),
            self.using_entity.clone(),
            self.used_type.clone(),
            self.usage_location,
        )
    }

    fn same_shape(&self, _other: &Self) -> bool {
        true
    }
}

impl EntityIdentity for ExtendsEntity {
    type Key = (String, String, String);

    fn identity(&self) -> Self::Key {
        (
            self.child_name.clone(),
            self.parent_name.clone(),
            self.file_path.clone(),
        )
    }

    fn same_shape(&self, _other: &Self) -> bool {
        true
    }
}

impl EntityIdentity for ImplementsEntity {
    type Key = (String, String, String);

    fn identity(&self) -> Self::Key {
        (
            self.class_name.clone(),
            self.interface_name.clone(),
            self.file_path.clone(),
        )
    }

    fn same_shape(&self, _other: &Self) -> bool {
        true
    }
}

impl EntityIdentity for ReferenceEntity {
    type Key = (String, String, String, String, u32);

    fn identity(&self) -> Self::Key {
        (
            self.source_file.clone(),
            self.source_entity.clone(),
            self.target_entity.clone(),
            self.ref_type.clone(),
            self.line,
        )
    }

    fn same_shape(&self, _other: &Self) -> bool {
        true
    }
}
