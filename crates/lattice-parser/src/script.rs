//! Entity extraction for TypeScript / JavaScript
//!
//! Walks the tree-sitter AST directly, matching on node kinds. The walker
//! carries a scope stack of enclosing function/class names so calls, JSX
//! elements, and references can report their containing entity.

use lattice_core::model::*;
use lattice_core::ParseError;
use tree_sitter::Node;

pub(crate) fn extract(
    source: &str,
    grammar: tree_sitter::Language,
    parse: &mut ParsedFile,
) -> Result<(), ParseError> {
    let tree = crate::parse_tree(source, grammar, &parse.file_path)?;
    let mut scope = Vec::new();
    visit(tree.root_node(), source, parse, &mut scope);
    Ok(())
}

fn visit(node: Node, source: &str, parse: &mut ParsedFile, scope: &mut Vec<String>) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                let params = field_text(node, "parameters", source)
                    .unwrap_or_else(|| "()".to_string());
                parse.functions.push(FunctionEntity {
                    name: name.clone(),
                    file_path: parse.file_path.clone(),
                    start_line: start_line(node),
                    end_line: end_line(node),
                    signature: format!("{}{}", name, params),
                    is_async: has_token(node, "async"),
                    is_export: is_exported(node),
                });
                scope.push(name);
                recurse(node, source, parse, scope);
                scope.pop();
                return;
            }
        }

        "method_definition" => {
            if let Some(name) = field_text(node, "name", source) {
                let params = field_text(node, "parameters", source)
                    .unwrap_or_else(|| "()".to_string());
                parse.functions.push(FunctionEntity {
                    name: name.clone(),
                    file_path: parse.file_path.clone(),
                    start_line: start_line(node),
                    end_line: end_line(node),
                    signature: format!("{}{}", name, params),
                    is_async: has_token(node, "async"),
                    is_export: false,
                });
                scope.push(name);
                recurse(node, source, parse, scope);
                scope.pop();
                return;
            }
        }

        "class_declaration" | "abstract_class_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                let mut methods = Vec::new();
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for member in body.children(&mut cursor) {
                        if member.kind() == "method_definition" {
                            if let Some(method) = field_text(member, "name", source) {
                                methods.push(method);
                            }
                        }
                    }
                }

                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if child.kind() == "class_heritage" {
                        extract_heritage(child, source, &name, parse);
                    }
                }

                parse.classes.push(ClassEntity {
                    name: name.clone(),
                    file_path: parse.file_path.clone(),
                    start_line: start_line(node),
                    end_line: end_line(node),
                    is_export: is_exported(node),
                    is_abstract: node.kind() == "abstract_class_declaration"
                        || has_token(node, "abstract"),
                    methods,
                });
                scope.push(name);
                recurse(node, source, parse, scope);
                scope.pop();
                return;
            }
        }

        "interface_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                let mut properties = Vec::new();
                for kind in ["property_signature", "method_signature"] {
                    for member in descendants_of_kind(node, kind) {
                        if let Some(prop) = field_text(member, "name", source) {
                            properties.push(prop);
                        }
                    }
                }
                parse.interfaces.push(InterfaceEntity {
                    name,
                    file_path: parse.file_path.clone(),
                    is_export: is_exported(node),
                    properties,
                });
            }
        }

        "type_alias_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                parse.types.push(TypeEntity {
                    name,
                    file_path: parse.file_path.clone(),
                    kind: "type_alias".to_string(),
                    definition: field_text(node, "value", source).unwrap_or_default(),
                    is_export: is_exported(node),
                });
            }
            return;
        }

        "enum_declaration" => {
            if let Some(name) = field_text(node, "name", source) {
                parse.types.push(TypeEntity {
                    name,
                    file_path: parse.file_path.clone(),
                    kind: "enum".to_string(),
                    definition: field_text(node, "body", source).unwrap_or_default(),
                    is_export: is_exported(node),
                });
            }
            return;
        }

        "import_statement" => {
            extract_import(node, source, parse);
            return;
        }

        "lexical_declaration" | "variable_declaration" => {
            let is_const = has_token(node, "const");
            let is_let = has_token(node, "let");
            let mut cursor = node.walk();
            for declarator in node.named_children(&mut cursor) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let Some(name_node) = declarator.child_by_field_name("name") else {
                    continue;
                };
                // Destructuring patterns carry no single name; skip them.
                if name_node.kind() != "identifier" {
                    continue;
                }
                let name = text(name_node, source).to_string();
                let var_type = field_text(declarator, "type", source)
                    .map(|t| t.trim_start_matches(':').trim().to_string())
                    .unwrap_or_default();
                parse.variables.push(VariableEntity {
                    name: name.clone(),
                    file_path: parse.file_path.clone(),
                    var_type,
                    is_const,
                    is_let,
                    start_line: start_line(declarator),
                });

                if is_const {
                    if let Some(value) = declarator.child_by_field_name("value") {
                        if matches!(
                            value.kind(),
                            "number" | "string" | "true" | "false" | "template_string"
                        ) {
                            parse.constants.push(ConstantEntity {
                                name,
                                file_path: parse.file_path.clone(),
                                value: text(value, source).to_string(),
                            });
                        }
                    }
                }
            }
        }

        // Scope bookkeeping only: the entity was recorded by the enclosing
        // declaration, but calls inside an arrow body should report the
        // variable name as their caller.
        "variable_declarator" => {
            let named_function = node
                .child_by_field_name("value")
                .map(|v| matches!(v.kind(), "arrow_function" | "function_expression"))
                .unwrap_or(false);
            if named_function {
                if let Some(name) = field_text(node, "name", source) {
                    scope.push(name);
                    recurse(node, source, parse, scope);
                    scope.pop();
                    return;
                }
            }
        }

        "call_expression" => {
            extract_call(node, source, parse, scope);
        }

        "new_expression" => {
            if let Some(target) = field_text(node, "constructor", source) {
                parse.references.push(ReferenceEntity {
                    source_file: parse.file_path.clone(),
                    source_entity: containing(scope),
                    target_entity: target,
                    ref_type: "instantiates".to_string(),
                    line: start_line(node),
                });
            }
        }

        "jsx_opening_element" | "jsx_self_closing_element" => {
            if let Some(tag) = field_text(node, "name", source) {
                let mut props = Vec::new();
                for attr in descendants_of_kind(node, "jsx_attribute") {
                    if let Some(prop) = attr.named_child(0) {
                        props.push(text(prop, source).to_string());
                    }
                }
                let is_custom = tag
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_uppercase())
                    .unwrap_or(false);
                parse.jsx_elements.push(JsxElementEntity {
                    tag_name: tag,
                    file_path: parse.file_path.clone(),
                    containing_component: containing(scope),
                    props,
                    line: start_line(node),
                    is_custom_component: is_custom,
                });
            }
        }

        "type_annotation" => {
            for ident in descendants_of_kind(node, "type_identifier") {
                parse.type_usages.push(TypeUsageEntity {
                    using_file: parse.file_path.clone(),
                    using_entity: containing(scope),
                    used_type: text(ident, source).to_string(),
                    usage_context: "annotation".to_string(),
                    usage_location: start_line(node),
                });
            }
            return;
        }

        _ => {}
    }

    recurse(node, source, parse, scope);
}

fn recurse(node: Node, source: &str, parse: &mut ParsedFile, scope: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, source, parse, scope);
    }
}

fn extract_heritage(heritage: Node, source: &str, class_name: &str, parse: &mut ParsedFile) {
    let mut saw_clause = false;
    let mut cursor = heritage.walk();
    for clause in heritage.named_children(&mut cursor) {
        match clause.kind() {
            "extends_clause" => {
                saw_clause = true;
                let mut inner = clause.walk();
                let found = clause
                    .named_children(&mut inner)
                    .find(|c| c.kind() != "type_arguments");
                if let Some(parent) = found {
                    parse.extends.push(ExtendsEntity {
                        child_name: class_name.to_string(),
                        parent_name: text(parent, source).to_string(),
                        file_path: parse.file_path.clone(),
                    });
                }
            }
            "implements_clause" => {
                saw_clause = true;
                let mut inner = clause.walk();
                for iface in clause.named_children(&mut inner) {
                    if iface.kind() == "type_arguments" {
                        continue;
                    }
                    parse.implements.push(ImplementsEntity {
                        class_name: class_name.to_string(),
                        interface_name: text(iface, source).to_string(),
                        file_path: parse.file_path.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    // The javascript grammar puts the extended expression directly under
    // class_heritage without a clause node.
    if !saw_clause {
        let mut cursor = heritage.walk();
        let found = heritage.named_children(&mut cursor).next();
        if let Some(parent) = found {
            parse.extends.push(ExtendsEntity {
                child_name: class_name.to_string(),
                parent_name: text(parent, source).to_string(),
                file_path: parse.file_path.clone(),
            });
        }
    }
}

fn extract_import(node: Node, source: &str, parse: &mut ParsedFile) {
    let Some(module) = field_text(node, "source", source) else {
        return;
    };
    let module = module.trim_matches(|c| c == '"' || c == '\'').to_string();

    let mut imported_names = Vec::new();
    let mut is_default = false;
    let mut is_namespace = false;

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() != "import_clause" {
            continue;
        }
        let mut clause_cursor = child.walk();
        for part in child.named_children(&mut clause_cursor) {
            match part.kind() {
                "identifier" => {
                    is_default = true;
                    imported_names.push(text(part, source).to_string());
                }
                "namespace_import" => {
                    is_namespace = true;
                    for ident in descendants_of_kind(part, "identifier") {
                        imported_names.push(text(ident, source).to_string());
                    }
                }
                "named_imports" => {
                    for spec in descendants_of_kind(part, "import_specifier") {
                        if let Some(name) = field_text(spec, "name", source) {
                            imported_names.push(name);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    parse.imports.push(ImportEntity {
        module,
        file_path: parse.file_path.clone(),
        imported_names,
        is_default,
        is_namespace,
    });
}

fn extract_call(node: Node, source: &str, parse: &mut ParsedFile, scope: &[String]) {
    let Some(callee) = node.child_by_field_name("function") else {
        return;
    };

    match callee.kind() {
        "identifier" => {
            let name = text(callee, source);
            // CommonJS require counts as an import, not a call.
            if name == "require" {
                if let Some(args) = node.child_by_field_name("arguments") {
                    let mut cursor = args.walk();
                    let found = args
                        .named_children(&mut cursor)
                        .find(|a| a.kind() == "string");
                    if let Some(arg) = found {
                        let module = text(arg, source)
                            .trim_matches(|c| c == '"' || c == '\'')
                            .to_string();
                        parse.imports.push(ImportEntity {
                            module,
                            file_path: parse.file_path.clone(),
                            imported_names: Vec::new(),
                            is_default: false,
                            is_namespace: false,
                        });
                    }
                }
                return;
            }
            parse.function_calls.push(FunctionCallEntity {
                caller_file: parse.file_path.clone(),
                caller_func: containing(scope),
                called_func: name.to_string(),
                call_location: start_line(node),
                call_context: String::new(),
            });
        }
        "member_expression" => {
            let Some(method) = field_text(callee, "property", source) else {
                return;
            };
            let object = field_text(callee, "object", source).unwrap_or_default();
            parse.function_calls.push(FunctionCallEntity {
                caller_file: parse.file_path.clone(),
                caller_func: containing(scope),
                called_func: method,
                call_location: start_line(node),
                call_context: object,
            });
        }
        _ => {}
    }
}

// ── Helpers ─────────────────────────────────────────────────

pub(crate) fn text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn field_text(node: Node, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| text(n, source).to_string())
}

fn start_line(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

fn end_line(node: Node) -> u32 {
    node.end_position().row as u32 + 1
}

fn has_token(node: Node, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == token);
    found
}

fn is_exported(node: Node) -> bool {
    node.parent().map_or(false, |p| p.kind() == "export_statement")
}

fn containing(scope: &[String]) -> String {
    scope.last().cloned().unwrap_or_default()
}

fn descendants_of_kind<'a>(node: Node<'a>, kind: &str) -> Vec<Node<'a>> {
    let mut out = Vec::new();
    collect(node, kind, &mut out);
    out
}

fn collect<'a>(node: Node<'a>, kind: &str, out: &mut Vec<Node<'a>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == kind {
            out.push(child);
        }
        collect(child, kind, out);
    }
}
