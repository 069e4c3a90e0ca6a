//! Tree-sitter backed source parser
//!
//! One [`TreeSitterParser`] handles the whole support set: TypeScript and TSX
//! through the typescript grammars, JavaScript and JSX through the javascript
//! grammar, CSS and SCSS through the css grammar. A fresh `tree_sitter::Parser`
//! is created per call; the engine parses serially, so pooling buys nothing
//! here.

mod script;
mod style;

use std::path::Path;

use lattice_core::{ParseError, ParsedFile, SourceLanguage, SourceParser};

pub struct TreeSitterParser;

impl TreeSitterParser {
    pub fn new() -> Self {
        TreeSitterParser
    }
}

impl Default for TreeSitterParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for TreeSitterParser {
    fn parse(&self, path: &Path) -> Result<ParsedFile, ParseError> {
        let language = SourceLanguage::from_path(path)
            .ok_or_else(|| ParseError::Unsupported(path.to_path_buf()))?;

        let source = std::fs::read_to_string(path).map_err(|e| ParseError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut parse = ParsedFile::new(path.to_string_lossy(), language);
        match language {
            SourceLanguage::Css => style::extract(&source, &mut parse)?,
            _ => script::extract(&source, grammar_for(path), &mut parse)?,
        }
        Ok(parse)
    }
}

fn grammar_for(path: &Path) -> tree_sitter::Language {
    match path.extension().and_then(|e| e.to_str()) {
        Some("tsx") => tree_sitter_typescript::LANGUAGE_TSX.into(),
        Some("ts") => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        // .js and .jsx: the javascript grammar handles JSX natively.
        _ => tree_sitter_javascript::LANGUAGE.into(),
    }
}

pub(crate) fn parse_tree(
    source: &str,
    grammar: tree_sitter::Language,
    file_path: &str,
) -> Result<tree_sitter::Tree, ParseError> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| ParseError::Grammar(e.to_string()))?;
    parser
        .parse(source, None)
        .ok_or_else(|| ParseError::NoTree(file_path.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(name: &str, source: &str) -> ParsedFile {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, source).unwrap();
        TreeSitterParser::new().parse(&path).unwrap()
    }

    #[test]
    fn rejects_unsupported_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.rs");
        std::fs::write(&path, "fn main() {}").unwrap();
        assert!(matches!(
            TreeSitterParser::new().parse(&path),
            Err(ParseError::Unsupported(_))
        ));
    }

    #[test]
    fn extracts_typescript_functions() {
        let parse = parse_str(
            "a.ts",
            r#"
export async function fetchUser(id: string) {
    return api.get(id);
}

function helper() {}
"#,
        );

        assert_eq!(parse.language, "typescript");
        assert_eq!(parse.functions.len(), 2);

        let fetch = parse
            .functions
            .iter()
            .find(|f| f.name == "fetchUser")
            .unwrap();
        assert!(fetch.is_async);
        assert!(fetch.is_export);
        assert!(fetch.signature.contains("id"));

        let helper = parse.functions.iter().find(|f| f.name == "helper").unwrap();
        assert!(!helper.is_async);
        assert!(!helper.is_export);
    }

    #[test]
    fn extracts_classes_with_heritage() {
        let parse = parse_str(
            "b.ts",
            r#"
interface Closeable {
    close(): void;
}

export class Session extends Base implements Closeable {
    start() {}
    close() {}
}
"#,
        );

        assert_eq!(parse.classes.len(), 1);
        let class = &parse.classes[0];
        assert_eq!(class.name, "Session");
        assert!(class.is_export);
        assert!(class.methods.contains(&"start".to_string()));
        assert!(class.methods.contains(&"close".to_string()));

        assert_eq!(parse.extends.len(), 1);
        assert_eq!(parse.extends[0].parent_name, "Base");
        assert_eq!(parse.implements.len(), 1);
        assert_eq!(parse.implements[0].interface_name, "Closeable");

        assert_eq!(parse.interfaces.len(), 1);
        assert_eq!(parse.interfaces[0].name, "Closeable");
    }

    #[test]
    fn extracts_imports() {
        let parse = parse_str(
            "c.ts",
            r#"
import React from "react";
import { useState, useEffect } from "react";
import * as path from "path";
"#,
        );

        assert_eq!(parse.imports.len(), 3);
        assert!(parse
            .imports
            .iter()
            .any(|i| i.module == "react" && i.is_default));
        assert!(parse.imports.iter().any(|i| i.module == "react"
            && i.imported_names.contains(&"useState".to_string())
            && i.imported_names.contains(&"useEffect".to_string())));
        assert!(parse
            .imports
            .iter()
            .any(|i| i.module == "path" && i.is_namespace));
    }

    #[test]
    fn extracts_variables_and_constants() {
        let parse = parse_str(
            "d.ts",
            r#"
const MAX_RETRIES = 3;
let counter: number = 0;
"#,
        );

        assert_eq!(parse.variables.len(), 2);
        let max = parse
            .variables
            .iter()
            .find(|v| v.name == "MAX_RETRIES")
            .unwrap();
        assert!(max.is_const);
        let counter = parse
            .variables
            .iter()
            .find(|v| v.name == "counter")
            .unwrap();
        assert!(counter.is_let);
        assert_eq!(counter.var_type, "number");

        assert_eq!(parse.constants.len(), 1);
        assert_eq!(parse.constants[0].name, "MAX_RETRIES");
        assert_eq!(parse.constants[0].value, "3");
    }

    #[test]
    fn extracts_calls_with_caller_context() {
        let parse = parse_str(
            "e.ts",
            r#"
function outer() {
    inner();
    console.log("x");
}
"#,
        );

        let inner = parse
            .function_calls
            .iter()
            .find(|c| c.called_func == "inner")
            .unwrap();
        assert_eq!(inner.caller_func, "outer");

        let log = parse
            .function_calls
            .iter()
            .find(|c| c.called_func == "log")
            .unwrap();
        assert_eq!(log.call_context, "console");
    }

    #[test]
    fn extracts_jsx_elements() {
        let parse = parse_str(
            "f.tsx",
            r#"
export function App() {
    return <div className="app"><Button onClick={go} /></div>;
}
"#,
        );

        let button = parse
            .jsx_elements
            .iter()
            .find(|e| e.tag_name == "Button")
            .unwrap();
        assert!(button.is_custom_component);
        assert_eq!(button.containing_component, "App");
        assert!(button.props.contains(&"onClick".to_string()));

        let div = parse
            .jsx_elements
            .iter()
            .find(|e| e.tag_name == "div")
            .unwrap();
        assert!(!div.is_custom_component);
    }

    #[test]
    fn extracts_css_rules() {
        let parse = parse_str(
            "g.css",
            r#"
.button { color: red; }
#header { margin: 0; }
body { font-size: 14px; }
:root { --accent: #fff; }
"#,
        );

        assert_eq!(parse.language, "css");
        assert!(parse
            .css_rules
            .iter()
            .any(|r| r.selector == ".button" && r.rule_type == "class"));
        assert!(parse
            .css_rules
            .iter()
            .any(|r| r.selector == "#header" && r.rule_type == "id"));
        assert!(parse
            .css_rules
            .iter()
            .any(|r| r.selector == "body" && r.rule_type == "element"));
        assert!(parse
            .css_rules
            .iter()
            .any(|r| r.rule_type == "variable" && r.property_name == "--accent"));
    }

    #[test]
    fn plain_javascript_parses() {
        let parse = parse_str(
            "h.js",
            r#"
const fs = require("fs");

function main() {
    fs.readFileSync("x");
}
"#,
        );

        assert_eq!(parse.language, "javascript");
        assert_eq!(parse.functions.len(), 1);
        assert!(parse.imports.iter().any(|i| i.module == "fs"));
    }
}
