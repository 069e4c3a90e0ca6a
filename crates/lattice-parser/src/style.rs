//! CSS rule extraction
//!
//! The css grammar is error-tolerant enough to get useful selectors out of
//! SCSS as well; nested constructs it cannot model are simply skipped.

use lattice_core::model::*;
use lattice_core::ParseError;
use tree_sitter::Node;

use crate::script::text;

pub(crate) fn extract(source: &str, parse: &mut ParsedFile) -> Result<(), ParseError> {
    let grammar: tree_sitter::Language = tree_sitter_css::LANGUAGE.into();
    let tree = crate::parse_tree(source, grammar, &parse.file_path)?;
    visit(tree.root_node(), source, parse);
    Ok(())
}

fn visit(node: Node, source: &str, parse: &mut ParsedFile) {
    match node.kind() {
        "rule_set" => {
            let mut cursor = node.walk();
            let found = node
                .children(&mut cursor)
                .find(|c| c.kind() == "selectors");
            if let Some(selectors) = found {
                let mut sel_cursor = selectors.walk();
                for selector in selectors.named_children(&mut sel_cursor) {
                    parse.css_rules.push(CssRuleEntity {
                        selector: text(selector, source).trim().to_string(),
                        rule_type: classify(selector.kind()),
                        file_path: parse.file_path.clone(),
                        line: selector.start_position().row as u32 + 1,
                        property_name: String::new(),
                        value: String::new(),
                    });
                }
            }
        }

        "declaration" => {
            if let Some(property) = node.named_child(0) {
                let name = text(property, source).to_string();
                if name.starts_with("--") {
                    let mut cursor = node.walk();
                    let value = node
                        .named_children(&mut cursor)
                        .skip(1)
                        .map(|v| text(v, source))
                        .collect::<Vec<_>>()
                        .join(" ");
                    parse.css_rules.push(CssRuleEntity {
                        selector: name.clone(),
                        rule_type: "variable".to_string(),
                        file_path: parse.file_path.clone(),
                        line: node.start_position().row as u32 + 1,
                        property_name: name,
                        value,
                    });
                }
            }
        }

        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, source, parse);
    }
}

fn classify(selector_kind: &str) -> String {
    match selector_kind {
        "class_selector" => "class",
        "id_selector" => "id",
        "tag_name" => "element",
        "attribute_selector" => "attribute",
        "pseudo_class_selector" | "pseudo_element_selector" => "pseudo",
        _ => "other",
    }
    .to_string()
}
