use super::{field_text, node_text, unquote, walk, SymbolCollector, Visit};
use crate::types::{Symbol, SymbolKind};
use tree_sitter::{Node, Tree};

/// Anonymous callables that become functions when bound to a name
const CALLABLE_VALUES: &[&str] = &[
    "arrow_function",
    "function_expression",
    "function",
    "generator_function",
];

/// Extract functions, classes and imports from a JavaScript or TypeScript tree.
///
/// Both grammars share node names for everything extracted here; the
/// TypeScript-only kinds (abstract classes, ambient signatures) simply never
/// occur in JavaScript trees.
pub(crate) fn extract(tree: &Tree, source: &str) -> Vec<Symbol> {
    let mut out = SymbolCollector::default();

    walk(tree.root_node(), |node, scope| match node.kind() {
        "function_declaration"
        | "generator_function_declaration"
        | "function_signature"
        | "method_definition"
        | "abstract_method_signature" => {
            let idx = field_text(node, "name", source)
                .map(|name| out.push(SymbolKind::Function, name, node, scope));
            Visit::Descend(idx.or(scope))
        }
        "class_declaration" | "abstract_class_declaration" | "class" => {
            let idx = field_text(node, "name", source)
                .map(|name| out.push(SymbolKind::Class, name, node, scope));
            Visit::Descend(idx.or(scope))
        }
        "variable_declarator" => bind_value(node, "name", "value", source, scope, &mut out),
        "field_definition" => bind_value(node, "property", "value", source, scope, &mut out),
        "public_field_definition" => bind_value(node, "name", "value", source, scope, &mut out),
        "import_statement" => {
            if let Some(module) = node
                .child_by_field_name("source")
                .and_then(|src| node_text(src, source))
                .map(unquote)
                .filter(|m| !m.is_empty())
            {
                out.push(SymbolKind::Import, module, node, scope);
            }
            Visit::Skip
        }
        "interface_declaration" | "type_alias_declaration" | "enum_declaration" => Visit::Skip,
        _ => Visit::Descend(scope),
    });

    out.finish()
}

/// Handle `name = <value>` bindings: declarators and class fields.
fn bind_value<'tree>(
    node: Node<'tree>,
    name_field: &str,
    value_field: &str,
    source: &str,
    scope: Option<usize>,
    out: &mut SymbolCollector,
) -> Visit<'tree> {
    let Some(value) = node.child_by_field_name(value_field) else {
        return Visit::Descend(scope);
    };
    let name = node
        .child_by_field_name(name_field)
        .filter(|n| {
            matches!(
                n.kind(),
                "identifier" | "property_identifier" | "private_property_identifier"
            )
        })
        .and_then(|n| node_text(n, source));
    let Some(name) = name else {
        return Visit::Descend(scope);
    };

    if CALLABLE_VALUES.contains(&value.kind()) {
        let idx = out.push(SymbolKind::Function, name, node, scope);
        return Visit::DescendInto(value, Some(idx));
    }
    if value.kind() == "class" {
        let idx = out.push(SymbolKind::Class, name, node, scope);
        return Visit::DescendInto(value, Some(idx));
    }
    if let Some(module) = required_module(value, source) {
        out.push(SymbolKind::Import, module, node, scope);
        return Visit::Skip;
    }
    Visit::Descend(scope)
}

/// `require("module")` -> `module`
fn required_module<'a>(call: Node<'_>, source: &'a str) -> Option<&'a str> {
    if call.kind() != "call_expression" {
        return None;
    }
    let callee = call.child_by_field_name("function")?;
    if node_text(callee, source)? != "require" {
        return None;
    }
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    if first.kind() != "string" {
        return None;
    }
    node_text(first, source).map(unquote).filter(|m| !m.is_empty())
}
