use super::{field_text, node_text, walk, SymbolCollector, Visit};
use crate::types::{Symbol, SymbolKind};
use tree_sitter::{Node, Tree};

/// Extract functions, classes and imports from a Python tree
pub(crate) fn extract(tree: &Tree, source: &str) -> Vec<Symbol> {
    let mut out = SymbolCollector::default();

    walk(tree.root_node(), |node, scope| match node.kind() {
        "function_definition" => {
            let idx = field_text(node, "name", source)
                .map(|name| out.push(SymbolKind::Function, name, node, scope));
            Visit::Descend(idx.or(scope))
        }
        "class_definition" => {
            let idx = field_text(node, "name", source)
                .map(|name| out.push(SymbolKind::Class, name, node, scope));
            Visit::Descend(idx.or(scope))
        }
        "import_statement" => {
            let mut cursor = node.walk();
            for module in node.children_by_field_name("name", &mut cursor) {
                if let Some(name) = imported_module(module, source) {
                    out.push(SymbolKind::Import, name, node, scope);
                }
            }
            Visit::Skip
        }
        "import_from_statement" => {
            if let Some(module) = field_text(node, "module_name", source) {
                out.push(SymbolKind::Import, module, node, scope);
            }
            Visit::Skip
        }
        "assignment" => match lambda_binding(node, source) {
            Some(name) => {
                let idx = out.push(SymbolKind::Function, name, node, scope);
                Visit::Descend(Some(idx))
            }
            None => Visit::Descend(scope),
        },
        _ => Visit::Descend(scope),
    });

    out.finish()
}

fn imported_module<'a>(module: Node<'_>, source: &'a str) -> Option<&'a str> {
    let dotted = if module.kind() == "aliased_import" {
        module.child_by_field_name("name")?
    } else {
        module
    };
    node_text(dotted, source).map(str::trim)
}

/// `name = lambda ...` binds an otherwise anonymous callable to a name
fn lambda_binding<'a>(node: Node<'_>, source: &'a str) -> Option<&'a str> {
    let left = node.child_by_field_name("left")?;
    let right = node.child_by_field_name("right")?;
    if left.kind() != "identifier" || right.kind() != "lambda" {
        return None;
    }
    node_text(left, source)
}
