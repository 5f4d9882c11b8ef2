//! Language-specific symbol extraction over tree-sitter trees.
//!
//! Every extractor walks the tree with [`walk`], which visits nodes in
//! pre-order with an explicit stack (deeply nested sources must not overflow
//! the thread stack). Symbols are pushed as their nodes are visited, so the
//! output is in source order with parents always preceding their children.

pub(crate) mod ecmascript;
pub(crate) mod python;

use crate::types::{Position, Symbol, SymbolKind};
use tree_sitter::Node;

/// What the walker should do after visiting a node
pub(crate) enum Visit<'tree> {
    /// Visit the node's named children under the given scope
    Descend(Option<usize>),
    /// Visit another node's named children instead (skipping that node itself)
    DescendInto(Node<'tree>, Option<usize>),
    /// Do not look below this node
    Skip,
}

pub(crate) fn walk<'tree, F>(root: Node<'tree>, mut on_node: F)
where
    F: FnMut(Node<'tree>, Option<usize>) -> Visit<'tree>,
{
    let mut stack: Vec<(Node<'tree>, Option<usize>)> = vec![(root, None)];
    while let Some((node, scope)) = stack.pop() {
        let (container, child_scope) = match on_node(node, scope) {
            Visit::Skip => continue,
            Visit::Descend(child_scope) => (node, child_scope),
            Visit::DescendInto(other, child_scope) => (other, child_scope),
        };
        let mut cursor = container.walk();
        let children: Vec<_> = container.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev().map(|child| (child, child_scope)));
    }
}

/// Accumulates symbols and hands out parent indices
#[derive(Default)]
pub(crate) struct SymbolCollector {
    symbols: Vec<Symbol>,
}

impl SymbolCollector {
    pub(crate) fn push(
        &mut self,
        kind: SymbolKind,
        name: impl Into<String>,
        span: Node<'_>,
        parent: Option<usize>,
    ) -> usize {
        self.symbols.push(Symbol {
            kind,
            name: name.into(),
            start: Position::from(span.start_position()),
            end: Position::from(span.end_position()),
            parent,
        });
        self.symbols.len() - 1
    }

    pub(crate) fn finish(self) -> Vec<Symbol> {
        self.symbols
    }
}

/// Source text covered by a node
pub(crate) fn node_text<'a>(node: Node<'_>, source: &'a str) -> Option<&'a str> {
    source.get(node.start_byte()..node.end_byte())
}

/// Text of a node's field child, if present and non-empty
pub(crate) fn field_text<'a>(node: Node<'_>, field: &str, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field)
        .filter(|child| !child.is_missing())
        .and_then(|child| node_text(child, source))
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// Strip the quotes around a string literal
pub(crate) fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

#[cfg(test)]
mod tests {
    use super::unquote;

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"react\""), "react");
        assert_eq!(unquote("'./util'"), "./util");
        assert_eq!(unquote("`tpl`"), "tpl");
        assert_eq!(unquote("bare"), "bare");
    }
}
