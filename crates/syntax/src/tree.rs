use crate::language::LanguageId;
use crate::types::{ParseError, Position};
use tree_sitter::{Node, Tree};

const SNIPPET_CHARS: usize = 40;

/// Parsed form of one source text.
///
/// Borrows the text it was built from; created by a grammar, consumed by the
/// matching extractor and then dropped.
pub struct SyntaxTree<'src> {
    source: &'src str,
    language: LanguageId,
    body: TreeBody,
    errors: Vec<ParseError>,
}

/// Grammar-specific tree representation
pub enum TreeBody {
    /// Concrete syntax tree from a tree-sitter grammar (may contain ERROR nodes)
    Concrete(Tree),
    /// Documents a data loader accepted before the first fatal error
    Documents(Vec<serde_yaml::Value>),
}

impl TreeBody {
    pub(crate) const fn kind_name(&self) -> &'static str {
        match self {
            Self::Concrete(_) => "concrete",
            Self::Documents(_) => "documents",
        }
    }
}

impl<'src> SyntaxTree<'src> {
    pub(crate) fn new(
        source: &'src str,
        language: LanguageId,
        body: TreeBody,
        mut errors: Vec<ParseError>,
    ) -> Self {
        errors.sort_by(|a, b| a.start.cmp(&b.start));
        Self {
            source,
            language,
            body,
            errors,
        }
    }

    /// Build from a tree-sitter tree, collecting its error locations
    pub(crate) fn from_concrete(source: &'src str, language: LanguageId, tree: Tree) -> Self {
        let errors = collect_errors(&tree, source);
        Self::new(source, language, TreeBody::Concrete(tree), errors)
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    pub const fn language(&self) -> LanguageId {
        self.language
    }

    pub const fn body(&self) -> &TreeBody {
        &self.body
    }

    /// Locations the grammar could not resolve, in source order
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// True when the whole text parsed without errors
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }
}

/// Walk a tree-sitter tree and report every ERROR and MISSING node.
///
/// Error subtrees are reported once, at their outermost node.
pub(crate) fn collect_errors(tree: &Tree, source: &str) -> Vec<ParseError> {
    let root = tree.root_node();
    if !root.has_error() {
        return Vec::new();
    }

    let mut errors = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() {
            errors.push(ParseError {
                start: node.start_position().into(),
                end: node.end_position().into(),
                message: format!("unexpected `{}`", snippet(node, source)),
            });
            continue;
        }
        if node.is_missing() {
            errors.push(ParseError {
                start: node.start_position().into(),
                end: node.end_position().into(),
                message: format!("missing `{}`", node.kind()),
            });
            continue;
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    errors
}

fn snippet(node: Node, source: &str) -> String {
    let text = source.get(node.start_byte()..node.end_byte()).unwrap_or_default();
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default().trim();
    if first_line.chars().count() > SNIPPET_CHARS {
        let cut: String = first_line.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    } else {
        first_line.to_string()
    }
}

/// Convert a serde_yaml error into a located parse error
pub(crate) fn yaml_error(err: &serde_yaml::Error) -> ParseError {
    let start = err
        .location()
        .map(|loc| Position::new(loc.line(), loc.column().saturating_sub(1)))
        .unwrap_or(Position::new(1, 0));
    ParseError {
        start,
        end: start,
        message: err.to_string(),
    }
}
