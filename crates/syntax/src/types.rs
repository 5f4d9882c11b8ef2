use crate::language::LanguageId;
use serde::{Deserialize, Serialize};

/// A location in source text.
///
/// `line` is 1-indexed, `column` is a 0-indexed byte offset within the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    #[must_use]
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl From<tree_sitter::Point> for Position {
    fn from(point: tree_sitter::Point) -> Self {
        Self {
            line: point.row + 1,
            column: point.column,
        }
    }
}

/// Kind of extracted declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    /// Function, method, or a named callable binding
    Function,
    /// Class definition
    Class,
    /// Import statement (named after the imported module)
    Import,
}

impl SymbolKind {
    /// Get human-readable name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Import => "import",
        }
    }
}

/// One extracted declaration.
///
/// `parent` indexes into the symbol list the symbol was returned in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: String,
    pub start: Position,
    pub end: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

impl Symbol {
    /// Check if the symbol's span covers a line
    #[must_use]
    pub const fn contains_line(&self, line: usize) -> bool {
        line >= self.start.line && line <= self.end.line
    }
}

/// A location the grammar could not resolve
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParseError {
    pub start: Position,
    pub end: Position,
    pub message: String,
}

/// Output of extracting symbols from one parse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub language: LanguageId,
    /// Pre-order, source order
    pub symbols: Vec<Symbol>,
    pub errors: Vec<ParseError>,
}

impl Extraction {
    /// Extraction for content nobody can parse
    #[must_use]
    pub const fn empty(language: LanguageId) -> Self {
        Self {
            language,
            symbols: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Resolve a symbol's parent
    #[must_use]
    pub fn parent_of(&self, symbol: &Symbol) -> Option<&Symbol> {
        symbol.parent.and_then(|idx| self.symbols.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_point_is_one_based_line() {
        let pos = Position::from(tree_sitter::Point { row: 0, column: 4 });
        assert_eq!(pos, Position::new(1, 4));
    }

    #[test]
    fn test_symbol_contains_line() {
        let symbol = Symbol {
            kind: SymbolKind::Function,
            name: "run".to_string(),
            start: Position::new(10, 0),
            end: Position::new(15, 1),
            parent: None,
        };
        assert!(symbol.contains_line(10));
        assert!(symbol.contains_line(15));
        assert!(!symbol.contains_line(9));
        assert!(!symbol.contains_line(16));
    }

    #[test]
    fn test_parent_of() {
        let class = Symbol {
            kind: SymbolKind::Class,
            name: "Greeter".to_string(),
            start: Position::new(1, 0),
            end: Position::new(3, 0),
            parent: None,
        };
        let method = Symbol {
            kind: SymbolKind::Function,
            name: "greet".to_string(),
            start: Position::new(2, 4),
            end: Position::new(3, 0),
            parent: Some(0),
        };
        let extraction = Extraction {
            language: LanguageId::Python,
            symbols: vec![class.clone(), method.clone()],
            errors: vec![],
        };
        assert_eq!(extraction.parent_of(&method), Some(&class));
        assert_eq!(extraction.parent_of(&class), None);
    }
}
