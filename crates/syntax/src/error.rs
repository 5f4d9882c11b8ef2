use thiserror::Error;

/// Result type for syntax operations
pub type Result<T> = std::result::Result<T, SyntaxError>;

/// Errors that stop a grammar from producing any tree at all.
///
/// Malformed source is not an error here: it is reported as
/// [`crate::ParseError`] data alongside a best-effort tree.
#[derive(Error, Debug)]
pub enum SyntaxError {
    /// No grammar is available for the language
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The grammar could not be loaded into a parser
    #[error("Tree-sitter error: {0}")]
    TreeSitterError(String),

    /// The parser gave up without producing a tree
    #[error("Parse aborted for {language}")]
    ParseAborted { language: &'static str },

    /// The tree handed to an extractor was built by another grammar
    #[error("Tree mismatch: expected {expected} tree, got {actual}")]
    TreeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

impl SyntaxError {
    /// Create an unsupported language error
    pub fn unsupported_language(lang: impl Into<String>) -> Self {
        Self::UnsupportedLanguage(lang.into())
    }

    /// Create a tree-sitter error
    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitterError(msg.into())
    }
}
