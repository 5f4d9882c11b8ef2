use crate::error::{Result, SyntaxError};
use crate::extract;
use crate::language::LanguageId;
use crate::tree::{collect_errors, yaml_error, SyntaxTree, TreeBody};
use crate::types::{Extraction, Symbol};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tree_sitter::{Parser, Tree};

/// Parsing capability for one language.
///
/// Implementations must be pure: no file system access, no shared mutable
/// state. A malformed source is never an error; it yields a best-effort tree
/// whose [`SyntaxTree::errors`] lists what could not be resolved.
pub trait Grammar: Send + Sync {
    /// Language this grammar parses
    fn language(&self) -> LanguageId;

    /// Parse source text into a (possibly partial) tree
    fn parse<'src>(&self, source: &'src str) -> Result<SyntaxTree<'src>>;

    /// Collect symbols from a tree this grammar produced, in source order
    fn extract_symbols(&self, tree: &SyntaxTree<'_>) -> Result<Vec<Symbol>>;

    /// Parse and extract in one step
    fn analyze(&self, source: &str) -> Result<Extraction> {
        let tree = self.parse(source)?;
        let symbols = self.extract_symbols(&tree)?;
        Ok(Extraction {
            language: self.language(),
            symbols,
            errors: tree.into_errors(),
        })
    }
}

/// The grammars shipped with the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinGrammar {
    Python,
    JavaScript,
    TypeScript,
    Json,
    Yaml,
}

impl BuiltinGrammar {
    pub const ALL: [Self; 5] = [
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Json,
        Self::Yaml,
    ];

    /// Built-in grammar for a language, if any
    pub const fn for_language(language: LanguageId) -> Option<Self> {
        match language {
            LanguageId::Python => Some(Self::Python),
            LanguageId::JavaScript => Some(Self::JavaScript),
            LanguageId::TypeScript => Some(Self::TypeScript),
            LanguageId::Json => Some(Self::Json),
            LanguageId::Yaml => Some(Self::Yaml),
            LanguageId::Unknown => None,
        }
    }

    fn parse_with(language: tree_sitter::Language, source: &str, name: &'static str) -> Result<Tree> {
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| SyntaxError::tree_sitter(format!("Failed to set language: {e}")))?;
        parser
            .parse(source, None)
            .ok_or(SyntaxError::ParseAborted { language: name })
    }

    /// TypeScript and TSX are separate grammars; try the plain dialect first
    /// and keep the TSX parse only when it resolves strictly more of the text.
    fn parse_typescript<'src>(source: &'src str) -> Result<SyntaxTree<'src>> {
        let name = LanguageId::TypeScript.as_str();
        let tree = Self::parse_with(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(), source, name)?;
        if !tree.root_node().has_error() {
            return Ok(SyntaxTree::from_concrete(source, LanguageId::TypeScript, tree));
        }

        let errors = collect_errors(&tree, source);
        let tsx = Self::parse_with(tree_sitter_typescript::LANGUAGE_TSX.into(), source, name)?;
        let tsx_errors = collect_errors(&tsx, source);
        if tsx_errors.len() < errors.len() {
            log::debug!(
                "typescript source parsed better as tsx ({} vs {} errors)",
                tsx_errors.len(),
                errors.len()
            );
            Ok(SyntaxTree::new(source, LanguageId::TypeScript, TreeBody::Concrete(tsx), tsx_errors))
        } else {
            Ok(SyntaxTree::new(source, LanguageId::TypeScript, TreeBody::Concrete(tree), errors))
        }
    }

    fn parse_yaml(source: &str) -> SyntaxTree<'_> {
        let mut documents = Vec::new();
        let mut errors = Vec::new();
        for document in serde_yaml::Deserializer::from_str(source) {
            match serde_yaml::Value::deserialize(document) {
                Ok(value) => documents.push(value),
                Err(err) => {
                    errors.push(yaml_error(&err));
                    break;
                }
            }
        }
        SyntaxTree::new(source, LanguageId::Yaml, TreeBody::Documents(documents), errors)
    }
}

impl Grammar for BuiltinGrammar {
    fn language(&self) -> LanguageId {
        match self {
            Self::Python => LanguageId::Python,
            Self::JavaScript => LanguageId::JavaScript,
            Self::TypeScript => LanguageId::TypeScript,
            Self::Json => LanguageId::Json,
            Self::Yaml => LanguageId::Yaml,
        }
    }

    fn parse<'src>(&self, source: &'src str) -> Result<SyntaxTree<'src>> {
        let language = self.language();
        let ts_language: tree_sitter::Language = match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Json => tree_sitter_json::LANGUAGE.into(),
            Self::TypeScript => return Self::parse_typescript(source),
            Self::Yaml => return Ok(Self::parse_yaml(source)),
        };
        let tree = Self::parse_with(ts_language, source, language.as_str())?;
        Ok(SyntaxTree::from_concrete(source, language, tree))
    }

    fn extract_symbols(&self, tree: &SyntaxTree<'_>) -> Result<Vec<Symbol>> {
        if tree.language() != self.language() {
            return Err(SyntaxError::TreeMismatch {
                expected: self.language().as_str(),
                actual: tree.language().as_str(),
            });
        }

        match (self, tree.body()) {
            (Self::Python, TreeBody::Concrete(t)) => Ok(extract::python::extract(t, tree.source())),
            (Self::JavaScript | Self::TypeScript, TreeBody::Concrete(t)) => {
                Ok(extract::ecmascript::extract(t, tree.source()))
            }
            // Data formats declare nothing callable
            (Self::Json, TreeBody::Concrete(_)) | (Self::Yaml, TreeBody::Documents(_)) => Ok(Vec::new()),
            (_, body) => Err(SyntaxError::TreeMismatch {
                expected: self.language().as_str(),
                actual: body.kind_name(),
            }),
        }
    }
}

/// Maps a language to the grammar that parses it.
///
/// Populated once at start-up, then shared read-only (`Arc<GrammarRegistry>`)
/// between any number of concurrent analyses.
#[derive(Clone, Default)]
pub struct GrammarRegistry {
    grammars: HashMap<LanguageId, Arc<dyn Grammar>>,
}

impl GrammarRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in grammar
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for grammar in BuiltinGrammar::ALL {
            registry.register(grammar.language(), Arc::new(grammar));
        }
        registry
    }

    /// Register (or replace) the grammar for a language.
    ///
    /// Returns the grammar previously registered for it, if any. `Unknown`
    /// cannot carry a grammar and is ignored.
    pub fn register(
        &mut self,
        language: LanguageId,
        grammar: Arc<dyn Grammar>,
    ) -> Option<Arc<dyn Grammar>> {
        if language == LanguageId::Unknown {
            log::warn!("ignoring grammar registration for the unknown language");
            return None;
        }
        self.grammars.insert(language, grammar)
    }

    /// Grammar for a language; `None` means the language is unsupported
    #[must_use]
    pub fn resolve(&self, language: LanguageId) -> Option<Arc<dyn Grammar>> {
        self.grammars.get(&language).cloned()
    }

    #[must_use]
    pub fn supports(&self, language: LanguageId) -> bool {
        self.grammars.contains_key(&language)
    }

    /// Registered languages, sorted
    #[must_use]
    pub fn languages(&self) -> Vec<LanguageId> {
        let mut languages: Vec<_> = self.grammars.keys().copied().collect();
        languages.sort();
        languages
    }
}

impl fmt::Debug for GrammarRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrammarRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}
