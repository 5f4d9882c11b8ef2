use crate::fingerprint::Fingerprint;
use context_syntax::{Extraction, LanguageId, ParseError, Position, Symbol, SymbolKind};
use serde::{Deserialize, Serialize};
use std::mem::size_of;
use std::path::PathBuf;

/// Whether a grammar was available for the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Parsed by a grammar; `errors` lists unresolved locations
    Parsed,
    /// No grammar matched; language is `unknown` and there are no symbols
    Unsupported,
}

/// Analysis of one file at one fingerprint.
///
/// Shared as `Arc<AnalysisResult>` and never modified after construction; a
/// re-analysis produces a new value that replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub path: PathBuf,
    pub language: LanguageId,
    pub status: AnalysisStatus,
    /// Pre-order, source order; `Symbol::parent` indexes into this list
    pub symbols: Vec<Symbol>,
    pub errors: Vec<ParseError>,
    pub fingerprint: Fingerprint,
}

impl AnalysisResult {
    #[must_use]
    pub fn parsed(path: impl Into<PathBuf>, fingerprint: Fingerprint, extraction: Extraction) -> Self {
        Self {
            path: path.into(),
            language: extraction.language,
            status: AnalysisStatus::Parsed,
            symbols: extraction.symbols,
            errors: extraction.errors,
            fingerprint,
        }
    }

    #[must_use]
    pub fn unsupported(path: impl Into<PathBuf>, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.into(),
            language: LanguageId::Unknown,
            status: AnalysisStatus::Unsupported,
            symbols: Vec::new(),
            errors: Vec::new(),
            fingerprint,
        }
    }

    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        self.status == AnalysisStatus::Unsupported
    }

    pub fn symbols_of(&self, kind: SymbolKind) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(move |s| s.kind == kind)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols_of(SymbolKind::Function)
    }

    pub fn classes(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols_of(SymbolKind::Class)
    }

    #[must_use]
    pub fn parent_of(&self, symbol: &Symbol) -> Option<&Symbol> {
        symbol.parent.and_then(|idx| self.symbols.get(idx))
    }

    /// Rough heap + inline footprint, used for the store's byte ceiling
    #[must_use]
    pub fn approx_size_bytes(&self) -> usize {
        let symbols: usize = self
            .symbols
            .iter()
            .map(|s| size_of::<Symbol>() + s.name.len())
            .sum();
        let errors: usize = self
            .errors
            .iter()
            .map(|e| size_of::<ParseError>() + e.message.len())
            .sum();
        size_of::<Self>()
            + self.path.as_os_str().len()
            + self.fingerprint.sha256.len()
            + symbols
            + errors
    }

    /// Transport view: language plus function/class/import lists
    #[must_use]
    pub fn summary(&self) -> AnalysisSummary {
        let describe = |kind| -> Vec<SymbolSummary> {
            self.symbols_of(kind)
                .map(|s| SymbolSummary {
                    name: s.name.clone(),
                    start: s.start,
                    end: s.end,
                    parent: self.parent_of(s).map(|p| p.name.clone()),
                })
                .collect()
        };

        AnalysisSummary {
            path: self.path.clone(),
            language: self.language,
            status: self.status,
            fingerprint: self.fingerprint.sha256.clone(),
            functions: describe(SymbolKind::Function),
            classes: describe(SymbolKind::Class),
            imports: describe(SymbolKind::Import),
            errors: self.errors.clone(),
        }
    }
}

/// Serializable view handed to the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub path: PathBuf,
    pub language: LanguageId,
    pub status: AnalysisStatus,
    pub fingerprint: String,
    pub functions: Vec<SymbolSummary>,
    pub classes: Vec<SymbolSummary>,
    pub imports: Vec<SymbolSummary>,
    pub errors: Vec<ParseError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub name: String,
    pub start: Position,
    pub end: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_syntax::{BuiltinGrammar, Grammar};
    use pretty_assertions::assert_eq;

    fn python_result(code: &str) -> AnalysisResult {
        let extraction = BuiltinGrammar::Python.analyze(code).unwrap();
        AnalysisResult::parsed("/repo/app.py", Fingerprint::of(code.as_bytes()), extraction)
    }

    #[test]
    fn summary_splits_symbols_by_kind() {
        let result = python_result(
            "import os\n\ndef hello_world():\n    pass\n\nclass TestClass:\n    def __init__(self):\n        pass\n",
        );
        let summary = result.summary();

        assert_eq!(summary.language, LanguageId::Python);
        assert_eq!(summary.status, AnalysisStatus::Parsed);
        let functions: Vec<_> = summary.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(functions, vec!["hello_world", "__init__"]);
        assert_eq!(summary.functions[1].parent.as_deref(), Some("TestClass"));
        assert_eq!(summary.classes.len(), 1);
        assert_eq!(summary.imports[0].name, "os");
    }

    #[test]
    fn summary_serializes_lowercase_tags() {
        let result = python_result("def f():\n    pass\n");
        let json = serde_json::to_value(result.summary()).unwrap();
        assert_eq!(json["language"], "python");
        assert_eq!(json["status"], "parsed");
        assert_eq!(json["functions"][0]["name"], "f");
        assert_eq!(json["functions"][0]["start"]["line"], 1);
        assert!(json["functions"][0].get("parent").is_none());
    }

    #[test]
    fn unsupported_has_unknown_language_and_no_symbols() {
        let result = AnalysisResult::unsupported("/repo/unknown.xyz", Fingerprint::of(b"???"));
        assert!(result.is_unsupported());
        assert_eq!(result.language, LanguageId::Unknown);
        assert!(result.symbols.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn size_grows_with_symbols() {
        let small = python_result("def a():\n    pass\n");
        let large = python_result(
            "def a():\n    pass\n\ndef b():\n    pass\n\ndef c_with_a_longer_name():\n    pass\n",
        );
        assert!(large.approx_size_bytes() > small.approx_size_bytes());
    }
}
