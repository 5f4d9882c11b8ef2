//! # Context Syntax
//!
//! Language detection, fault-tolerant parsing and symbol extraction for the
//! Context analysis engine.
//!
//! ## Pipeline
//!
//! ```text
//! Path + bytes
//!     │
//!     ├──> LanguageId::detect (extension, shebang fallback)
//!     │
//!     ├──> GrammarRegistry::resolve ──> None = unsupported
//!     │
//!     ├──> Grammar::parse → SyntaxTree (+ ParseError locations)
//!     │
//!     └──> Grammar::extract_symbols
//!          └─> Symbol[] in source order, parents by index
//! ```
//!
//! ## Example
//!
//! ```rust
//! use context_syntax::{Grammar, GrammarRegistry, LanguageId, SymbolKind};
//!
//! let registry = GrammarRegistry::with_builtins();
//! let language = LanguageId::detect("greeter.py");
//! let grammar = registry.resolve(language).expect("python is built in");
//!
//! let extraction = grammar
//!     .analyze("class Greeter:\n    def greet(self):\n        pass\n")
//!     .unwrap();
//!
//! assert_eq!(extraction.symbols[0].kind, SymbolKind::Class);
//! assert_eq!(extraction.symbols[1].name, "greet");
//! assert_eq!(extraction.symbols[1].parent, Some(0));
//! ```

mod error;
mod extract;
mod grammar;
mod language;
mod tree;
mod types;

pub use error::{Result, SyntaxError};
pub use grammar::{BuiltinGrammar, Grammar, GrammarRegistry};
pub use language::LanguageId;
pub use tree::{SyntaxTree, TreeBody};
pub use types::{Extraction, ParseError, Position, Symbol, SymbolKind};
