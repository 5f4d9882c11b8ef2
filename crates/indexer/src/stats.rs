use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Statistics about a warm-up pass over one or more roots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmStats {
    /// Number of files visited
    pub files: usize,

    /// Files a grammar parsed
    pub parsed: usize,

    /// Files without a grammar
    pub unsupported: usize,

    /// Total symbols extracted
    pub symbols: usize,

    /// Files whose parse reported at least one error location
    pub with_parse_errors: usize,

    /// Time taken in milliseconds
    pub time_ms: u64,

    /// Files per language
    pub languages: HashMap<String, usize>,

    /// Files that could not be analyzed
    pub errors: Vec<String>,
}

impl WarmStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, language: &str, symbols: usize, parse_errors: usize) {
        self.files += 1;
        self.parsed += 1;
        self.symbols += symbols;
        if parse_errors > 0 {
            self.with_parse_errors += 1;
        }
        *self.languages.entry(language.to_string()).or_insert(0) += 1;
    }

    pub fn add_unsupported(&mut self) {
        self.files += 1;
        self.unsupported += 1;
    }

    pub fn add_error(&mut self, error: String) {
        self.files += 1;
        self.errors.push(error);
    }
}

/// Counters of the index store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub entries: usize,
    /// Approximate in-memory size of the stored results
    pub bytes: usize,
    pub hits: u64,
    /// Lookups with no entry for the path
    pub misses: u64,
    /// Lookups that found an entry computed from other content
    pub stale_misses: u64,
    pub evictions: u64,
}

/// Facade-level statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub store: StoreStats,
    /// Grammar invocations since start
    pub parses: u64,
    /// Paths with an analysis currently holding the per-path lock
    pub in_flight: usize,
}
