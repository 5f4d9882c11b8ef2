use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Language tag derived from a file path (and, as a fallback, its content)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    Python,
    JavaScript,
    TypeScript,
    Json,
    Yaml,
    Unknown,
}

static SHEBANG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#!\s*\S*?(?:/env(?:\s+-\S+)*\s+)?/?(?:\S*/)?(python[0-9.]*|node|nodejs|deno|ts-node|tsx)\b")
        .expect("shebang pattern is valid")
});

impl LanguageId {
    /// All languages that have a grammar
    pub const SUPPORTED: [Self; 5] = [
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Json,
        Self::Yaml,
    ];

    /// Detect language from file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "py" | "pyw" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            "json" => Self::Json,
            "yml" | "yaml" => Self::Yaml,
            _ => Self::Unknown,
        }
    }

    /// Detect language from file path. Pure function of the extension.
    pub fn detect(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }

    /// Detect from the extension, falling back to a shebang sniff when the
    /// path has no extension at all.
    pub fn detect_with_content(path: impl AsRef<Path>, content: &[u8]) -> Self {
        let path = path.as_ref();
        if path.extension().is_some() {
            return Self::detect(path);
        }
        Self::sniff(content)
    }

    /// Guess the language from an interpreter line
    pub fn sniff(content: &[u8]) -> Self {
        let first_line = content
            .split(|&b| b == b'\n')
            .next()
            .map(String::from_utf8_lossy)
            .unwrap_or_default();

        let Some(caps) = SHEBANG.captures(first_line.trim_end()) else {
            return Self::Unknown;
        };
        match caps.get(1).map(|m| m.as_str()) {
            Some(interp) if interp.starts_with("python") => Self::Python,
            Some("node" | "nodejs") => Self::JavaScript,
            Some("deno" | "ts-node" | "tsx") => Self::TypeScript,
            _ => Self::Unknown,
        }
    }

    /// Get language name as string
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this language declares callables/types at all
    pub const fn has_declarations(self) -> bool {
        matches!(self, Self::Python | Self::JavaScript | Self::TypeScript)
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
