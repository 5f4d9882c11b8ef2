use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {timeout_ms}ms reading {}", path.display())]
    ReadTimeout { path: PathBuf, timeout_ms: u64 },

    #[error("{} is {size} bytes, above the {limit} byte parse ceiling", path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Fingerprint mismatch for {}: result was computed from other content", .0.display())]
    FingerprintMismatch(PathBuf),

    #[error("Stopped watching {}: {reason}", path.display())]
    WatchDegraded { path: PathBuf, reason: String },

    #[error("Syntax error: {0}")]
    SyntaxError(#[from] context_syntax::SyntaxError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Map a read failure onto the file-access taxonomy
    pub(crate) fn from_read(path: PathBuf, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Unreadable { path, source: err }
        }
    }

    /// True for conditions where the file itself is missing or inaccessible
    #[must_use]
    pub const fn is_file_access(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Unreadable { .. } | Self::ReadTimeout { .. } | Self::TooLarge { .. }
        )
    }
}
