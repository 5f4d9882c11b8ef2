use crate::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// Runtime settings for the analysis service, its store and its watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexerConfig {
    /// Directories observed by the change watcher
    pub watch_roots: Vec<PathBuf>,
    /// Entry ceiling of the index store
    pub max_entries: usize,
    /// Approximate byte ceiling of the index store
    pub max_bytes: usize,
    /// Files above this size are rejected before parsing
    pub max_source_bytes: u64,
    pub read_timeout_ms: u64,
    pub debounce_ms: u64,
    pub notify_poll_interval_ms: u64,
    /// Re-analyze changed files right after invalidating them
    pub eager_reindex: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            watch_roots: Vec::new(),
            max_entries: 4096,
            max_bytes: 64 * MIB,
            max_source_bytes: 8 * MIB as u64,
            read_timeout_ms: 5_000,
            debounce_ms: 200,
            notify_poll_interval_ms: 2_000,
            eager_reindex: false,
        }
    }
}

impl IndexerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| IndexerError::InvalidConfig(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::from_read(path.to_path_buf(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let zeroes = [
            ("max_entries", self.max_entries == 0),
            ("max_bytes", self.max_bytes == 0),
            ("max_source_bytes", self.max_source_bytes == 0),
            ("read_timeout_ms", self.read_timeout_ms == 0),
            ("debounce_ms", self.debounce_ms == 0),
            ("notify_poll_interval_ms", self.notify_poll_interval_ms == 0),
        ];
        let invalid: Vec<&str> = zeroes
            .iter()
            .filter(|(_, zero)| *zero)
            .map(|(key, _)| *key)
            .collect();
        if !invalid.is_empty() {
            return Err(IndexerError::InvalidConfig(format!(
                "must be greater than zero: {}",
                invalid.join(", ")
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn notify_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notify_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let config = IndexerConfig::from_toml_str("").unwrap();
        assert_eq!(config, IndexerConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(200));
    }

    #[test]
    fn partial_document_overrides_only_named_keys() {
        let config = IndexerConfig::from_toml_str(
            r#"
watch_roots = ["/srv/app", "/srv/lib"]
max_entries = 16
eager_reindex = true
"#,
        )
        .unwrap();
        assert_eq!(
            config.watch_roots,
            vec![PathBuf::from("/srv/app"), PathBuf::from("/srv/lib")]
        );
        assert_eq!(config.max_entries, 16);
        assert!(config.eager_reindex);
        assert_eq!(config.max_bytes, 64 * MIB);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = IndexerConfig::from_toml_str("max_entriez = 3").unwrap_err();
        assert!(matches!(err, IndexerError::InvalidConfig(_)));
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = IndexerConfig::from_toml_str("max_entries = 0\ndebounce_ms = 0").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("max_entries"), "{message}");
        assert!(message.contains("debounce_ms"), "{message}");
    }

    #[test]
    fn load_reports_missing_file_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = IndexerConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, IndexerError::NotFound(_)));
    }
}
