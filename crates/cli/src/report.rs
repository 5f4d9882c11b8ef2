use context_indexer::{AnalysisOutcome, AnalysisSummary, IndexerError};
use serde::Serialize;
use std::path::PathBuf;

/// One line of `analyze` output
#[derive(Debug, Serialize)]
pub struct ReportLine {
    pub path: PathBuf,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
}

impl From<AnalysisOutcome> for ReportLine {
    fn from(outcome: AnalysisOutcome) -> Self {
        match outcome.result {
            Ok(result) => Self {
                path: outcome.path,
                ok: true,
                result: Some(result.summary()),
                error: None,
            },
            Err(err) => Self {
                path: outcome.path,
                ok: false,
                result: None,
                error: Some(ErrorReport {
                    kind: error_kind(&err),
                    message: err.to_string(),
                }),
            },
        }
    }
}

/// Stable machine-readable name for an indexer failure
pub fn error_kind(err: &IndexerError) -> &'static str {
    match err {
        IndexerError::NotFound(_) => "not_found",
        IndexerError::Unreadable { .. } => "unreadable",
        IndexerError::ReadTimeout { .. } => "read_timeout",
        IndexerError::TooLarge { .. } => "too_large",
        IndexerError::FingerprintMismatch(_) => "fingerprint_mismatch",
        IndexerError::WatchDegraded { .. } => "watch_degraded",
        IndexerError::SyntaxError(_) => "syntax",
        IndexerError::InvalidConfig(_) => "invalid_config",
        IndexerError::IoError(_) | IndexerError::Other(_) => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_carries_kind_and_no_result() {
        let outcome = AnalysisOutcome {
            path: PathBuf::from("missing.py"),
            result: Err(IndexerError::NotFound(PathBuf::from("missing.py"))),
        };

        let line = ReportLine::from(outcome);
        let json = serde_json::to_value(&line).unwrap();

        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["kind"], "not_found");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("missing.py"));
        assert!(json.get("result").is_none());
    }

    #[test]
    fn timeouts_and_ceilings_have_distinct_kinds() {
        let timeout = IndexerError::ReadTimeout {
            path: PathBuf::from("a.py"),
            timeout_ms: 10,
        };
        let too_large = IndexerError::TooLarge {
            path: PathBuf::from("a.py"),
            size: 10,
            limit: 1,
        };
        assert_eq!(error_kind(&timeout), "read_timeout");
        assert_eq!(error_kind(&too_large), "too_large");
    }
}
