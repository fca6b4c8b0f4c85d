use std::path::PathBuf;
use thiserror::Error;

/// A case could not be mapped to a runnable flow. The case is skipped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("no flow file found for TC{case_id}")]
    NotFound { case_id: String },

    #[error("no valid flow file for TC{case_id} ({candidates} candidate(s) failed validation)")]
    Invalid { case_id: String, candidates: usize },

    #[error("failed to scan flows root {root}: {reason}")]
    Scan { root: PathBuf, reason: String },
}

/// Traffic capture problems. Never fatal for the attempt.
#[derive(Debug, Error)]
pub enum CaptureFault {
    #[error("capture binary unavailable: {0}")]
    Binary(String),

    #[error("failed to spawn capture process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("capture dump {path} unreadable: {reason}")]
    Dump { path: PathBuf, reason: String },
}

/// Result submission problems. Logged, never retried automatically.
#[derive(Debug, Error)]
pub enum UploadFault {
    #[error("test management request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("test management rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("attachment {path} unreadable: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload is not configured: {0}")]
    NotConfigured(String),
}

/// Structured-log store problems. Logged and otherwise ignored.
#[derive(Debug, Error)]
pub enum StoreFault {
    #[error("store database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store directory {path} could not be created: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_messages() {
        let err = ResolutionError::NotFound {
            case_id: "314800".to_string(),
        };
        assert_eq!(err.to_string(), "no flow file found for TC314800");

        let err = ResolutionError::Invalid {
            case_id: "12".to_string(),
            candidates: 2,
        };
        assert!(err.to_string().contains("2 candidate(s)"));
    }
}
