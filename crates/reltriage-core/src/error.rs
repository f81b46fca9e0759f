//! Error types for triage operations

use thiserror::Error;

/// Errors that can occur while fetching and classifying CI artifacts.
///
/// [`TriageError::DownloadTimeout`] is the one recoverable network error:
/// callers emit a diagnostic line and keep going. Every other transport
/// failure is diagnostic signal about the CI infrastructure itself and
/// terminates the enclosing command.
#[derive(Error, Debug)]
pub enum TriageError {
    /// Download exceeded its timeout budget
    #[error("download of {url} took longer than {timeout_secs}s")]
    DownloadTimeout { url: String, timeout_secs: u64 },

    /// Any non-timeout transport or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected artifact content
    #[error("parse error: {0}")]
    Parse(String),

    /// Job url or name did not match any known shape
    #[error("unrecognized job: {0}")]
    UnrecognizedJob(String),

    /// Job type we deliberately do not extract artifacts for
    #[error("unsupported job type: {0}")]
    UnsupportedJob(String),

    /// Release version or stream outside the supported set
    #[error("invalid release selector: {0}")]
    InvalidSelector(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TriageError {
    /// Whether this is a local, recoverable download timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TriageError::DownloadTimeout { .. })
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(err: reqwest::Error) -> Self {
        TriageError::Transport(err.to_string())
    }
}

/// Result type for triage operations
pub type Result<T> = std::result::Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_recoverable() {
        let err = TriageError::DownloadTimeout {
            url: "https://example.com/junit".to_string(),
            timeout_secs: 5,
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("took longer than 5s"));
    }

    #[test]
    fn test_transport_is_not_a_timeout() {
        let err = TriageError::Transport("connection refused".to_string());
        assert!(!err.is_timeout());
    }
}
