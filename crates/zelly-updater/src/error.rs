//! Error types for the update agent.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while checking for or applying an update.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Request is missing required fields or carries malformed ones
    #[error("invalid update request: {0}")]
    Validation(String),

    /// Another session already owns this install path
    #[error("an update is already running for {}", .0.display())]
    SessionInProgress(PathBuf),

    /// Connection-level failure (DNS, refused, reset)
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status
    #[error("server returned HTTP {status}")]
    Http { status: u16 },

    /// Operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Response payload could not be understood
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Staged artifact is missing or unusable
    #[error("invalid update artifact: {0}")]
    Artifact(String),

    /// Backup tree no longer matches its recorded digests
    #[error("backup corrupted: {0}")]
    BackupCorrupted(String),

    /// No retained backup exists for the install path
    #[error("no backup available for {}", .0.display())]
    NoBackup(PathBuf),

    /// Expected file is absent
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// OS refused to start the process
    #[error("failed to launch application: {0}")]
    Launch(String),

    /// Host application kept its files locked past the wait timeout
    #[error("application still running after {waited_secs}s")]
    AppStillRunning { waited_secs: u64 },

    /// Caller cancelled the session
    #[error("update cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpdateError {
    /// Whether a download that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpdateError::Network(_) | UpdateError::Timeout(_) => true,
            UpdateError::Http { status } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpdateError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            UpdateError::Http {
                status: status.as_u16(),
            }
        } else {
            UpdateError::Network(err.to_string())
        }
    }
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => UpdateError::Io(io),
            other => UpdateError::Artifact(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for UpdateError {
    fn from(err: tokio::task::JoinError) -> Self {
        UpdateError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(UpdateError::Network("reset".into()).is_retryable());
        assert!(UpdateError::Timeout("download exceeded 5s".into()).is_retryable());
        assert!(UpdateError::Http { status: 503 }.is_retryable());
        assert!(!UpdateError::Http { status: 404 }.is_retryable());
        assert!(!UpdateError::Cancelled.is_retryable());
        assert!(!UpdateError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            UpdateError::Http { status: 404 }.to_string(),
            "server returned HTTP 404"
        );
        assert_eq!(
            UpdateError::AppStillRunning { waited_secs: 30 }.to_string(),
            "application still running after 30s"
        );
        assert_eq!(
            UpdateError::NotFound(PathBuf::from("/opt/app/tezzro")).to_string(),
            "not found: /opt/app/tezzro"
        );
    }

    #[test]
    fn test_zip_io_maps_to_io() {
        let err: UpdateError = zip::result::ZipError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
        .into();
        assert!(matches!(err, UpdateError::Io(_)));

        let err: UpdateError = zip::result::ZipError::InvalidArchive("bad".into()).into();
        assert!(matches!(err, UpdateError::Artifact(_)));
    }
}
