//! Error types for sjq
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in sjq
#[derive(Debug, Error)]
pub enum SjqError {
    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Job store error
    #[error("Store error: {0}")]
    Store(String),

    /// Job could not be turned into a running process
    #[error("Launch error: {0}")]
    Launch(String),

    /// IPC communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Malformed submission (bad memory string, unknown dependency)
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// Job not found in the store
    #[error("Job not found: {0}")]
    JobNotFound(i64),

    /// The listening socket path is already taken
    #[error("Socket path exists: {0}")]
    SocketExists(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for sjq operations
pub type Result<T> = std::result::Result<T, SjqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error() {
        let err = SjqError::Launch("no interpreter line".to_string());
        assert_eq!(err.to_string(), "Launch error: no interpreter line");
    }

    #[test]
    fn test_job_not_found_error() {
        let err = SjqError::JobNotFound(42);
        assert_eq!(err.to_string(), "Job not found: 42");
    }

    #[test]
    fn test_socket_exists_error() {
        let err = SjqError::SocketExists("/tmp/sjq.sock".to_string());
        assert_eq!(err.to_string(), "Socket path exists: /tmp/sjq.sock");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SjqError = io_err.into();
        assert!(matches!(err, SjqError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: SjqError = json_err.into();
        assert!(matches!(err, SjqError::Json(_)));
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let err: SjqError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, SjqError::Sqlite(_)));
    }
}
