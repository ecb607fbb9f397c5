//! IPC message types for client ↔ daemon communication.
//!
//! Uses JSON Lines (newline-delimited JSON) over a Unix stream socket.
//! Message schema uses familiar field names (id, method, params, result, error)
//! but does NOT implement JSON-RPC 2.0 specification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{JobId, JobState};
use crate::error::SjqError;

/// Request sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    /// Unique request ID for correlating responses.
    pub id: u64,
    /// Method name (e.g., "job.submit", "job.list").
    pub method: String,
    /// Method parameters as JSON value.
    #[serde(default)]
    pub params: Value,
}

impl DaemonRequest {
    /// Create a new request with the given method and params.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a request with no parameters.
    pub fn no_params(id: u64, method: impl Into<String>) -> Self {
        Self::new(id, method, Value::Object(Default::default()))
    }
}

/// Response sent from the daemon to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    /// Request ID this response corresponds to.
    pub id: u64,
    /// Result value on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error details on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DaemonError>,
}

impl DaemonResponse {
    /// Create a success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: u64, error: DaemonError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response indicates success.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Error details in a daemon response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonError {
    /// Error code.
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DaemonError {
    /// Create a new error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error with additional data.
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message)
    }

    /// Invalid request error (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, message)
    }

    /// Method not found error (-32601).
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Unknown method: {}", method.into()))
    }

    /// Invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    /// Internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message)
    }

    /// Job not found error (1001).
    pub fn job_not_found(jobid: JobId) -> Self {
        Self::with_data(
            ErrorCode::JOB_NOT_FOUND,
            format!("Job not found: {}", jobid),
            serde_json::json!({ "jobid": jobid }),
        )
    }

    /// Invalid submission error (1002).
    pub fn invalid_submission(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_SUBMISSION, message)
    }

    /// Shutting down error (1003).
    pub fn shutting_down() -> Self {
        Self::new(ErrorCode::SHUTTING_DOWN, "Daemon is shutting down")
    }
}

impl From<SjqError> for DaemonError {
    fn from(err: SjqError) -> Self {
        match err {
            SjqError::JobNotFound(jobid) => Self::job_not_found(jobid),
            SjqError::InvalidSubmission(msg) => Self::invalid_submission(msg),
            SjqError::Json(e) => Self::invalid_params(e.to_string()),
            other => Self::internal_error(other.to_string()),
        }
    }
}

/// Standard error codes.
pub struct ErrorCode;

impl ErrorCode {
    /// Invalid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal daemon error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Job ID doesn't exist.
    pub const JOB_NOT_FOUND: i32 = 1001;
    /// Submission failed validation.
    pub const INVALID_SUBMISSION: i32 = 1002;
    /// Daemon no longer accepts work.
    pub const SHUTTING_DOWN: i32 = 1003;
}

/// Params for methods that address one job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobIdParams {
    pub jobid: JobId,
}

/// Params for `job.list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
}

/// Result of `job.submit`.
///
/// `jobid` is `None` when the request can never fit the configured maxima.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResult {
    pub jobid: Option<JobId>,
}

/// Known method names as constants.
pub struct Methods;

impl Methods {
    pub const PING: &'static str = "ping";

    // Jobs
    pub const JOB_SUBMIT: &'static str = "job.submit";
    pub const JOB_GET: &'static str = "job.get";
    pub const JOB_LIST: &'static str = "job.list";
    pub const JOB_RELEASE: &'static str = "job.release";

    // Daemon
    pub const DAEMON_STATUS: &'static str = "daemon.status";
    pub const DAEMON_SHUTDOWN: &'static str = "daemon.shutdown";
}
