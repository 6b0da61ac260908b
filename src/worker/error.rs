//! Errors raised while talking to the warehouse worker.

use std::io;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Transport failures and classified warehouse errors.
#[derive(Error, Debug)]
pub enum WorkerError {
    // --- transport ---------------------------------------------------------
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("failed to encode worker request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    #[error("failed to decode worker response: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// No response within the per-request deadline.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[error("worker process exited unexpectedly")]
    WorkerExited,

    #[error("response channel closed unexpectedly")]
    ChannelClosed,

    // --- warehouse ---------------------------------------------------------
    /// Credentials missing, expired or rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Project, dataset, table or job does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// SQL refused by the warehouse (syntax, unknown column, ...).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Any other error code reported by the worker.
    #[error("warehouse error: {message} (code: {code})")]
    Remote { code: String, message: String },
}

impl WorkerError {
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Map a worker error code onto a variant.
    pub fn classify(code: &str, message: &str) -> Self {
        match code {
            "AUTH_FAILED" | "PERMISSION_DENIED" => Self::AuthenticationFailed(message.to_string()),
            "NOT_FOUND" => Self::NotFound(message.to_string()),
            "INVALID_QUERY" => Self::InvalidQuery(message.to_string()),
            "INVALID_REQUEST" => Self::InvalidRequest(message.to_string()),
            "METHOD_NOT_FOUND" => Self::MethodNotFound(message.to_string()),
            "WORKER_EXITED" => Self::WorkerExited,
            _ => Self::remote(code, message),
        }
    }

    pub fn is_worker_exited(&self) -> bool {
        matches!(self, Self::WorkerExited | Self::ChannelClosed)
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::WorkerExited | Self::ChannelClosed
        )
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for WorkerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
