//! Service-level error taxonomy.
//!
//! Every facade operation returns either a payload or one of these variants.
//! Module errors (`CacheError`, `WorkerError`, `SettingsError`) are folded in
//! at the facade boundary.

use std::io;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::SettingsError;
use crate::worker::WorkerError;

/// Result type for facade operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Structured failure returned to callers of the service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// No snapshot could be obtained (no cache on disk and the fetch failed).
    #[error("metadata cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Dataset or table absent from a valid snapshot.
    #[error("not found: {0}")]
    NotFound(String),

    /// SQL classified as unsafe or unparseable.
    #[error("query rejected: {reason}")]
    QueryRejected { reason: String },

    /// Dry-run estimate is over the configured budget.
    #[error(
        "Query scan amount exceeds limit. Expected scan amount: {estimated} bytes, Limit: {limit} bytes"
    )]
    ScanLimitExceeded { estimated: u64, limit: u64 },

    /// Remote execution did not finish in time.
    #[error("query timed out after {seconds} seconds")]
    ExecutionTimeout { seconds: u64 },

    /// Export destination escapes the export root.
    #[error("invalid output path: {0}")]
    InvalidPath(String),

    /// The warehouse call itself failed.
    #[error("warehouse error: {0}")]
    RemoteGateway(String),

    /// Export format other than csv or jsonl.
    #[error("unsupported export format: {0} (expected csv or jsonl)")]
    UnsupportedFormat(String),

    /// Settings could not be resolved.
    #[error("configuration error: {0}")]
    Config(#[from] SettingsError),

    /// I/O failure while writing an export.
    #[error("failed to write export: {0}")]
    Export(#[source] io::Error),
}

impl ServiceError {
    /// Short machine-readable code for adapters.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::QueryRejected { .. } => "QUERY_REJECTED",
            Self::ScanLimitExceeded { .. } => "SCAN_LIMIT_EXCEEDED",
            Self::ExecutionTimeout { .. } => "EXECUTION_TIMEOUT",
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::RemoteGateway(_) => "REMOTE_GATEWAY_ERROR",
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Self::Config(_) => "CONFIG_INVALID",
            Self::Export(_) => "EXPORT_FAILED",
        }
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        Self::CacheUnavailable(err.to_string())
    }
}

impl From<WorkerError> for ServiceError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Timeout(seconds) => Self::ExecutionTimeout { seconds },
            other => Self::RemoteGateway(other.to_string()),
        }
    }
}
