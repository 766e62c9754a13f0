//! Error types for the worker-pool supervisor
//!
//! This module provides the crate's error taxonomy with:
//! - Error categories for classification
//! - Error codes for machine-readable identification
//! - Retryable detection for transient errors
//! - HTTP-style status code mapping for callers that bridge this pool to an API

use std::path::PathBuf;
use thiserror::Error;

/// Error category for classifying errors by their source and nature.
///
/// Categories enable:
/// - Structured logging with category filters
/// - Retry logic based on error source
/// - Caller-facing error messages by category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Worker spawn or readiness failure
    Startup,
    /// Child process crashed mid-task
    Crash,
    /// Per-task deadline exceeded
    Timeout,
    /// Acquisition deadline exceeded
    Queue,
    /// Operation attempted while the pool is not running
    State,
    /// Error returned by the user module itself
    User,
    /// Malformed wire-protocol response from a worker
    Protocol,
    /// Internal supervisor errors (bugs, invariants violated)
    Internal,
}

impl ErrorCategory {
    /// Returns true if errors in this category may be retried against a fresh handle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Crash | ErrorCategory::Protocol
        )
    }

    /// Returns a human-readable description of the category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::Startup => "worker spawn or readiness failure",
            ErrorCategory::Crash => "worker process exited unexpectedly",
            ErrorCategory::Timeout => "per-task compute deadline exceeded",
            ErrorCategory::Queue => "pool acquisition deadline exceeded",
            ErrorCategory::State => "operation attempted while pool not running",
            ErrorCategory::User => "error returned by the user compute module",
            ErrorCategory::Protocol => "malformed worker wire response",
            ErrorCategory::Internal => "internal supervisor error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Startup => write!(f, "startup"),
            ErrorCategory::Crash => write!(f, "crash"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Queue => write!(f, "queue"),
            ErrorCategory::State => write!(f, "state"),
            ErrorCategory::User => write!(f, "user"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// HTTP-style status code mapping for errors, per the wire protocol's status conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    /// 408 Request Timeout - compute timeout
    RequestTimeout,
    /// 429 Too Many Requests - queue timeout
    TooManyRequests,
    /// 500 Internal Server Error - worker/startup/protocol errors
    InternalServerError,
    /// 503 Service Unavailable - invalid state
    ServiceUnavailable,
}

impl HttpStatus {
    /// Returns the numeric status code.
    pub fn code(&self) -> u16 {
        match self {
            HttpStatus::RequestTimeout => 408,
            HttpStatus::TooManyRequests => 429,
            HttpStatus::InternalServerError => 500,
            HttpStatus::ServiceUnavailable => 503,
        }
    }
}

impl From<HttpStatus> for u16 {
    fn from(status: HttpStatus) -> u16 {
        status.code()
    }
}

impl std::fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), match self {
            HttpStatus::RequestTimeout => "Request Timeout",
            HttpStatus::TooManyRequests => "Too Many Requests",
            HttpStatus::InternalServerError => "Internal Server Error",
            HttpStatus::ServiceUnavailable => "Service Unavailable",
        })
    }
}

/// Main error type for the worker-pool supervisor.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Worker failed to spawn or never became ready in time
    #[error("worker startup error: {0}")]
    WorkerStartup(#[from] WorkerStartupError),

    /// Worker crashed while serving a task (or during acquisition)
    #[error("worker crash error: {0}")]
    WorkerCrash(#[from] WorkerCrashError),

    /// `compute()` exceeded its per-task timeout
    #[error("compute timeout error: {0}")]
    ComputeTimeout(#[from] ComputeTimeoutError),

    /// Acquisition exceeded `queue_wait_timeout`
    #[error("queue timeout error: {0}")]
    QueueTimeout(#[from] QueueTimeoutError),

    /// Operation attempted while the pool was not running
    #[error("invalid state: {0}")]
    InvalidState(#[from] InvalidStateError),

    /// The user module returned an error shape; surfaced verbatim
    #[error("user compute error: {0}")]
    UserCompute(#[from] UserComputeError),

    /// The worker's response could not be decoded as the wire protocol
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO error talking to a worker socket
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for module-loader and other external-collaborator errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error when a worker fails to spawn or never becomes ready.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct WorkerStartupError {
    pub message: String,
    pub socket_path: Option<PathBuf>,
}

impl WorkerStartupError {
    pub fn new(message: impl Into<String>, socket_path: Option<PathBuf>) -> Self {
        Self {
            message: message.into(),
            socket_path,
        }
    }
}

/// Error when a worker's child process exits unexpectedly.
#[derive(Debug, Error)]
#[error("worker {worker_id} crashed (exit code {exit_code:?})")]
pub struct WorkerCrashError {
    pub worker_id: String,
    pub exit_code: Option<i32>,
}

impl WorkerCrashError {
    pub fn new(worker_id: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            worker_id: worker_id.into(),
            exit_code,
        }
    }
}

/// Error when a task exceeds its `timeout`.
#[derive(Debug, Error)]
#[error("compute timed out after {timeout_ms}ms")]
pub struct ComputeTimeoutError {
    pub timeout_ms: u64,
}

impl ComputeTimeoutError {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

/// Error when pool acquisition exceeds `queue_wait_timeout`.
#[derive(Debug, Error)]
#[error("queue wait timed out after {waited_ms}ms")]
pub struct QueueTimeoutError {
    pub waited_ms: u64,
}

impl QueueTimeoutError {
    pub fn new(waited_ms: u64) -> Self {
        Self { waited_ms }
    }
}

/// Error when an operation is attempted while the pool is not running.
#[derive(Debug, Error)]
#[error("pool is not running: {message}")]
pub struct InvalidStateError {
    pub message: String,
}

impl InvalidStateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error returned by the user's compute module, passed through unchanged.
#[derive(Debug, Error, Clone)]
#[error("{name}: {message}")]
pub struct UserComputeError {
    pub name: String,
    pub message: String,
    pub status: u16,
}

impl UserComputeError {
    pub fn new(name: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            status,
        }
    }
}

/// Error when a worker's wire response is malformed.
#[derive(Debug, Error)]
#[error("malformed worker response: {message}")]
pub struct ProtocolError {
    pub message: String,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type for the worker-pool supervisor.
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Returns the error category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PoolError::WorkerStartup(_) => ErrorCategory::Startup,
            PoolError::WorkerCrash(_) => ErrorCategory::Crash,
            PoolError::ComputeTimeout(_) => ErrorCategory::Timeout,
            PoolError::QueueTimeout(_) => ErrorCategory::Queue,
            PoolError::InvalidState(_) => ErrorCategory::State,
            PoolError::UserCompute(_) => ErrorCategory::User,
            PoolError::Protocol(_) => ErrorCategory::Protocol,
            PoolError::Io(_) => ErrorCategory::Internal,
            PoolError::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a machine-readable error code for this error.
    ///
    /// Format: `E{category_prefix}{number}`.
    pub fn error_code(&self) -> &'static str {
        match self {
            PoolError::WorkerStartup(_) => "ESTART001",
            PoolError::WorkerCrash(_) => "ECRASH001",
            PoolError::ComputeTimeout(_) => "ETIME001",
            PoolError::QueueTimeout(_) => "EQUEUE001",
            PoolError::InvalidState(_) => "ESTATE001",
            PoolError::UserCompute(_) => "EUSER001",
            PoolError::Protocol(_) => "EPROTO001",
            PoolError::Io(_) => "EINT001",
            PoolError::Other(_) => "EINT002",
        }
    }

    /// Returns true if this error may be retried against a fresh worker.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Returns the recommended HTTP-style status code for this error
    /// (compute timeout = 408, queue timeout = 429, worker/startup = 500,
    /// invalid state = 503). User errors report their own embedded `status`.
    pub fn http_status(&self) -> u16 {
        match self {
            PoolError::ComputeTimeout(_) => HttpStatus::RequestTimeout.code(),
            PoolError::QueueTimeout(_) => HttpStatus::TooManyRequests.code(),
            PoolError::InvalidState(_) => HttpStatus::ServiceUnavailable.code(),
            PoolError::UserCompute(e) => e.status,
            PoolError::WorkerStartup(_)
            | PoolError::WorkerCrash(_)
            | PoolError::Protocol(_)
            | PoolError::Io(_)
            | PoolError::Other(_) => HttpStatus::InternalServerError.code(),
        }
    }

    /// Returns a detailed error context for logging.
    pub fn to_error_context(&self) -> ErrorContext {
        ErrorContext {
            code: self.error_code().to_string(),
            category: self.category(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            http_status: self.http_status(),
        }
    }
}

/// Detailed error context for logging and debugging.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
    pub http_status: u16,
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] [{}] {} (retryable: {}, http: {})",
            self.code, self.category, self.message, self.retryable, self.http_status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_crash_is_retryable_and_maps_to_500() {
        let error = PoolError::WorkerCrash(WorkerCrashError::new("abcd1234", Some(1)));
        assert_eq!(error.category(), ErrorCategory::Crash);
        assert!(error.is_retryable());
        assert_eq!(error.http_status(), 500);
    }

    #[test]
    fn compute_timeout_maps_to_408_and_is_not_retryable() {
        let error = PoolError::ComputeTimeout(ComputeTimeoutError::new(100));
        assert_eq!(error.http_status(), 408);
        assert!(!error.is_retryable());
    }

    #[test]
    fn queue_timeout_maps_to_429() {
        let error = PoolError::QueueTimeout(QueueTimeoutError::new(50));
        assert_eq!(error.http_status(), 429);
    }

    #[test]
    fn invalid_state_maps_to_503() {
        let error = PoolError::InvalidState(InvalidStateError::new("pool stopped"));
        assert_eq!(error.http_status(), 503);
        assert!(!error.is_retryable());
    }

    #[test]
    fn user_compute_error_reports_its_own_status() {
        let error = PoolError::UserCompute(UserComputeError::new("RangeError", "bad index", 422));
        assert_eq!(error.http_status(), 422);
        assert_eq!(error.category(), ErrorCategory::User);
    }

    #[test]
    fn error_context_display() {
        let error = PoolError::InvalidState(InvalidStateError::new("not running"));
        let ctx = error.to_error_context();
        assert_eq!(ctx.code, "ESTATE001");
        assert!(ctx.to_string().contains("ESTATE001"));
    }
}
