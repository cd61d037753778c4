//! Failure classification and error definitions.
//!
//! # Responsibilities
//! - Classify operation errors as transient or non-transient
//! - Define the synthetic errors raised at the execution boundary
//! - Capture failures so the breaker can report them after the fact
//!
//! # Design Decisions
//! - Classification is data (`ErrorClass`), not control flow
//! - The transient set is fixed and network-level
//! - Operation errors are returned by value; the breaker keeps a snapshot

use std::fmt;
use std::io;
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;

/// Network-level failure kinds that are eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    ConnectionClosed,
    Timeout,
    RequestCanceled,
    KeepAliveFailure,
    PipelineFailure,
    ReceiveFailure,
    ConnectFailure,
    SendFailure,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransientKind::ConnectionClosed => "connection_closed",
            TransientKind::Timeout => "timeout",
            TransientKind::RequestCanceled => "request_canceled",
            TransientKind::KeepAliveFailure => "keep_alive_failure",
            TransientKind::PipelineFailure => "pipeline_failure",
            TransientKind::ReceiveFailure => "receive_failure",
            TransientKind::ConnectFailure => "connect_failure",
            TransientKind::SendFailure => "send_failure",
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by operation errors so the retry loop can tell transient
/// network failures apart from everything else.
pub trait Transient {
    /// The transient kind of this failure, or `None` if it is not transient.
    fn transient_kind(&self) -> Option<TransientKind>;

    fn is_transient(&self) -> bool {
        self.transient_kind().is_some()
    }
}

impl Transient for io::Error {
    fn transient_kind(&self) -> Option<TransientKind> {
        match self.kind() {
            io::ErrorKind::ConnectionReset => Some(TransientKind::ConnectionClosed),
            io::ErrorKind::TimedOut => Some(TransientKind::Timeout),
            io::ErrorKind::ConnectionAborted => Some(TransientKind::RequestCanceled),
            io::ErrorKind::NotConnected => Some(TransientKind::KeepAliveFailure),
            io::ErrorKind::UnexpectedEof => Some(TransientKind::ReceiveFailure),
            io::ErrorKind::ConnectionRefused => Some(TransientKind::ConnectFailure),
            io::ErrorKind::BrokenPipe => Some(TransientKind::SendFailure),
            _ => None,
        }
    }
}

impl<T: Transient + ?Sized> Transient for Box<T> {
    fn transient_kind(&self) -> Option<TransientKind> {
        (**self).transient_kind()
    }
}

/// Result of classifying an operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient(TransientKind),
    NonTransient,
}

/// Classify an error without consuming it.
pub fn classify<E: Transient + ?Sized>(err: &E) -> ErrorClass {
    match err.transient_kind() {
        Some(kind) => ErrorClass::Transient(kind),
        None => ErrorClass::NonTransient,
    }
}

/// Snapshot of an operation failure recorded by the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedFailure {
    /// `Display` output of the original error.
    pub message: String,
    /// Rust type name of the original error.
    pub error_type: &'static str,
    /// Wall-clock time the failure was captured.
    pub captured_at: SystemTime,
}

impl CapturedFailure {
    pub fn capture<E: fmt::Display>(err: &E) -> Self {
        Self {
            message: err.to_string(),
            error_type: std::any::type_name::<E>(),
            captured_at: SystemTime::now(),
        }
    }
}

impl fmt::Display for CapturedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.error_type)
    }
}

impl std::error::Error for CapturedFailure {}

/// Raised when a circuit breaker rejects a call without invoking the operation.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{key}' is open: {message}")]
pub struct CircuitOpenError {
    /// Key of the rejecting circuit breaker.
    pub key: String,
    pub message: String,
    /// Last real failure recorded for the key.
    #[source]
    pub cause: Option<CapturedFailure>,
}

/// A single invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors in the execution policy itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Neither retry nor circuit breaker was configured.
    #[error("either retry or circuit breaker must be configured")]
    NothingConfigured,

    /// One or more options are out of range.
    #[error("invalid execution policy: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every way an execution can fail.
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    /// The wrapped operation (or the fallback) failed.
    #[error(transparent)]
    Operation(E),

    /// The circuit breaker rejected the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The execution policy is unusable.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A backoff wait was aborted by the cancellation token.
    #[error("execution cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl<E> ExecutionError<E> {
    /// The operation error, if this failure came from the operation.
    pub fn into_operation(self) -> Option<E> {
        match self {
            ExecutionError::Operation(err) => Some(err),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<&E> {
        match self {
            ExecutionError::Operation(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ExecutionError::CircuitOpen(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled { .. })
    }
}
