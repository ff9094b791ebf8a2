//! Error types for resilience policies and the domain error taxonomy they wrap.

use std::fmt;
use std::time::Duration;

/// Cap the number of stored failures inside RetryExhausted to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Unified error type for all resilience policies
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The operation exceeded the timeout duration
    Timeout { elapsed: Duration, timeout: Duration },
    /// The retry delay was aborted by cancellation before it elapsed
    Cancelled,
    /// The circuit breaker is open
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// All retry attempts were exhausted
    RetryExhausted { attempts: usize, failures: Vec<E> },
    /// The underlying operation failed
    Inner(E),
}

impl<E: Clone> Clone for ResilienceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout { elapsed, timeout } => {
                Self::Timeout { elapsed: *elapsed, timeout: *timeout }
            }
            Self::Cancelled => Self::Cancelled,
            Self::CircuitOpen { failure_count, open_duration } => {
                Self::CircuitOpen { failure_count: *failure_count, open_duration: *open_duration }
            }
            Self::RetryExhausted { attempts, failures } => {
                Self::RetryExhausted { attempts: *attempts, failures: failures.clone() }
            }
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for ResilienceError<E> {
    fn eq(&self, other: &Self) -> bool {
        use ResilienceError::*;
        match (self, other) {
            (Timeout { elapsed: a1, timeout: b1 }, Timeout { elapsed: a2, timeout: b2 }) => {
                a1 == a2 && b1 == b2
            }
            (Cancelled, Cancelled) => true,
            (
                CircuitOpen { failure_count: f1, open_duration: d1 },
                CircuitOpen { failure_count: f2, open_duration: d2 },
            ) => f1 == f2 && d1 == d2,
            (
                RetryExhausted { attempts: a1, failures: f1 },
                RetryExhausted { attempts: a2, failures: f2 },
            ) => a1 == a2 && f1 == f2,
            (Inner(e1), Inner(e2)) => e1 == e2,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for ResilienceError<E> {}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Cancelled => write!(f, "operation cancelled during a resilience delay"),
            Self::CircuitOpen { failure_count, open_duration } => {
                write!(
                    f,
                    "circuit breaker open ({} failures, open for {:?})",
                    failure_count, open_duration
                )
            }
            Self::RetryExhausted { attempts, failures } => {
                let last = failures.last().map(|e| e.to_string()).unwrap_or_default();
                write!(
                    f,
                    "retry exhausted after {} attempts ({} failures), last error: {}",
                    attempts,
                    failures.len(),
                    last
                )
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is due to circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error is due to cancellation during a delay
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is due to retry exhaustion
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Access all recorded failures for RetryExhausted, if present.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Mutably borrow the inner error if present.
    pub fn as_inner_mut(&mut self) -> Option<&mut E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Machine-classifiable failure kind driving retry/commit decisions (spec §4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    External,
    Internal,
    Timeout,
    CircuitOpen,
}

impl ErrorKind {
    /// Whether an error of this kind may be safely retried by the Retry Executor.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::External | ErrorKind::Timeout | ErrorKind::CircuitOpen)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::External => "external",
            ErrorKind::Internal => "internal",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitOpen => "circuit_open",
        };
        write!(f, "{s}")
    }
}

/// The domain error carried through every fallible operation in this crate. `kind` and
/// `retryable` are stored as separate fields per spec §4.1 — normally they agree
/// (`retryable == kind.is_retryable()`), but §4.6 carves out an explicit exception for
/// 401/403 downstream responses: kind `External`, but not retryable.
#[derive(Debug, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    pub correlation_id: Option<String>,
    retryable: bool,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            code: self.code,
            message: self.message.clone(),
            correlation_id: self.correlation_id.clone(),
            retryable: self.retryable,
            source: None,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            retryable: kind.is_retryable(),
            kind,
            code,
            message: message.into(),
            correlation_id: None,
            source: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Overrides the derived retryability, for cases like auth failures that carry an
    /// `External` kind (for metrics) but must never be retried.
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "VALIDATION_FAILED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, "VERSION_CONFLICT", message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, "EXTERNAL_FAILURE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "INTERNAL_ERROR", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, "DOWNSTREAM_TIMEOUT", message)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitOpen, "CIRCUIT_OPEN", message)
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::timeout(e.to_string())
        } else {
            AppError::external(e.to_string()).with_source(e)
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::validation(e.to_string()).with_source(e)
    }
}

/// Converts a [`ResilienceError<AppError>`] returned by the Resilience Facade back into a
/// flat [`AppError`], synthesising one for the envelope cases (timeout/circuit-open/retry
/// exhaustion) that aren't already an `Inner(AppError)`.
pub fn flatten_resilience_error(err: ResilienceError<AppError>) -> AppError {
    match err {
        ResilienceError::Inner(e) => e,
        ResilienceError::Timeout { elapsed, timeout } => {
            AppError::timeout(format!("exceeded {:?} (elapsed {:?})", timeout, elapsed))
        }
        ResilienceError::Cancelled => AppError::internal("operation cancelled during shutdown"),
        ResilienceError::CircuitOpen { failure_count, open_duration } => AppError::circuit_open(format!(
            "circuit open after {failure_count} consecutive failures (open for {:?})",
            open_duration
        )),
        ResilienceError::RetryExhausted { attempts, failures } => {
            let last = failures.into_iter().last();
            let mut err = AppError::external(format!("retry budget exhausted after {attempts} attempts"));
            if let Some(last) = last {
                err.correlation_id = last.correlation_id.clone();
                err.source = Some(Box::new(last));
            }
            err
        }
    }
}

/// Maps an HTTP status code from a downstream call into an [`AppError`], per spec §4.6.
pub fn classify_http_status(status: u16, downstream: &str, body_snippet: &str) -> AppError {
    match status {
        400 => AppError::new(
            ErrorKind::Validation,
            "DOWNSTREAM_BAD_REQUEST",
            format!("{downstream} rejected request (400): {body_snippet}"),
        ),
        404 => AppError::new(
            ErrorKind::NotFound,
            "DOWNSTREAM_NOT_FOUND",
            format!("{downstream} reported not found (404): {body_snippet}"),
        ),
        409 => AppError::new(
            ErrorKind::Conflict,
            "DOWNSTREAM_CONFLICT",
            format!("{downstream} reported a version conflict (409): {body_snippet}"),
        ),
        // Auth failures carry the External kind (for metrics) but are never retried.
        401 | 403 => AppError::new(
            ErrorKind::External,
            "DOWNSTREAM_UNAUTHORIZED",
            format!("{downstream} rejected credentials ({status}): {body_snippet}"),
        )
        .non_retryable(),
        429 => AppError::new(
            ErrorKind::External,
            "DOWNSTREAM_RATE_LIMITED",
            format!("{downstream} rate limited the request (429): {body_snippet}"),
        ),
        500..=599 => AppError::new(
            ErrorKind::External,
            "DOWNSTREAM_SERVER_ERROR",
            format!("{downstream} returned {status}: {body_snippet}"),
        ),
        other => AppError::new(
            ErrorKind::External,
            "DOWNSTREAM_UNEXPECTED_STATUS",
            format!("{downstream} returned unexpected status {other}: {body_snippet}"),
        ),
    }
}
