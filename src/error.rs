//! Error taxonomy for the SDK
//!
//! Every fallible operation in this crate surfaces a single tagged
//! [`SdkError`]. Callers branch on [`ErrorKind`] rather than downcasting;
//! the retry loop uses [`ErrorKind::is_retryable`] to decide whether a
//! failure is worth another attempt.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Result alias used throughout the crate
pub type SdkResult<T> = Result<T, SdkError>;

/// Classification of an SDK failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing, invalid, or expired credentials (HTTP 401)
    Authentication,
    /// Authenticated but not permitted (HTTP 403)
    Authorization,
    /// Resource does not exist (HTTP 404)
    NotFound,
    /// Malformed request or rejected payload (HTTP 400 and other 4xx)
    Validation,
    /// Server-side throttling (HTTP 429)
    RateLimit,
    /// Server-side failure (HTTP 5xx)
    Server,
    /// Transport-level failure (DNS, connect, TLS, broken stream)
    Network,
    /// The request exceeded its deadline
    Timeout,
    /// The local circuit breaker rejected the call without sending it
    CircuitBreakerOpen,
    /// Invalid client configuration
    Configuration,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed on a later attempt
    ///
    /// Client-side errors (auth, validation, not-found) are deterministic
    /// and never retried. Server-side throttling is deliberately excluded
    /// so that 429 responses are not hammered by the retry loop.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Server | Self::Timeout | Self::Network | Self::CircuitBreakerOpen)
    }

    /// Map an HTTP status code to an error kind
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::Validation,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            // Remaining 4xx codes (409, 422, ...) are treated as rejected
            // requests; anything else is unexpected from this API.
            402..=499 => Self::Validation,
            _ => Self::Server,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::CircuitBreakerOpen => "circuit_breaker_open",
            Self::Configuration => "configuration",
        };
        write!(f, "{name}")
    }
}

/// The single error type returned by every operation in this crate
///
/// Carries the classification, a human-readable message, and where the
/// failure came from an HTTP response, the status code and any structured
/// `details` object the server included in its error body.
#[derive(Debug, Clone, Error)]
#[error("[{kind}] {message}")]
pub struct SdkError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// HTTP status code, when the error came from a response
    pub status: Option<u16>,
    /// Structured error details from the response body, when present
    pub details: Option<Value>,
}

impl SdkError {
    /// Create an error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), status: None, details: None }
    }

    /// Attach an HTTP status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach structured details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Authentication failure (bad or missing credentials)
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    /// Invalid client configuration
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Transport-level failure
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Deadline exceeded
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Rejected locally because the circuit breaker is open
    pub fn circuit_open() -> Self {
        Self::new(ErrorKind::CircuitBreakerOpen, "circuit breaker is open, rejecting request")
    }

    /// Whether the retry loop should attempt this request again
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Classify a non-2xx HTTP response
    ///
    /// Pulls `message` and `details` out of a JSON error body when the
    /// server provides one; otherwise falls back to the raw body text.
    pub fn from_response(status: u16, body: &str) -> Self {
        let kind = ErrorKind::from_status(status);
        match serde_json::from_str::<Value>(body) {
            Ok(parsed) => {
                let message = parsed
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("HTTP {status}"));
                let details = parsed.get("details").filter(|d| !d.is_null()).cloned();
                Self { kind, message, status: Some(status), details }
            }
            Err(_) => {
                let message = if body.trim().is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {body}")
                };
                Self { kind, message, status: Some(status), details: None }
            }
        }
    }

    /// Classify a reqwest transport error
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("request timed out: {err}"))
        } else {
            Self::network(format!("network error: {err}"))
        }
    }
}
