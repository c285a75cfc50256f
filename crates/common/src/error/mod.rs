//! Error classification shared by every layer of the client.
//!
//! Errors that cross the resilience layer are sorted into a small, fixed set
//! of [`ErrorClass`]es. Recovery decisions (retry, fallback, fail fast) are
//! made on the class and on a normalized string code, never on concrete
//! error types, so infra crates can add new errors without touching the
//! recovery table.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use toolmesh_common::error::{ErrorClass, ErrorClassification};
//!
//! #[derive(Debug)]
//! struct Throttled(u64);
//!
//! impl ErrorClassification for Throttled {
//!     fn error_code(&self) -> String {
//!         "RATE_LIMITED".to_string()
//!     }
//!
//!     fn error_class(&self) -> ErrorClass {
//!         ErrorClass::RateLimited
//!     }
//!
//!     fn retry_after(&self) -> Option<Duration> {
//!         Some(Duration::from_secs(self.0))
//!     }
//! }
//!
//! let err = Throttled(3);
//! assert!(err.is_retryable());
//! assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coarse failure taxonomy used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network blips, connection resets, DNS hiccups
    Transient,
    /// Operation exceeded its deadline
    Timeout,
    /// Backend asked us to slow down (HTTP 429)
    RateLimited,
    /// Local circuit breaker refused the call
    CircuitBreaker,
    /// Backend failed (HTTP 5xx)
    ServerError,
    /// Caller sent something invalid (HTTP 4xx other than 429)
    ClientError,
    /// Anything we cannot classify
    Unknown,
}

impl ErrorClass {
    /// Stable upper-case name, also used as the fallback error code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::Timeout => "TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::CircuitBreaker => "CIRCUIT_BREAKER",
            Self::ServerError => "SERVER_ERROR",
            Self::ClientError => "CLIENT_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether errors of this class may succeed on a later attempt.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout | Self::RateLimited | Self::ServerError)
    }

    /// Map an HTTP status code to a class.
    pub const fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            408 => Self::Timeout,
            500..=599 => Self::ServerError,
            400..=499 => Self::ClientError,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for classifying errors consistently across the workspace.
///
/// Implementors only have to name their code and class; retryability
/// follows from the class unless overridden.
pub trait ErrorClassification {
    /// Machine-readable code, e.g. `HTTP_503` or `CIRCUIT_OPEN`.
    fn error_code(&self) -> String;

    /// Coarse class used for default recovery decisions.
    fn error_class(&self) -> ErrorClass;

    /// Server-provided or computed hint for when to try again.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Check if this error is retryable
    fn is_retryable(&self) -> bool {
        self.error_class().is_retryable()
    }
}

/// Normalize a free-form error code for table lookups.
///
/// Codes are trimmed, upper-cased and have `-`, `.` and spaces folded to `_`,
/// so `"http-503"` and `"HTTP_503"` resolve to the same entry.
pub fn normalize_code(code: &str) -> String {
    code.trim()
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    //! Unit tests for error classification helpers.
    use super::*;

    #[derive(Debug)]
    struct Fake(ErrorClass);

    impl ErrorClassification for Fake {
        fn error_code(&self) -> String {
            self.0.as_str().to_string()
        }

        fn error_class(&self) -> ErrorClass {
            self.0
        }
    }

    /// Validates HTTP status mapping.
    ///
    /// Assertions:
    /// - 429 maps to `RateLimited`, 503 to `ServerError`, 404 to
    ///   `ClientError`.
    #[test]
    fn test_from_status() {
        assert_eq!(ErrorClass::from_status(429), ErrorClass::RateLimited);
        assert_eq!(ErrorClass::from_status(503), ErrorClass::ServerError);
        assert_eq!(ErrorClass::from_status(404), ErrorClass::ClientError);
        assert_eq!(ErrorClass::from_status(408), ErrorClass::Timeout);
        assert_eq!(ErrorClass::from_status(302), ErrorClass::Unknown);
    }

    /// Validates the default retryability derived from the class.
    ///
    /// Assertions:
    /// - Transient and server errors are retryable.
    /// - Client, circuit breaker and unknown errors are not.
    #[test]
    fn test_default_is_retryable() {
        assert!(Fake(ErrorClass::Transient).is_retryable());
        assert!(Fake(ErrorClass::ServerError).is_retryable());
        assert!(!Fake(ErrorClass::ClientError).is_retryable());
        assert!(!Fake(ErrorClass::CircuitBreaker).is_retryable());
        assert!(!Fake(ErrorClass::Unknown).is_retryable());
        assert_eq!(Fake(ErrorClass::Timeout).retry_after(), None);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  http-503 "), "HTTP_503");
        assert_eq!(normalize_code("circuit.open"), "CIRCUIT_OPEN");
        assert_eq!(normalize_code("RATE_LIMITED"), "RATE_LIMITED");
    }

    #[test]
    fn test_class_display_round_trips_through_serde() {
        let json = serde_json::to_string(&ErrorClass::RateLimited).unwrap_or_default();
        assert_eq!(json, "\"rate_limited\"");
        assert_eq!(ErrorClass::RateLimited.to_string(), "RATE_LIMITED");
    }
}
