//! Transport-level errors produced by [`HttpClient`](super::HttpClient).

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use thiserror::Error;
use toolmesh_common::error::{ErrorClass, ErrorClassification};

/// Failure of a single logical HTTP call, after retries
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {message}")]
    Transport { message: String, timeout: bool },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String, retry_after: Option<Duration> },

    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<HttpError>,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to build request: {0}")]
    Build(String),
}

impl HttpError {
    /// HTTP status of the final response, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// True when the breaker refused the call, possibly after earlier attempts
    pub fn is_circuit_open(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_circuit_open(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::Build(err.to_string());
        }
        Self::Transport { message: err.to_string(), timeout: err.is_timeout() }
    }
}

impl ErrorClassification for HttpError {
    fn error_code(&self) -> String {
        match self {
            Self::Transport { timeout: true, .. } => "TIMEOUT".to_string(),
            Self::Transport { .. } => "NETWORK_ERROR".to_string(),
            Self::Status { status, .. } => format!("HTTP_{status}"),
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN".to_string(),
            Self::RetriesExhausted { last, .. } => last.error_code(),
            Self::Cancelled => "CANCELLED".to_string(),
            Self::Build(_) => "REQUEST_BUILD".to_string(),
        }
    }

    fn error_class(&self) -> ErrorClass {
        match self {
            Self::Transport { timeout: true, .. } => ErrorClass::Timeout,
            Self::Transport { .. } => ErrorClass::Transient,
            Self::Status { status, .. } => ErrorClass::from_status(*status),
            Self::CircuitOpen { .. } => ErrorClass::CircuitBreaker,
            Self::RetriesExhausted { last, .. } => last.error_class(),
            Self::Cancelled => ErrorClass::Unknown,
            Self::Build(_) => ErrorClass::ClientError,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            Self::RetriesExhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header given either as delta-seconds or as an
/// HTTP date.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_status_classification() {
        let err = HttpError::Status { status: 503, body: String::new(), retry_after: None };
        assert_eq!(err.error_class(), ErrorClass::ServerError);
        assert_eq!(err.error_code(), "HTTP_503");
        assert!(err.is_retryable());

        let err = HttpError::Status { status: 404, body: String::new(), retry_after: None };
        assert_eq!(err.error_class(), ErrorClass::ClientError);
        assert!(!err.is_retryable());
    }

    /// Validates that exhaustion keeps the last attempt's classification.
    ///
    /// Assertions:
    /// - Class, code and retry-after hint come from the wrapped error.
    /// - Display names the operation and attempt count.
    #[test]
    fn test_exhausted_delegates_to_last() {
        let err = HttpError::RetriesExhausted {
            operation: "list_tools".into(),
            attempts: 4,
            last: Box::new(HttpError::Status {
                status: 429,
                body: "slow down".into(),
                retry_after: Some(Duration::from_secs(7)),
            }),
        };

        assert_eq!(err.error_class(), ErrorClass::RateLimited);
        assert_eq!(err.error_code(), "HTTP_429");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(err.status(), Some(429));
        let rendered = err.to_string();
        assert!(rendered.contains("list_tools"));
        assert!(rendered.contains("4 attempts"));
    }

    #[test]
    fn test_transport_timeout_class() {
        let err = HttpError::Transport { message: "timed out".into(), timeout: true };
        assert_eq!(err.error_class(), ErrorClass::Timeout);
        assert_eq!(err.error_code(), "TIMEOUT");
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);

        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_parse_retry_after_past_date_is_none() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
