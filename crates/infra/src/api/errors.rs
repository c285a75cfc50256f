//! API-specific error types
//!
//! Wraps transport failures with the decode and lifecycle errors of the
//! typed client. Classification is delegated to the transport error where
//! there is one, so recovery sees the same codes either way.

use std::time::Duration;

use thiserror::Error;
use toolmesh_common::error::{ErrorClass, ErrorClassification};

use crate::http::HttpError;

/// API operation errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("failed to decode {operation} response: {message}")]
    Decode { operation: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("client is closed")]
    Closed,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Primary call failed and the fallback could not serve either
    #[error("{primary}; fallback: {fallback}")]
    FallbackExhausted { primary: Box<ApiError>, fallback: String },
}

impl ApiError {
    /// HTTP status of the failed call, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(err) => err.status(),
            Self::FallbackExhausted { primary, .. } => primary.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl ErrorClassification for ApiError {
    fn error_code(&self) -> String {
        match self {
            Self::Http(err) => err.error_code(),
            Self::Decode { .. } => "DECODE_ERROR".to_string(),
            Self::Config(_) => "CONFIG".to_string(),
            Self::InvalidInput(_) => "INVALID_INPUT".to_string(),
            Self::AlreadyRunning(_) => "ALREADY_RUNNING".to_string(),
            Self::Closed => "CLIENT_CLOSED".to_string(),
            Self::Timeout(_) => "TIMEOUT".to_string(),
            Self::FallbackExhausted { .. } => "FALLBACK_EXHAUSTED".to_string(),
        }
    }

    fn error_class(&self) -> ErrorClass {
        match self {
            Self::Http(err) => err.error_class(),
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::Config(_) | Self::InvalidInput(_) => ErrorClass::ClientError,
            Self::FallbackExhausted { primary, .. } => primary.error_class(),
            Self::Decode { .. } | Self::AlreadyRunning(_) | Self::Closed => ErrorClass::Unknown,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http(err) => err.retry_after(),
            Self::FallbackExhausted { primary, .. } => primary.retry_after(),
            _ => None,
        }
    }
}
