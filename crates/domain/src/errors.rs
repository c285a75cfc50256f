//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toolmesh_common::error::{ErrorClass, ErrorClassification};

/// Top-level error for applications embedding toolmesh.
///
/// Infra errors convert into this type with their message flattened, so it
/// stays serializable and cheap to clone across task boundaries.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ToolmeshError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorClassification for ToolmeshError {
    fn error_code(&self) -> String {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Network(_) => "NETWORK",
            Self::Timeout(_) => "TIMEOUT",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::CircuitOpen(_) => "CIRCUIT_OPEN",
            Self::Server(_) => "SERVER_ERROR",
            Self::Client(_) => "CLIENT_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Cancelled(_) => "CANCELLED",
            Self::Internal(_) => "INTERNAL",
        }
        .to_string()
    }

    fn error_class(&self) -> ErrorClass {
        match self {
            Self::Network(_) => ErrorClass::Transient,
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::RateLimited(_) => ErrorClass::RateLimited,
            Self::CircuitOpen(_) => ErrorClass::CircuitBreaker,
            Self::Server(_) | Self::Unavailable(_) => ErrorClass::ServerError,
            Self::Client(_) | Self::NotFound(_) | Self::Config(_) => ErrorClass::ClientError,
            Self::Cancelled(_) | Self::Internal(_) => ErrorClass::Unknown,
        }
    }
}

/// Result type alias for toolmesh operations
pub type Result<T> = std::result::Result<T, ToolmeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_tagging() {
        let err = ToolmeshError::CircuitOpen("tool-api".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "CircuitOpen");
        assert_eq!(json["message"], "tool-api");
    }

    #[test]
    fn test_classification() {
        assert_eq!(ToolmeshError::Network("reset".into()).error_class(), ErrorClass::Transient);
        assert!(ToolmeshError::Server("502".into()).is_retryable());
        assert!(!ToolmeshError::Client("400".into()).is_retryable());
        assert_eq!(ToolmeshError::CircuitOpen(String::new()).error_code(), "CIRCUIT_OPEN");
    }
}
