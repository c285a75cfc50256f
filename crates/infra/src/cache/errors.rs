//! Cache error types

use std::time::Duration;

use thiserror::Error;
use toolmesh_common::compression::CompressionError;
use toolmesh_common::error::{ErrorClass, ErrorClassification};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to serialize value for '{key}': {message}")]
    Serialize { key: String, message: String },

    #[error("failed to deserialize value for '{key}': {message}")]
    Deserialize { key: String, message: String },

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("distributed cache error: {0}")]
    Backend(String),

    /// The loader of a `get_or_set` call failed; every waiter sees this
    #[error("loader for '{key}' failed: {message}")]
    Loader { key: String, message: String },

    #[error("load for '{key}' was cancelled")]
    Cancelled { key: String },

    #[error("load for '{key}' timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    #[error("cache warmup is already running")]
    AlreadyRunning,

    #[error("cache manager is closed")]
    Closed,
}

impl ErrorClassification for CacheError {
    fn error_code(&self) -> String {
        match self {
            Self::Serialize { .. } => "CACHE_SERIALIZE",
            Self::Deserialize { .. } => "CACHE_DESERIALIZE",
            Self::Compression(_) => "CACHE_COMPRESSION",
            Self::Backend(_) => "CACHE_BACKEND",
            Self::Loader { .. } => "CACHE_LOADER",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::Closed => "CACHE_CLOSED",
        }
        .to_string()
    }

    fn error_class(&self) -> ErrorClass {
        match self {
            Self::Backend(_) => ErrorClass::Transient,
            Self::Timeout { .. } => ErrorClass::Timeout,
            _ => ErrorClass::Unknown,
        }
    }
}
