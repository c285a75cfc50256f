//! Batch processor error types

use std::time::Duration;

use thiserror::Error;
use toolmesh_common::error::{ErrorClass, ErrorClassification};

use crate::api::ApiError;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch queue full, request not accepted within {0:?}")]
    QueueFull(Duration),

    #[error("batch processor is shut down")]
    Shutdown,

    #[error("batch request cancelled")]
    Cancelled,

    #[error("batch processor is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Api(#[from] ApiError),

    /// A backend call shared by several requests failed; only the first
    /// request gets the original error
    #[error("shared {operation} call failed: {message}")]
    Shared { operation: String, code: String, class: ErrorClass, message: String },

    #[error("{failed} of {total} batch items failed; first error: {first}")]
    Aggregate { failed: usize, total: usize, first: String },
}

impl ErrorClassification for BatchError {
    fn error_code(&self) -> String {
        match self {
            Self::QueueFull(_) => "QUEUE_FULL".to_string(),
            Self::Shutdown => "SHUTDOWN".to_string(),
            Self::Cancelled => "CANCELLED".to_string(),
            Self::AlreadyRunning => "ALREADY_RUNNING".to_string(),
            Self::Api(err) => err.error_code(),
            Self::Shared { code, .. } => code.clone(),
            Self::Aggregate { .. } => "BATCH_PARTIAL_FAILURE".to_string(),
        }
    }

    fn error_class(&self) -> ErrorClass {
        match self {
            Self::QueueFull(_) => ErrorClass::RateLimited,
            Self::Api(err) => err.error_class(),
            Self::Shared { class, .. } => *class,
            Self::Shutdown | Self::Cancelled | Self::AlreadyRunning | Self::Aggregate { .. } => {
                ErrorClass::Unknown
            }
        }
    }
}
