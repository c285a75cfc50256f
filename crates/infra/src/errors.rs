//! Conversions from infrastructure errors into [`ToolmeshError`].
//!
//! Every infra error already classifies itself, so the mapping goes through
//! its [`ErrorClassification`] rather than matching each variant. A few
//! codes override the class: not-found, lifecycle and cancellation errors
//! have dedicated domain variants.

use std::fmt::Display;

use toolmesh_common::error::{ErrorClass, ErrorClassification};
use toolmesh_domain::ToolmeshError;

use crate::api::ApiError;
use crate::batch::BatchError;
use crate::cache::CacheError;
use crate::fallback::FallbackError;
use crate::http::HttpError;
use crate::recovery::RecoveryError;

/// Map a classified error onto the domain error, flattening its message
pub fn into_toolmesh_error<E>(err: &E, status: Option<u16>) -> ToolmeshError
where
    E: ErrorClassification + Display,
{
    let message = err.to_string();

    if status == Some(404) {
        return ToolmeshError::NotFound(message);
    }

    match err.error_code().as_str() {
        "CANCELLED" => return ToolmeshError::Cancelled(message),
        "CLIENT_CLOSED" | "CACHE_CLOSED" | "SHUTDOWN" => {
            return ToolmeshError::Unavailable(message)
        }
        "CONFIG" => return ToolmeshError::Config(message),
        _ => {}
    }

    match err.error_class() {
        ErrorClass::Transient => ToolmeshError::Network(message),
        ErrorClass::Timeout => ToolmeshError::Timeout(message),
        ErrorClass::RateLimited => ToolmeshError::RateLimited(message),
        ErrorClass::CircuitBreaker => ToolmeshError::CircuitOpen(message),
        ErrorClass::ServerError => ToolmeshError::Server(message),
        ErrorClass::ClientError => ToolmeshError::Client(message),
        ErrorClass::Unknown => ToolmeshError::Internal(message),
    }
}

impl From<HttpError> for ToolmeshError {
    fn from(value: HttpError) -> Self {
        into_toolmesh_error(&value, value.status())
    }
}

impl From<ApiError> for ToolmeshError {
    fn from(value: ApiError) -> Self {
        into_toolmesh_error(&value, value.status())
    }
}

impl From<BatchError> for ToolmeshError {
    fn from(value: BatchError) -> Self {
        let status = match &value {
            BatchError::Api(err) => err.status(),
            _ => None,
        };
        into_toolmesh_error(&value, status)
    }
}

impl From<CacheError> for ToolmeshError {
    fn from(value: CacheError) -> Self {
        into_toolmesh_error(&value, None)
    }
}

impl From<RecoveryError> for ToolmeshError {
    fn from(value: RecoveryError) -> Self {
        into_toolmesh_error(&value, None)
    }
}

impl From<FallbackError> for ToolmeshError {
    fn from(value: FallbackError) -> Self {
        match value {
            FallbackError::Missing { .. }
            | FallbackError::Stale { .. }
            | FallbackError::ToolMissing { .. } => ToolmeshError::Unavailable(value.to_string()),
            other => into_toolmesh_error(&other, None),
        }
    }
}
