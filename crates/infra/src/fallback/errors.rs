//! Fallback error types

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use toolmesh_common::error::{ErrorClass, ErrorClassification};

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("no fallback snapshot for tenant '{tenant}'")]
    Missing { tenant: String },

    #[error("fallback snapshot for tenant '{tenant}' is stale ({age:?} old, max {max_age:?})")]
    Stale { tenant: String, age: Duration, max_age: Duration },

    #[error("tool '{tool_id}' is not in the fallback snapshot for tenant '{tenant}'")]
    ToolMissing { tenant: String, tool_id: String },

    #[error("fallback snapshot I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fallback snapshot is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

impl ErrorClassification for FallbackError {
    fn error_code(&self) -> String {
        match self {
            Self::Missing { .. } => "FALLBACK_MISSING",
            Self::Stale { .. } => "FALLBACK_STALE",
            Self::ToolMissing { .. } => "FALLBACK_TOOL_MISSING",
            Self::Io { .. } => "FALLBACK_IO",
            Self::Format(_) => "FALLBACK_FORMAT",
        }
        .to_string()
    }

    fn error_class(&self) -> ErrorClass {
        ErrorClass::Unknown
    }
}
