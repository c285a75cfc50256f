//! Recovery error types

use thiserror::Error;
use toolmesh_common::error::{ErrorClass, ErrorClassification};

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The strategy for this error says not to recover
    #[error("no recovery for {code}: {message}")]
    NoRecovery { code: String, class: ErrorClass, message: String },

    #[error("recovery exhausted after {attempts} attempts ({code}): {message}")]
    Exhausted { attempts: u32, code: String, class: ErrorClass, message: String },

    #[error("recovery cancelled")]
    Cancelled,
}

impl ErrorClassification for RecoveryError {
    fn error_code(&self) -> String {
        match self {
            Self::NoRecovery { code, .. } | Self::Exhausted { code, .. } => code.clone(),
            Self::Cancelled => "CANCELLED".to_string(),
        }
    }

    fn error_class(&self) -> ErrorClass {
        match self {
            Self::NoRecovery { class, .. } | Self::Exhausted { class, .. } => *class,
            Self::Cancelled => ErrorClass::Unknown,
        }
    }

    fn is_retryable(&self) -> bool {
        false
    }
}
