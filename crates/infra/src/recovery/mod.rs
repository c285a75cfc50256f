//! Error recovery
//!
//! Errors are classified by normalized code, falling back to their
//! [`ErrorClass`](toolmesh_common::error::ErrorClass):
//!
//! | Class          | Action                                      |
//! |----------------|---------------------------------------------|
//! | Transient      | retry, exponential backoff                  |
//! | Timeout        | retry, exponential backoff                  |
//! | RateLimited    | retry, linear backoff, honors `Retry-After` |
//! | CircuitBreaker | fallback                                    |
//! | ServerError    | retry once, then circuit-break              |
//! | ClientError    | none                                        |
//! | Unknown        | none                                        |

pub mod errors;
pub mod manager;
pub mod strategy;

pub use errors::RecoveryError;
pub use manager::{
    AuditEntry, ErrorRecoveryManager, ReconnectHandler, RecoveryMetrics, RecoveryOutcome,
    RecoveryRecord,
};
pub use strategy::{RecoveryAction, RecoveryStrategy};
