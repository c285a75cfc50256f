//! Modular common utilities shared across toolmesh crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification, collections, serde helpers
//! - `runtime`: compression and resilience primitives (clock, circuit
//!   breaker, backoff)
//! - `observability`: tracing (implied by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod collections;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod compression;
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use compression::{CompressionAlgorithm, CompressionError, CompressionService};
#[cfg(feature = "foundation")]
pub use error::{ErrorClass, ErrorClassification};
#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffPolicy, BackoffStrategy, CallPermit, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerError, CircuitBreakerMetrics, CircuitState, Clock,
    Jitter, MockClock, SharedClock, SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
