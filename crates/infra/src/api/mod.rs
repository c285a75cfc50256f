//! Remote tool API: trait, REST implementation and its error type
//!
//! The REST client owns the retry executor and circuit breaker (via
//! [`crate::http::HttpClient`]) plus a short-lived per-tenant tool cache.

pub mod client;
pub mod errors;
pub mod metrics;
pub mod traits;

pub use client::RestApiClient;
pub use errors::ApiError;
pub use metrics::ClientMetrics;
pub use traits::ToolApi;
