//! # Toolmesh Infrastructure
//!
//! The resilience layer around a remote tool-execution API.
//!
//! This crate contains:
//! - HTTP transport with retries behind a circuit breaker
//! - The typed REST client and its tool-list cache
//! - A two-tier cache manager with coalescing, dependencies and warmup
//! - Error recovery strategies and the last-known-good fallback
//! - A batch processor that groups and coalesces API calls
//! - Config loading and tracing setup
//!
//! ## Architecture
//! - Depends on `toolmesh-common` (breaker, backoff, collections) and
//!   `toolmesh-domain` (types, config, top-level error)
//! - Contains all I/O; every background task stops on `close()`

pub mod api;
pub mod batch;
pub mod cache;
pub mod config;
pub mod errors;
pub mod fallback;
pub mod http;
pub mod recovery;
pub mod telemetry;

// Re-export commonly used items
pub use api::{ApiError, RestApiClient, ToolApi};
pub use batch::{BatchError, BatchProcessor};
pub use cache::{CacheError, CacheManager, DistributedCache, InMemoryDistributedCache};
pub use fallback::{FallbackClient, FallbackRegistry};
pub use http::{HttpClient, HttpError};
pub use recovery::{ErrorRecoveryManager, RecoveryAction, RecoveryStrategy};
pub use telemetry::init_tracing;
