//! Resilience primitives for calling an unreliable backend
//!
//! - **Circuit Breaker**: stops hammering a backend that keeps failing and
//!   probes it again after a cooldown
//! - **Backoff**: per-attempt retry delays with bounded symmetric jitter
//! - **Clock**: time abstraction so both can be tested without sleeping
//!
//! The retry *loop* lives with the transport in `toolmesh-infra`; this module
//! only provides the decisions it consults.

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::{BackoffPolicy, BackoffStrategy, Jitter};
pub use circuit_breaker::{
    CallError, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerError, CircuitBreakerMetrics, CircuitState, Clock, MockClock, SharedClock,
    SystemClock,
};
