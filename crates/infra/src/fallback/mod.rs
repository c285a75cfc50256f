//! Fallback path for when the tool backend is unreachable
//!
//! [`FallbackRegistry`] keeps a timestamped per-tenant snapshot of the tool
//! catalog. [`FallbackClient`] wraps any [`ToolApi`](crate::api::ToolApi),
//! refreshing the snapshot on successful reads and serving it when reads
//! fail. Mutations never fall back.

pub mod client;
pub mod errors;
pub mod registry;

pub use client::{FallbackClient, FallbackMetrics};
pub use errors::FallbackError;
pub use registry::FallbackRegistry;
