//! Batching and bounded fan-out over a [`ToolApi`](crate::api::ToolApi)

pub mod errors;
mod metrics;
pub mod processor;
pub mod types;

pub use errors::BatchError;
pub use metrics::BatchMetrics;
pub use processor::BatchProcessor;
pub use types::{BatchOperation, BatchResponse, FanOutResult, ToolInvocation};
