//! Domain types exchanged with the remote tool API
//!
//! Wire structs are lenient on input (unknown fields are kept, optional
//! fields default) so a backend that grows its schema does not break older
//! clients.

pub mod auth;
pub mod tool;

pub use auth::{PassthroughAuthBundle, PassthroughCredential};
pub use tool::{
    EmbeddingRequest, EmbeddingResponse, ExecuteToolRequest, HealthStatus, Tool, ToolList,
    ToolExecutionResponse,
};
