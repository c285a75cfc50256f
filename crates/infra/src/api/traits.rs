//! The remote tool API as seen by the rest of the crate.

use async_trait::async_trait;
use serde_json::Value;
use toolmesh_domain::types::{
    EmbeddingResponse, HealthStatus, PassthroughAuthBundle, Tool, ToolExecutionResponse,
};

use super::errors::ApiError;

/// Operations of the remote tool-execution API.
///
/// Implemented by [`RestApiClient`](super::RestApiClient) and by wrappers
/// that add behaviour on top of another implementation, such as the
/// fallback client.
#[async_trait]
pub trait ToolApi: Send + Sync {
    /// All tools registered for `tenant_id`
    async fn list_tools(&self, tenant_id: &str) -> Result<Vec<Tool>, ApiError>;

    async fn get_tool(&self, tenant_id: &str, tool_id: &str) -> Result<Tool, ApiError>;

    async fn execute_tool(
        &self,
        tenant_id: &str,
        tool_id: &str,
        action: &str,
        parameters: Value,
    ) -> Result<ToolExecutionResponse, ApiError>;

    /// Like [`execute_tool`](Self::execute_tool), forwarding the caller's
    /// provider credentials
    async fn execute_tool_with_auth(
        &self,
        tenant_id: &str,
        tool_id: &str,
        action: &str,
        parameters: Value,
        auth: PassthroughAuthBundle,
    ) -> Result<ToolExecutionResponse, ApiError>;

    async fn get_tool_health(&self, tenant_id: &str, tool_id: &str)
        -> Result<HealthStatus, ApiError>;

    async fn generate_embedding(
        &self,
        tenant_id: &str,
        agent_id: &str,
        text: &str,
        model: Option<&str>,
        task_type: &str,
    ) -> Result<EmbeddingResponse, ApiError>;

    /// `true` when the backend answers its health endpoint with 2xx
    async fn health_check(&self) -> Result<bool, ApiError>;
}
