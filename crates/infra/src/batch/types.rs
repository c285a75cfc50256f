//! Requests, responses and fan-out results.

use std::mem;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolmesh_domain::types::{HealthStatus, Tool, ToolExecutionResponse};

use super::errors::BatchError;
use crate::api::ApiError;

/// One queued backend call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOperation {
    ListTools,
    GetTool { tool_id: String },
    ExecuteTool { tool_id: String, action: String, parameters: Value },
    GetToolHealth { tool_id: String },
}

impl BatchOperation {
    /// Name used to group a batch by operation
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ListTools => "list_tools",
            Self::GetTool { .. } => "get_tool",
            Self::ExecuteTool { .. } => "execute_tool",
            Self::GetToolHealth { .. } => "get_tool_health",
        }
    }

    /// Discriminant comparison, ignoring payloads
    pub(crate) fn same_kind(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchResponse {
    Tools(Vec<Tool>),
    Tool(Tool),
    Execution(ToolExecutionResponse),
    Health(HealthStatus),
}

/// Input to [`BatchProcessor::batch_execute_tools`](super::BatchProcessor::batch_execute_tools)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tenant_id: String,
    pub tool_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Per-item results of a fan-out call, in input order
#[derive(Debug)]
pub struct FanOutResult<T> {
    pub items: Vec<Result<T, ApiError>>,
}

impl<T> FanOutResult<T> {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn failures(&self) -> usize {
        self.items.iter().filter(|r| r.is_err()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failures() == 0
    }

    /// Summary of the failures, if there were any
    pub fn aggregate_error(&self) -> Option<BatchError> {
        let first = self.items.iter().find_map(|r| r.as_ref().err())?;
        Some(BatchError::Aggregate {
            failed: self.failures(),
            total: self.total(),
            first: first.to_string(),
        })
    }

    /// All values, or the aggregate error if any item failed
    pub fn into_result(self) -> Result<Vec<T>, BatchError> {
        if let Some(err) = self.aggregate_error() {
            return Err(err);
        }
        Ok(self.items.into_iter().filter_map(Result::ok).collect())
    }
}
