//! Wire-level constants for the remote tool API.

// Endpoint paths (relative to the configured base URL)
pub const TOOLS_PATH: &str = "/api/v1/tools";
pub const EMBEDDINGS_PATH: &str = "/api/v1/embeddings";
pub const HEALTH_PATH: &str = "/health";

// Request headers
pub const HEADER_API_KEY: &str = "X-API-Key";
pub const HEADER_TENANT_ID: &str = "X-Tenant-ID";
pub const HEADER_CORRELATION_ID: &str = "X-Correlation-ID";

pub const USER_AGENT: &str = concat!("toolmesh/", env!("CARGO_PKG_VERSION"));
