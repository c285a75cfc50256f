//! REST client for the remote tool API with circuit breaker and retry logic
//!
//! Every typed operation goes through [`HttpClient::send`], which owns the
//! retry loop and consults the shared breaker. Tool lists are cached per
//! tenant for a short TTL and dropped whenever a mutating call is made for
//! that tenant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolmesh_common::resilience::{
    BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, SharedClock, SystemClock,
};
use toolmesh_domain::config::RestClientConfig;
use toolmesh_domain::constants::{
    EMBEDDINGS_PATH, HEADER_API_KEY, HEADER_CORRELATION_ID, HEADER_TENANT_ID, HEALTH_PATH,
    TOOLS_PATH, USER_AGENT,
};
use toolmesh_domain::types::{
    EmbeddingRequest, EmbeddingResponse, ExecuteToolRequest, HealthStatus, PassthroughAuthBundle,
    Tool, ToolExecutionResponse, ToolList,
};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::errors::ApiError;
use super::metrics::{ClientMetrics, ClientMetricsRecorder};
use super::traits::ToolApi;
use crate::http::{HttpClient, HttpError, SharedBreaker};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Resilient client for the remote tool API
pub struct RestApiClient {
    inner: Arc<ClientInner>,
    health_task: TaskHandle,
}

struct ClientInner {
    http: HttpClient,
    base_url: Url,
    config: RestClientConfig,
    breaker: SharedBreaker,
    tool_cache: Cache<String, Arc<Vec<Tool>>>,
    metrics: ClientMetricsRecorder,
    cancel: CancellationToken,
}

impl RestApiClient {
    /// Create a client on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the configuration is invalid or the
    /// underlying HTTP client cannot be built.
    pub fn new(config: RestClientConfig) -> Result<Self, ApiError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a client whose breaker reads time from `clock`
    pub fn with_clock(config: RestClientConfig, clock: SharedClock) -> Result<Self, ApiError> {
        config.validate().map_err(|e| ApiError::Config(e.to_string()))?;
        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| ApiError::Config(format!("invalid base_url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!("base_url '{base_url}' cannot be a base")));
        }

        let breaker_config = CircuitBreakerConfig::builder()
            .max_failures(config.circuit_breaker.max_failures)
            .success_threshold(config.circuit_breaker.success_threshold)
            .retry_timeout(config.circuit_breaker.retry_timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to create circuit breaker: {e}")))?;
        let breaker = Arc::new(
            CircuitBreaker::with_clock("tool-api", breaker_config, clock)
                .map_err(|e| ApiError::Config(format!("Failed to create circuit breaker: {e}")))?,
        );

        let mut headers = HeaderMap::new();
        if !config.api_key.is_empty() {
            let mut value = HeaderValue::from_str(&config.api_key)
                .map_err(|_| ApiError::Config("api_key is not a valid header value".into()))?;
            value.set_sensitive(true);
            headers.insert(HEADER_API_KEY, value);
        }

        let cancel = CancellationToken::new();
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .max_retries(config.max_retries)
            .backoff(BackoffPolicy::exponential(config.retry_base_delay, config.retry_max_delay))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .circuit_breaker(breaker.clone())
            .cancellation_token(cancel.clone())
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build HttpClient: {e}")))?;

        let tool_cache = Cache::builder()
            .max_capacity(config.tool_cache_max_tenants)
            .time_to_live(config.tool_cache_ttl)
            .build();

        info!(base_url = %base_url, "tool API client created");

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                config,
                breaker,
                tool_cache,
                metrics: ClientMetricsRecorder::default(),
                cancel,
            }),
            health_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Breaker guarding every call this client makes
    pub fn circuit_breaker(&self) -> &SharedBreaker {
        &self.inner.breaker
    }

    pub fn metrics(&self) -> ClientMetrics {
        self.inner.metrics.snapshot(self.inner.breaker.state())
    }

    /// Drop the cached tool list for `tenant_id`
    pub async fn invalidate_tenant(&self, tenant_id: &str) {
        self.inner.tool_cache.invalidate(tenant_id).await;
    }

    /// Start the periodic health check.
    ///
    /// A zero `health_check_interval` disables it and this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::AlreadyRunning`] if the monitor was already
    /// started, or [`ApiError::Closed`] after [`close`](Self::close).
    pub async fn start_health_monitor(&self) -> Result<(), ApiError> {
        let interval = self.inner.config.health_check_interval;
        if interval.is_zero() {
            debug!("health monitor disabled");
            return Ok(());
        }
        self.inner.ensure_open()?;

        let mut slot = self.health_task.lock().await;
        if slot.is_some() {
            return Err(ApiError::AlreadyRunning("health monitor".into()));
        }

        let inner = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(async move {
            health_loop(inner, interval).await;
        }));
        info!(interval_ms = interval.as_millis() as u64, "health monitor started");
        Ok(())
    }

    pub async fn is_monitoring(&self) -> bool {
        self.health_task.lock().await.is_some()
    }

    /// Cancel in-flight backoff sleeps, stop the health monitor and refuse
    /// further calls.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        if let Some(handle) = self.health_task.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("health monitor task panicked: {}", e),
                Err(_) => warn!("health monitor did not complete within timeout"),
            }
        }

        self.inner.tool_cache.invalidate_all();
        info!("tool API client closed");
    }
}

impl Drop for RestApiClient {
    fn drop(&mut self) {
        if !self.inner.cancel.is_cancelled() {
            debug!("RestApiClient dropped without close; cancelling");
            self.inner.cancel.cancel();
        }
    }
}

async fn health_loop(inner: Arc<ClientInner>, interval: Duration) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => {
                debug!("health loop cancelled");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = inner.health_check().await {
                    warn!(error = %e, "periodic health check failed");
                }
            }
        }
    }
}

impl ClientInner {
    fn ensure_open(&self) -> Result<(), ApiError> {
        if self.cancel.is_cancelled() {
            return Err(ApiError::Closed);
        }
        Ok(())
    }

    /// `base_url` joined with `path` and the extra, percent-encoded segments
    fn endpoint(&self, path: &str, extra: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ApiError::Config("base_url cannot be a base".into()))?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            segments.extend(extra);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, tenant_id: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(HEADER_TENANT_ID, tenant_id)
            .header(HEADER_CORRELATION_ID, Uuid::new_v4().to_string())
    }

    async fn dispatch<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        self.ensure_open()?;
        self.metrics.record_request();

        let result = match self.http.send(operation, builder).await {
            Ok(response) => response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Decode { operation: operation.into(), message: e.to_string() }),
            Err(err) => Err(ApiError::from(err)),
        };

        self.metrics.record_outcome(result.is_ok());
        if let Err(e) = &result {
            debug!(operation, error = %e, "tool API call failed");
        }
        result
    }

    async fn fetch_tools(&self, tenant_id: &str) -> Result<Vec<Tool>, ApiError> {
        self.ensure_open()?;
        if let Some(tools) = self.tool_cache.get(tenant_id).await {
            self.metrics.record_cache(true);
            return Ok(tools.as_ref().clone());
        }
        self.metrics.record_cache(false);

        let url = self.endpoint(TOOLS_PATH, &[])?;
        let builder = self.request(Method::GET, url, tenant_id);
        let list: ToolList = self.dispatch("list_tools", builder).await?;
        self.tool_cache.insert(tenant_id.to_string(), Arc::new(list.tools.clone())).await;
        Ok(list.tools)
    }

    async fn execute(
        &self,
        tenant_id: &str,
        tool_id: &str,
        body: ExecuteToolRequest,
    ) -> Result<ToolExecutionResponse, ApiError> {
        if tool_id.is_empty() {
            return Err(ApiError::InvalidInput("tool_id must not be empty".into()));
        }
        let url = self.endpoint(TOOLS_PATH, &[tool_id, "execute"])?;
        let builder = self.request(Method::POST, url, tenant_id).json(&body);
        let result = self.dispatch("execute_tool", builder).await;

        // The call may have changed the catalog even if we did not see the answer.
        self.tool_cache.invalidate(tenant_id).await;
        result
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        self.ensure_open()?;
        let url = self.endpoint(HEALTH_PATH, &[])?;
        let timeout = self.config.health_check_timeout;
        let builder = self
            .request(Method::GET, url, &self.config.tenant_id)
            .timeout(timeout);

        match self.http.send_once(builder).await {
            Ok(_) => {
                self.metrics.record_health(true);
                debug!("API is healthy");
                Ok(true)
            }
            Err(HttpError::Status { status, .. }) => {
                self.metrics.record_health(false);
                warn!(status, "API returned non-success status");
                Ok(false)
            }
            Err(HttpError::Transport { timeout: true, .. }) => {
                self.metrics.record_health(false);
                warn!("Health check timeout");
                Err(ApiError::Timeout(timeout))
            }
            Err(e) => {
                self.metrics.record_health(false);
                warn!(error = %e, "Health check failed");
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl ToolApi for RestApiClient {
    #[instrument(skip(self))]
    async fn list_tools(&self, tenant_id: &str) -> Result<Vec<Tool>, ApiError> {
        self.inner.fetch_tools(tenant_id).await
    }

    #[instrument(skip(self))]
    async fn get_tool(&self, tenant_id: &str, tool_id: &str) -> Result<Tool, ApiError> {
        if tool_id.is_empty() {
            return Err(ApiError::InvalidInput("tool_id must not be empty".into()));
        }
        self.inner.ensure_open()?;
        if let Some(tools) = self.inner.tool_cache.get(tenant_id).await {
            if let Some(tool) = tools.iter().find(|t| t.id == tool_id) {
                self.inner.metrics.record_cache(true);
                return Ok(tool.clone());
            }
        }
        self.inner.metrics.record_cache(false);

        let url = self.inner.endpoint(TOOLS_PATH, &[tool_id])?;
        self.inner.dispatch("get_tool", self.inner.request(Method::GET, url, tenant_id)).await
    }

    #[instrument(skip(self, parameters))]
    async fn execute_tool(
        &self,
        tenant_id: &str,
        tool_id: &str,
        action: &str,
        parameters: Value,
    ) -> Result<ToolExecutionResponse, ApiError> {
        let body =
            ExecuteToolRequest { action: action.to_string(), parameters, passthrough_auth: None };
        self.inner.execute(tenant_id, tool_id, body).await
    }

    #[instrument(skip(self, parameters, auth))]
    async fn execute_tool_with_auth(
        &self,
        tenant_id: &str,
        tool_id: &str,
        action: &str,
        parameters: Value,
        auth: PassthroughAuthBundle,
    ) -> Result<ToolExecutionResponse, ApiError> {
        let body = ExecuteToolRequest {
            action: action.to_string(),
            parameters,
            passthrough_auth: (!auth.is_empty()).then_some(auth),
        };
        self.inner.execute(tenant_id, tool_id, body).await
    }

    #[instrument(skip(self))]
    async fn get_tool_health(
        &self,
        tenant_id: &str,
        tool_id: &str,
    ) -> Result<HealthStatus, ApiError> {
        if tool_id.is_empty() {
            return Err(ApiError::InvalidInput("tool_id must not be empty".into()));
        }
        let url = self.inner.endpoint(TOOLS_PATH, &[tool_id, "health"])?;
        self.inner
            .dispatch("get_tool_health", self.inner.request(Method::GET, url, tenant_id))
            .await
    }

    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn generate_embedding(
        &self,
        tenant_id: &str,
        agent_id: &str,
        text: &str,
        model: Option<&str>,
        task_type: &str,
    ) -> Result<EmbeddingResponse, ApiError> {
        if text.is_empty() {
            return Err(ApiError::InvalidInput("text must not be empty".into()));
        }
        let body = EmbeddingRequest {
            text: text.to_string(),
            agent_id: agent_id.to_string(),
            tenant_id: tenant_id.to_string(),
            task_type: task_type.to_string(),
            model: model.map(str::to_string),
        };
        let url = self.inner.endpoint(EMBEDDINGS_PATH, &[])?;
        let builder = self.inner.request(Method::POST, url, tenant_id).json(&body);
        self.inner.dispatch("generate_embedding", builder).await
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, ApiError> {
        self.inner.health_check().await
    }
}
