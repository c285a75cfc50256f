//! `ToolApi` wrapper that serves the last known good catalog when the
//! primary path fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use toolmesh_domain::config::FallbackConfig;
use toolmesh_domain::types::{
    EmbeddingResponse, HealthStatus, PassthroughAuthBundle, Tool, ToolExecutionResponse,
};
use tracing::{debug, instrument, warn};

use super::errors::FallbackError;
use super::registry::FallbackRegistry;
use crate::api::{ApiError, ToolApi};
use crate::recovery::{ErrorRecoveryManager, RecoveryAction};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FallbackMetrics {
    pub primary_successes: u64,
    pub primary_failures: u64,
    pub fallback_hits: u64,
    pub fallback_misses: u64,
    pub last_fallback_at: Option<DateTime<Utc>>,
}

pub struct FallbackClient {
    primary: Arc<dyn ToolApi>,
    registry: Arc<FallbackRegistry>,
    recovery: Option<Arc<ErrorRecoveryManager>>,
    persist_path: Option<PathBuf>,
    metrics: Mutex<FallbackMetrics>,
}

impl FallbackClient {
    pub fn new(primary: Arc<dyn ToolApi>, registry: Arc<FallbackRegistry>) -> Self {
        Self {
            primary,
            registry,
            recovery: None,
            persist_path: None,
            metrics: Mutex::new(FallbackMetrics::default()),
        }
    }

    /// Registry sized from `config`, persisting on every refresh when
    /// `persist_on_update` is set.
    ///
    /// With a `persist_path`, the snapshot saved by a previous run is loaded
    /// first, so a restart during an outage still has a catalog to serve. A
    /// missing or unreadable file leaves the registry empty.
    pub async fn from_config(primary: Arc<dyn ToolApi>, config: &FallbackConfig) -> Self {
        let registry = Arc::new(FallbackRegistry::new(config.max_age));
        if let Some(path) = &config.persist_path {
            restore(&registry, path).await;
        }
        let client = Self::new(primary, registry);
        match (&config.persist_path, config.persist_on_update) {
            (Some(path), true) => client.with_persistence(path.clone()),
            _ => client,
        }
    }

    /// Classify primary failures through `recovery` before falling back
    #[must_use]
    pub fn with_recovery(mut self, recovery: Arc<ErrorRecoveryManager>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Write the registry to `path` after every refresh
    #[must_use]
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }

    pub fn registry(&self) -> &Arc<FallbackRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> FallbackMetrics {
        self.metrics.lock().clone()
    }

    fn record_primary(&self, success: bool) {
        let mut metrics = self.metrics.lock();
        if success {
            metrics.primary_successes += 1;
        } else {
            metrics.primary_failures += 1;
        }
    }

    /// Whether `err` may be answered from the snapshot
    fn may_fall_back(&self, err: &ApiError) -> bool {
        match &self.recovery {
            Some(recovery) => {
                let strategy = recovery.handle_error(err);
                strategy.action != RecoveryAction::None || strategy.fallback_enabled
            }
            None => true,
        }
    }

    fn serve<T>(
        &self,
        primary: ApiError,
        fallback: Result<T, FallbackError>,
    ) -> Result<T, ApiError> {
        match fallback {
            Ok(value) => {
                warn!(error = %primary, "primary failed, serving fallback snapshot");
                let mut metrics = self.metrics.lock();
                metrics.fallback_hits += 1;
                metrics.last_fallback_at = Some(Utc::now());
                Ok(value)
            }
            Err(e) => {
                debug!(error = %primary, fallback = %e, "fallback unavailable");
                self.metrics.lock().fallback_misses += 1;
                Err(ApiError::FallbackExhausted { primary: Box::new(primary), fallback: e.to_string() })
            }
        }
    }

    async fn persist(&self) {
        if let Some(path) = &self.persist_path {
            if let Err(e) = self.registry.persist_to_disk(path).await {
                warn!(error = %e, "failed to persist fallback snapshot");
            }
        }
    }
}

async fn restore(registry: &FallbackRegistry, path: &Path) {
    match registry.load_from_disk(path).await {
        Ok(tenants) => debug!(path = %path.display(), tenants, "restored fallback snapshot"),
        Err(FallbackError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no fallback snapshot on disk, starting empty");
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to restore fallback snapshot");
        }
    }
}

#[async_trait]
impl ToolApi for FallbackClient {
    #[instrument(skip(self))]
    async fn list_tools(&self, tenant_id: &str) -> Result<Vec<Tool>, ApiError> {
        match self.primary.list_tools(tenant_id).await {
            Ok(tools) => {
                self.record_primary(true);
                self.registry.update_tools(tenant_id, tools.clone());
                self.persist().await;
                Ok(tools)
            }
            Err(e) => {
                self.record_primary(false);
                if !self.may_fall_back(&e) {
                    return Err(e);
                }
                let fallback = self.registry.fresh_tools(tenant_id);
                self.serve(e, fallback)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_tool(&self, tenant_id: &str, tool_id: &str) -> Result<Tool, ApiError> {
        match self.primary.get_tool(tenant_id, tool_id).await {
            Ok(tool) => {
                self.record_primary(true);
                self.registry.upsert_tool(tenant_id, tool.clone());
                Ok(tool)
            }
            Err(e) => {
                self.record_primary(false);
                if !self.may_fall_back(&e) {
                    return Err(e);
                }
                let fallback = self.registry.fresh_tool(tenant_id, tool_id);
                self.serve(e, fallback)
            }
        }
    }

    async fn execute_tool(
        &self,
        tenant_id: &str,
        tool_id: &str,
        action: &str,
        parameters: Value,
    ) -> Result<ToolExecutionResponse, ApiError> {
        self.primary.execute_tool(tenant_id, tool_id, action, parameters).await
    }

    async fn execute_tool_with_auth(
        &self,
        tenant_id: &str,
        tool_id: &str,
        action: &str,
        parameters: Value,
        auth: PassthroughAuthBundle,
    ) -> Result<ToolExecutionResponse, ApiError> {
        self.primary.execute_tool_with_auth(tenant_id, tool_id, action, parameters, auth).await
    }

    async fn get_tool_health(
        &self,
        tenant_id: &str,
        tool_id: &str,
    ) -> Result<HealthStatus, ApiError> {
        self.primary.get_tool_health(tenant_id, tool_id).await
    }

    async fn generate_embedding(
        &self,
        tenant_id: &str,
        agent_id: &str,
        text: &str,
        model: Option<&str>,
        task_type: &str,
    ) -> Result<EmbeddingResponse, ApiError> {
        self.primary.generate_embedding(tenant_id, agent_id, text, model, task_type).await
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        self.primary.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use toolmesh_common::resilience::MockClock;
    use toolmesh_domain::config::RecoveryConfig;

    use super::*;
    use crate::http::HttpError;

    /// Primary that fails on demand
    struct FlakyApi {
        down: AtomicBool,
        status: u16,
        executes: AtomicU32,
    }

    impl FlakyApi {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self { down: AtomicBool::new(false), status, executes: AtomicU32::new(0) })
        }

        fn fail(&self) -> Result<(), ApiError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(ApiError::Http(HttpError::Status {
                    status: self.status,
                    body: "unavailable".into(),
                    retry_after: None,
                }));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ToolApi for FlakyApi {
        async fn list_tools(&self, _tenant_id: &str) -> Result<Vec<Tool>, ApiError> {
            self.fail()?;
            Ok(vec![Tool::new("t-1", "github"), Tool::new("t-2", "jira")])
        }

        async fn get_tool(&self, _tenant_id: &str, tool_id: &str) -> Result<Tool, ApiError> {
            self.fail()?;
            Ok(Tool::new(tool_id, "fresh"))
        }

        async fn execute_tool(
            &self,
            _tenant_id: &str,
            _tool_id: &str,
            _action: &str,
            _parameters: Value,
        ) -> Result<ToolExecutionResponse, ApiError> {
            self.executes.fetch_add(1, Ordering::SeqCst);
            self.fail()?;
            Ok(ToolExecutionResponse {
                success: true,
                result: json!({}),
                error: None,
                execution_id: None,
                duration_ms: None,
            })
        }

        async fn execute_tool_with_auth(
            &self,
            tenant_id: &str,
            tool_id: &str,
            action: &str,
            parameters: Value,
            _auth: PassthroughAuthBundle,
        ) -> Result<ToolExecutionResponse, ApiError> {
            self.execute_tool(tenant_id, tool_id, action, parameters).await
        }

        async fn get_tool_health(
            &self,
            _tenant_id: &str,
            _tool_id: &str,
        ) -> Result<HealthStatus, ApiError> {
            self.fail()?;
            Ok(HealthStatus {
                healthy: true,
                message: None,
                last_checked: None,
                response_time_ms: None,
                details: Default::default(),
            })
        }

        async fn generate_embedding(
            &self,
            _tenant_id: &str,
            _agent_id: &str,
            _text: &str,
            _model: Option<&str>,
            _task_type: &str,
        ) -> Result<EmbeddingResponse, ApiError> {
            Err(ApiError::InvalidInput("not used".into()))
        }

        async fn health_check(&self) -> Result<bool, ApiError> {
            Ok(!self.down.load(Ordering::SeqCst))
        }
    }

    fn client(primary: Arc<FlakyApi>) -> (FallbackClient, MockClock) {
        let clock = MockClock::new();
        let registry = Arc::new(FallbackRegistry::with_clock(
            Duration::from_secs(24 * 60 * 60),
            Arc::new(clock.clone()),
        ));
        (FallbackClient::new(primary, registry), clock)
    }

    /// Validates serving from a one-hour-old snapshot.
    ///
    /// Assertions:
    /// - A successful primary call refreshes the snapshot.
    /// - When the primary fails, the snapshot is served.
    /// - `fallback_hits` increases by exactly one.
    #[tokio::test]
    async fn test_serves_snapshot_when_primary_fails() {
        let primary = FlakyApi::new(503);
        let (client, clock) = client(Arc::clone(&primary));

        assert_eq!(client.list_tools("acme").await.unwrap().len(), 2);
        primary.down.store(true, Ordering::SeqCst);
        clock.advance_secs(60 * 60);

        let before = client.metrics().fallback_hits;
        let tools = client.list_tools("acme").await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(client.get_tool("acme", "t-2").await.unwrap().name, "jira");

        let metrics = client.metrics();
        assert_eq!(metrics.fallback_hits, before + 2);
        assert_eq!(metrics.primary_failures, 2);
        assert!(metrics.last_fallback_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_snapshot_gives_combined_error() {
        let primary = FlakyApi::new(503);
        let (client, clock) = client(Arc::clone(&primary));
        client.list_tools("acme").await.unwrap();

        primary.down.store(true, Ordering::SeqCst);
        clock.advance_secs(25 * 60 * 60);

        let err = client.list_tools("acme").await.unwrap_err();
        assert!(matches!(err, ApiError::FallbackExhausted { .. }));
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("stale"));
        assert_eq!(client.metrics().fallback_misses, 1);
    }

    #[tokio::test]
    async fn test_execute_never_falls_back() {
        let primary = FlakyApi::new(503);
        let (client, _clock) = client(Arc::clone(&primary));
        client.list_tools("acme").await.unwrap();
        primary.down.store(true, Ordering::SeqCst);

        let err = client.execute_tool("acme", "t-1", "run", json!({})).await.unwrap_err();
        assert!(matches!(err, ApiError::Http(_)));
        assert_eq!(primary.executes.load(Ordering::SeqCst), 1);
        assert_eq!(client.metrics().fallback_hits, 0);
    }

    /// Validates recovery-driven decisions.
    ///
    /// Assertions:
    /// - A client error classified as `None` without fallback propagates.
    /// - The error is recorded in the recovery audit log.
    #[tokio::test]
    async fn test_recovery_none_propagates() {
        let primary = FlakyApi::new(400);
        let (client, _clock) = client(Arc::clone(&primary));
        let recovery = Arc::new(ErrorRecoveryManager::new(RecoveryConfig::default()));
        let client = client.with_recovery(Arc::clone(&recovery));
        client.list_tools("acme").await.unwrap();
        primary.down.store(true, Ordering::SeqCst);

        let err = client.list_tools("acme").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(!matches!(err, ApiError::FallbackExhausted { .. }));
        assert_eq!(recovery.audit_log().len(), 1);
        assert_eq!(client.metrics().fallback_hits, 0);
    }

    #[tokio::test]
    async fn test_persists_on_refresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fallback.json");
        let config = FallbackConfig {
            persist_path: Some(path.clone()),
            persist_on_update: true,
            ..Default::default()
        };
        let client = FallbackClient::from_config(FlakyApi::new(503), &config).await;

        client.list_tools("acme").await.unwrap();

        let restored = FallbackRegistry::new(config.max_age);
        assert_eq!(restored.load_from_disk(&path).await.unwrap(), 1);
        assert_eq!(restored.get_tools("acme").unwrap().len(), 2);
    }

    /// Validates restart recovery from a persisted snapshot.
    ///
    /// # Test Steps
    /// 1. A previous run leaves a snapshot on disk
    /// 2. A new client is built from config while the primary is down
    /// 3. The restored catalog is served as a fallback hit
    #[tokio::test]
    async fn test_restores_snapshot_on_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fallback.json");
        let config = FallbackConfig { persist_path: Some(path.clone()), ..Default::default() };

        let previous = FallbackRegistry::new(config.max_age);
        previous.update_tools("acme", vec![Tool::new("t-1", "github")]);
        previous.persist_to_disk(&path).await.unwrap();

        let primary = FlakyApi::new(503);
        primary.down.store(true, Ordering::SeqCst);
        let client = FallbackClient::from_config(primary, &config).await;

        let tools = client.list_tools("acme").await.unwrap();
        assert_eq!(tools, vec![Tool::new("t-1", "github")]);
        assert_eq!(client.metrics().fallback_hits, 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fallback.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let config = FallbackConfig { persist_path: Some(path), ..Default::default() };

        let primary = FlakyApi::new(503);
        primary.down.store(true, Ordering::SeqCst);
        let client = FallbackClient::from_config(primary, &config).await;

        assert!(client.registry().get_tools("acme").is_none());
        let err = client.list_tools("acme").await.unwrap_err();
        assert!(matches!(err, ApiError::FallbackExhausted { .. }));
    }
}
