//! Configuration structures
//!
//! Every struct is `#[serde(default)]`, so a config file only has to name
//! what it overrides. Durations are integer milliseconds on the wire.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolmesh_common::duration_millis;

use crate::errors::{Result, ToolmeshError};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolmeshConfig {
    pub client: RestClientConfig,
    pub cache: CacheConfig,
    pub fallback: FallbackConfig,
    pub batch: BatchConfig,
    pub recovery: RecoveryConfig,
    pub logging: LoggingConfig,
}

impl ToolmeshConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.cache.validate()?;
        self.batch.validate()?;
        self.fallback.validate()?;
        Ok(())
    }
}

fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(ToolmeshError::Config(format!("{name} must be greater than 0")));
    }
    Ok(())
}

fn non_zero(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(ToolmeshError::Config(format!("{name} must be greater than 0")));
    }
    Ok(())
}

// ============================================================================
// REST client
// ============================================================================

/// Breaker thresholds for the REST client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub max_failures: u32,
    #[serde(with = "duration_millis")]
    pub retry_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { max_failures: 5, retry_timeout: Duration::from_secs(30), success_threshold: 2 }
    }
}

/// Remote tool API client settings
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestClientConfig {
    pub base_url: String,
    pub api_key: String,
    /// Tenant used by `health_check` and when a caller passes none
    pub tenant_id: String,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub retry_base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub retry_max_delay: Duration,
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(with = "duration_millis")]
    pub tool_cache_ttl: Duration,
    pub tool_cache_max_tenants: u64,
    /// Zero disables the background health check
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,
    #[serde(with = "duration_millis")]
    pub health_check_timeout: Duration,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            api_key: String::new(),
            tenant_id: "default".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            circuit_breaker: CircuitBreakerSettings::default(),
            tool_cache_ttl: Duration::from_secs(30),
            tool_cache_max_tenants: 1_000,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for RestClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "[REDACTED]" })
            .field("tenant_id", &self.tenant_id)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("tool_cache_ttl", &self.tool_cache_ttl)
            .field("health_check_interval", &self.health_check_interval)
            .field("health_check_timeout", &self.health_check_timeout)
            .finish_non_exhaustive()
    }
}

impl RestClientConfig {
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(ToolmeshError::Config("client.base_url must not be empty".into()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ToolmeshError::Config(format!(
                "client.base_url must be an http(s) URL, got '{base}'"
            )));
        }
        non_zero("client.timeout", self.timeout)?;
        non_zero("client.health_check_timeout", self.health_check_timeout)?;
        if self.retry_base_delay > self.retry_max_delay {
            return Err(ToolmeshError::Config(
                "client.retry_base_delay must not exceed client.retry_max_delay".into(),
            ));
        }
        if self.circuit_breaker.max_failures == 0 || self.circuit_breaker.success_threshold == 0 {
            return Err(ToolmeshError::Config(
                "client.circuit_breaker thresholds must be greater than 0".into(),
            ));
        }
        non_zero("client.circuit_breaker.retry_timeout", self.circuit_breaker.retry_timeout)
    }
}

// ============================================================================
// Cache manager
// ============================================================================

/// Two-tier cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1_max_size: usize,
    #[serde(with = "duration_millis")]
    pub l1_ttl: Duration,
    /// Floor for the distributed tier TTL
    #[serde(with = "duration_millis")]
    pub l2_ttl: Duration,
    pub compression_enabled: bool,
    pub compression_min_size: usize,
    pub compression_level: u32,
    pub warmup_enabled: bool,
    #[serde(with = "duration_millis")]
    pub warmup_interval: Duration,
    pub warmup_workers: usize,
    /// Pending warmup jobs across all priorities
    pub warmup_queue_size: usize,
    #[serde(with = "duration_millis")]
    pub warmup_load_timeout: Duration,
    /// Accesses above which an entry counts as hot
    pub hot_access_threshold: u64,
    /// Remaining TTL below which a hot entry is refreshed
    #[serde(with = "duration_millis")]
    pub near_expiry_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_size: 1_000,
            l1_ttl: Duration::from_secs(5 * 60),
            l2_ttl: Duration::from_secs(15 * 60),
            compression_enabled: true,
            compression_min_size: 1024,
            compression_level: 6,
            warmup_enabled: true,
            warmup_interval: Duration::from_secs(5 * 60),
            warmup_workers: 2,
            warmup_queue_size: 100,
            warmup_load_timeout: Duration::from_secs(30),
            hot_access_threshold: 5,
            near_expiry_window: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        positive("cache.l1_max_size", self.l1_max_size)?;
        non_zero("cache.l1_ttl", self.l1_ttl)?;
        if self.warmup_enabled {
            positive("cache.warmup_workers", self.warmup_workers)?;
            positive("cache.warmup_queue_size", self.warmup_queue_size)?;
            non_zero("cache.warmup_interval", self.warmup_interval)?;
            non_zero("cache.warmup_load_timeout", self.warmup_load_timeout)?;
        }
        Ok(())
    }
}

// ============================================================================
// Fallback
// ============================================================================

/// Last-known-good snapshot settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    #[serde(with = "duration_millis")]
    pub max_age: Duration,
    /// Where the snapshot is persisted, if anywhere
    pub persist_path: Option<PathBuf>,
    /// Write the snapshot every time it is refreshed
    pub persist_on_update: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { max_age: Duration::from_secs(24 * 60 * 60), persist_path: None, persist_on_update: false }
    }
}

impl FallbackConfig {
    pub fn validate(&self) -> Result<()> {
        non_zero("fallback.max_age", self.max_age)?;
        if self.persist_on_update && self.persist_path.is_none() {
            return Err(ToolmeshError::Config(
                "fallback.persist_on_update requires fallback.persist_path".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Batch processor
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    #[serde(with = "duration_millis")]
    pub max_batch_wait: Duration,
    pub queue_size: usize,
    pub workers: usize,
    #[serde(with = "duration_millis")]
    pub enqueue_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_batch_wait: Duration::from_millis(100),
            queue_size: 1_000,
            workers: 4,
            enqueue_timeout: Duration::from_millis(100),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        positive("batch.max_batch_size", self.max_batch_size)?;
        positive("batch.queue_size", self.queue_size)?;
        positive("batch.workers", self.workers)?;
        non_zero("batch.max_batch_wait", self.max_batch_wait)
    }
}

// ============================================================================
// Recovery and logging
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Recovery outcomes kept for inspection
    pub history_size: usize,
    /// Classified errors kept in the audit log
    pub audit_size: usize,
    /// How long `CircuitBreak` keeps the breaker open
    #[serde(with = "duration_millis")]
    pub circuit_break_cooldown: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            audit_size: 1_000,
            circuit_break_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
