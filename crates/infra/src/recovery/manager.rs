//! Error recovery manager
//!
//! Classifies errors into a [`RecoveryStrategy`] and runs an operation
//! under that strategy. Every classification lands in a bounded audit log
//! and every recovery run in a bounded history.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use toolmesh_common::collections::RingBuffer;
use toolmesh_common::duration_millis;
use toolmesh_common::error::{normalize_code, ErrorClass, ErrorClassification};
use toolmesh_domain::config::RecoveryConfig;
use tracing::{debug, error, info, warn};

use super::errors::RecoveryError;
use super::strategy::{default_for_class, default_table, RecoveryAction, RecoveryStrategy};
use crate::http::SharedBreaker;

/// Re-establishes a connection before a `Reconnect` retry
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn reconnect(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// How a recovery run ended when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome<T> {
    /// The operation succeeded on retry `attempts`
    Recovered { value: T, attempts: u32 },
    /// The strategy says to serve fallback data instead
    UseFallback,
}

/// One classified error
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub code: String,
    pub class: ErrorClass,
    pub message: String,
    pub action: RecoveryAction,
}

/// One recovery run
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryRecord {
    pub timestamp: DateTime<Utc>,
    pub action: RecoveryAction,
    pub attempts: u32,
    pub succeeded: bool,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryMetrics {
    pub errors_handled: u64,
    pub errors_by_class: HashMap<ErrorClass, u64>,
    pub recoveries_attempted: u64,
    pub recoveries_succeeded: u64,
    pub recoveries_failed: u64,
    pub fallbacks_requested: u64,
    pub reconnect_failures: u64,
    pub escalations: u64,
}

struct RecoveryState {
    audit: RingBuffer<AuditEntry>,
    history: RingBuffer<RecoveryRecord>,
    metrics: RecoveryMetrics,
}

/// Classifies errors and executes recovery strategies
pub struct ErrorRecoveryManager {
    config: RecoveryConfig,
    strategies: RwLock<HashMap<String, RecoveryStrategy>>,
    handlers: RwLock<Vec<Arc<dyn ReconnectHandler>>>,
    breaker: Option<SharedBreaker>,
    state: Mutex<RecoveryState>,
    cancel: CancellationToken,
}

impl fmt::Debug for ErrorRecoveryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecoveryManager")
            .field("config", &self.config)
            .field("strategies", &self.strategies.read().len())
            .field("handlers", &self.handlers.read().len())
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl ErrorRecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        let state = RecoveryState {
            audit: RingBuffer::new(config.audit_size.max(1)),
            history: RingBuffer::new(config.history_size.max(1)),
            metrics: RecoveryMetrics::default(),
        };
        Self {
            config,
            strategies: RwLock::new(default_table()),
            handlers: RwLock::new(Vec::new()),
            breaker: None,
            state: Mutex::new(state),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the breaker that `CircuitBreak` strategies force open
    #[must_use]
    pub fn with_circuit_breaker(mut self, breaker: SharedBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Override or add the strategy for `code`
    pub fn register_strategy(&self, code: &str, strategy: RecoveryStrategy) {
        let code = normalize_code(code);
        debug!(code = %code, action = %strategy.action, "registered recovery strategy");
        self.strategies.write().insert(code, strategy);
    }

    pub fn register_reconnect_handler(&self, handler: Arc<dyn ReconnectHandler>) {
        debug!(handler = handler.name(), "registered reconnect handler");
        self.handlers.write().push(handler);
    }

    /// Strategy for `code`, or the default for `class` if none is registered
    pub fn strategy_for(&self, code: &str, class: ErrorClass) -> RecoveryStrategy {
        self.strategies
            .read()
            .get(&normalize_code(code))
            .cloned()
            .unwrap_or_else(|| default_for_class(class))
    }

    /// Pick a strategy for `err` and record it in the audit log.
    ///
    /// Rate-limited errors wait at least as long as the server asked.
    pub fn handle_error<E>(&self, err: &E) -> RecoveryStrategy
    where
        E: ErrorClassification + fmt::Display + ?Sized,
    {
        let code = normalize_code(&err.error_code());
        let class = err.error_class();
        let mut strategy = self.strategy_for(&code, class);

        if class == ErrorClass::RateLimited {
            if let Some(hint) = err.retry_after() {
                strategy.delay = strategy.delay.max(hint);
            }
        }

        debug!(code = %code, class = %class, action = %strategy.action, "classified error");

        let entry = AuditEntry {
            timestamp: Utc::now(),
            code,
            class,
            message: err.to_string(),
            action: strategy.action,
        };
        let mut state = self.state.lock();
        state.metrics.errors_handled += 1;
        *state.metrics.errors_by_class.entry(class).or_insert(0) += 1;
        state.audit.push(entry);
        strategy
    }

    /// Run `operation` under `strategy`.
    ///
    /// The operation has already failed once, so every attempt here is a
    /// retry and the strategy's action is applied before each one.
    ///
    /// # Errors
    ///
    /// - [`RecoveryError::NoRecovery`] for `None` without running anything
    /// - [`RecoveryError::Exhausted`] once `max_attempts` retries failed or
    ///   a retry hit an error that cannot be retried
    /// - [`RecoveryError::Cancelled`] if the manager closed while waiting
    pub async fn execute_recovery<T, E, F, Fut>(
        &self,
        strategy: &RecoveryStrategy,
        mut operation: F,
    ) -> Result<RecoveryOutcome<T>, RecoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        match strategy.action {
            RecoveryAction::Fallback => {
                self.state.lock().metrics.fallbacks_requested += 1;
                self.record(strategy.action, 0, true, Duration::ZERO, None);
                return Ok(RecoveryOutcome::UseFallback);
            }
            RecoveryAction::None => {
                return Err(RecoveryError::NoRecovery {
                    code: "NO_RECOVERY".to_string(),
                    class: ErrorClass::Unknown,
                    message: "strategy does not allow recovery".to_string(),
                });
            }
            RecoveryAction::Retry | RecoveryAction::Reconnect | RecoveryAction::CircuitBreak => {}
        }

        self.state.lock().metrics.recoveries_attempted += 1;
        let started = Instant::now();
        let mut last: Option<(String, ErrorClass, String)> = None;
        let mut attempts = 0;

        for attempt in 0..strategy.max_attempts {
            self.prepare_attempt(strategy, attempt).await?;
            attempts = attempt + 1;

            match operation().await {
                Ok(value) => {
                    info!(action = %strategy.action, attempts, "recovery succeeded");
                    self.state.lock().metrics.recoveries_succeeded += 1;
                    self.record(strategy.action, attempts, true, started.elapsed(), None);
                    return Ok(RecoveryOutcome::Recovered { value, attempts });
                }
                Err(e) => {
                    warn!(
                        action = %strategy.action,
                        attempt = attempts,
                        max_attempts = strategy.max_attempts,
                        error = %e,
                        "recovery attempt failed"
                    );
                    let retryable =
                        e.is_retryable() || e.error_class() == ErrorClass::CircuitBreaker;
                    last = Some((e.error_code(), e.error_class(), e.to_string()));
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let (code, class, message) = last.unwrap_or_else(|| {
            ("RECOVERY_EXHAUSTED".to_string(), ErrorClass::Unknown, "no attempts allowed".into())
        });

        let escalate = strategy.notify_ops;
        {
            let mut state = self.state.lock();
            state.metrics.recoveries_failed += 1;
            if escalate {
                state.metrics.escalations += 1;
            }
        }
        self.record(strategy.action, attempts, false, started.elapsed(), Some(message.clone()));

        if escalate {
            error!(
                code = %code,
                class = %class,
                action = %strategy.action,
                attempts,
                error = %message,
                "recovery exhausted, escalating to operations"
            );
        }

        Err(RecoveryError::Exhausted { attempts, code, class, message })
    }

    /// Classify `err` and run `operation` under the resulting strategy
    pub async fn recover<T, E, F, Fut>(
        &self,
        err: &E,
        operation: F,
    ) -> Result<RecoveryOutcome<T>, RecoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        let strategy = self.handle_error(err);
        if strategy.action == RecoveryAction::None {
            return Err(RecoveryError::NoRecovery {
                code: normalize_code(&err.error_code()),
                class: err.error_class(),
                message: err.to_string(),
            });
        }
        self.execute_recovery(&strategy, operation).await
    }

    async fn prepare_attempt(
        &self,
        strategy: &RecoveryStrategy,
        attempt: u32,
    ) -> Result<(), RecoveryError> {
        match strategy.action {
            RecoveryAction::Reconnect => {
                self.run_reconnect_handlers().await;
                self.sleep(strategy.delay_for(attempt)).await
            }
            RecoveryAction::CircuitBreak if attempt > 0 => match &self.breaker {
                Some(breaker) => {
                    let cooldown = self.config.circuit_break_cooldown;
                    breaker.force_open(cooldown);
                    self.sleep(cooldown).await
                }
                None => self.sleep(strategy.delay_for(attempt)).await,
            },
            _ => self.sleep(strategy.delay_for(attempt)).await,
        }
    }

    async fn run_reconnect_handlers(&self) {
        let handlers: Vec<Arc<dyn ReconnectHandler>> = self.handlers.read().clone();
        for handler in handlers {
            if let Err(e) = handler.reconnect().await {
                warn!(handler = handler.name(), error = %e, "reconnect handler failed");
                self.state.lock().metrics.reconnect_failures += 1;
            }
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), RecoveryError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RecoveryError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn record(
        &self,
        action: RecoveryAction,
        attempts: u32,
        succeeded: bool,
        elapsed: Duration,
        error: Option<String>,
    ) {
        let record =
            RecoveryRecord { timestamp: Utc::now(), action, attempts, succeeded, elapsed, error };
        self.state.lock().history.push(record);
    }

    /// Recovery runs, oldest first
    pub fn history(&self) -> Vec<RecoveryRecord> {
        self.state.lock().history.to_vec()
    }

    /// Classified errors, oldest first
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.state.lock().audit.to_vec()
    }

    pub fn metrics(&self) -> RecoveryMetrics {
        self.state.lock().metrics.clone()
    }

    /// Abort any recovery currently sleeping
    pub fn close(&self) {
        self.cancel.cancel();
    }
}
