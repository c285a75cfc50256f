//! Circuit breaker guarding calls to a single logical backend.
//!
//! The breaker is a pure state machine: no background timers, no I/O. The
//! `Open -> HalfOpen` transition is evaluated lazily inside
//! [`CircuitBreaker::can_attempt`] under the breaker's lock, so there is no
//! race between a timer and concurrent callers.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::utils::serde::duration_millis;

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Source of time for anything that reasons about deadlines.
///
/// Production code uses [`SystemClock`]; tests use [`MockClock`] to step
/// through timeouts without sleeping.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic time
    fn now(&self) -> Instant;

    /// Wall clock time
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let elapsed = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock handle shared between components that must agree on time
pub type SharedClock = Arc<dyn Clock>;

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same timeline, so a test can hand one clone to the
/// component under test and advance the other.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    wall_start: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            wall_start: SystemTime::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Move time forward by whole seconds
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Total time advanced so far
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_start + self.elapsed()
    }
}

//==============================================================================
// Error Types
//==============================================================================

/// Errors produced by the breaker itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// The breaker refused the call
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// Configuration failed validation
    #[error("invalid circuit breaker configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Outcome of [`CircuitBreaker::execute`]: either the breaker refused, or
/// the wrapped operation ran and failed.
#[derive(Debug, Error)]
pub enum CallError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Rejected(CircuitBreakerError),
    #[error(transparent)]
    Failed(E),
}

//==============================================================================
// State and Configuration
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the retry timeout elapses
    Open,
    /// A limited number of probe calls are let through
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening
    pub max_failures: u32,
    /// Consecutive successes in HalfOpen before closing
    pub success_threshold: u32,
    /// How long the breaker stays Open before allowing a probe
    #[serde(with = "duration_millis")]
    pub retry_timeout: Duration,
    /// Probes allowed in flight while HalfOpen
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            success_threshold: 2,
            retry_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        let invalid = |message: &str| {
            Err(CircuitBreakerError::InvalidConfiguration { message: message.to_string() })
        };

        if self.max_failures == 0 {
            return invalid("max_failures must be greater than 0");
        }
        if self.success_threshold == 0 {
            return invalid("success_threshold must be greater than 0");
        }
        if self.half_open_max_calls == 0 {
            return invalid("half_open_max_calls must be greater than 0");
        }
        if self.retry_timeout.is_zero() {
            return invalid("retry_timeout must be greater than 0");
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn max_failures(mut self, threshold: u32) -> Self {
        self.config.max_failures = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.config.retry_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_time: Option<Instant>,
    /// Remaining Open time, if Open
    pub retry_in: Option<Duration>,
    pub state_changed_at: Instant,
}

//==============================================================================
// Circuit Breaker
//==============================================================================

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    /// Bumped on every Open to HalfOpen transition
    half_open_cycle: u64,
    /// Probes still unreported at this instant are presumed lost
    probe_deadline: Option<Instant>,
    last_failure_time: Option<Instant>,
    next_retry_time: Option<Instant>,
    state_changed_at: Instant,
}

impl Inner {
    fn trip(&mut self, now: Instant, cooldown: Duration) {
        self.state = CircuitState::Open;
        self.next_retry_time = Some(now + cooldown);
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;
        self.probe_deadline = None;
        self.state_changed_at = now;
    }
}

/// Admission handed out by [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure). A permit dropped without a report (the
/// caller timed out or gave up) frees its half-open probe slot so the
/// next caller can probe instead.
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit<'a, C: Clock = SystemClock> {
    breaker: &'a CircuitBreaker<C>,
    probe_cycle: Option<u64>,
    reported: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    /// True when this call is a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe_cycle.is_some()
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.record_failure();
    }
}

impl<C: Clock> fmt::Debug for CallPermit<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name)
            .field("probe_cycle", &self.probe_cycle)
            .field("reported", &self.reported)
            .finish()
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if !self.reported {
            if let Some(cycle) = self.probe_cycle {
                self.breaker.release_probe(cycle);
            }
        }
    }
}

/// Circuit breaker for one backend.
///
/// All mutations happen under a single mutex; share it with `Arc`.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker on the system clock
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, CircuitBreakerError> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Result<Self, CircuitBreakerError> {
        config.validate()?;
        let now = clock.now();

        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                half_open_cycle: 0,
                probe_deadline: None,
                last_failure_time: None,
                next_retry_time: None,
                state_changed_at: now,
            }),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission to make a call.
    ///
    /// In Open, returns true only once `now >= next_retry_time`, moving the
    /// breaker to HalfOpen as a side effect. In HalfOpen, at most
    /// `half_open_max_calls` probes are admitted until they report back;
    /// probes unreported after `retry_timeout` are presumed lost and their
    /// slots reclaimed.
    ///
    /// Prefer [`try_acquire`](Self::try_acquire) when the call can be
    /// abandoned before it reports.
    pub fn can_attempt(&self) -> bool {
        self.admit().is_some()
    }

    /// Ask permission to make a call, returning a permit that reports the
    /// outcome and releases its probe slot if dropped unreported.
    pub fn try_acquire(&self) -> Option<CallPermit<'_, C>> {
        self.admit().map(|probe_cycle| CallPermit { breaker: self, probe_cycle, reported: false })
    }

    /// Admission decision. `Some(Some(cycle))` admits a half-open probe.
    fn admit(&self) -> Option<Option<u64>> {
        let now = self.clock.now();
        let probe_window = self.config.retry_timeout;
        let mut inner = self.inner.lock();

        let admitted = match inner.state {
            CircuitState::Closed => Some(None),
            CircuitState::Open => {
                let ready = inner.next_retry_time.map_or(true, |at| now >= at);
                if ready {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.half_open_in_flight = 1;
                    inner.half_open_cycle += 1;
                    inner.probe_deadline = Some(now + probe_window);
                    inner.state_changed_at = now;
                    info!(breaker = %self.name, "circuit breaker half-open, admitting probe");
                    Some(Some(inner.half_open_cycle))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_calls
                    && inner.probe_deadline.is_some_and(|deadline| now >= deadline)
                {
                    warn!(
                        breaker = %self.name,
                        lost = inner.half_open_in_flight,
                        "half-open probes never reported, reclaiming slots"
                    );
                    inner.half_open_in_flight = 0;
                }
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    inner.probe_deadline = Some(now + probe_window);
                    Some(Some(inner.half_open_cycle))
                } else {
                    None
                }
            }
        };
        drop(inner);

        if admitted.is_some() {
            self.total_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Free a probe slot taken in half-open `cycle` without an outcome
    fn release_probe(&self, cycle: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.half_open_cycle == cycle {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            debug!(breaker = %self.name, "abandoned probe released its slot");
        }
    }

    /// Cheap read-only check; does not transition or reserve a probe slot.
    pub fn is_available(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.next_retry_time.map_or(true, |at| now >= at),
            CircuitState::HalfOpen => {
                inner.half_open_in_flight < self.config.half_open_max_calls
                    || inner.probe_deadline.is_some_and(|deadline| now >= deadline)
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    let successes = inner.consecutive_successes;
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.consecutive_successes = 0;
                    inner.half_open_in_flight = 0;
                    inner.probe_deadline = None;
                    inner.next_retry_time = None;
                    inner.state_changed_at = now;
                    info!(breaker = %self.name, successes, "circuit breaker closed");
                }
            }
            CircuitState::Open => {
                // A call admitted before the trip finished late.
                debug!(breaker = %self.name, "success recorded while open; ignored");
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.max_failures {
                    inner.trip(now, self.config.retry_timeout);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        retry_timeout_ms = self.config.retry_timeout.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                inner.trip(now, self.config.retry_timeout);
                warn!(breaker = %self.name, "probe failed, circuit breaker re-opened");
            }
            CircuitState::Open => {
                inner.failure_count += 1;
            }
        }
    }

    /// Open the breaker immediately for `cooldown`, regardless of counts.
    pub fn force_open(&self, cooldown: Duration) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.trip(now, cooldown);
        warn!(
            breaker = %self.name,
            cooldown_ms = cooldown.as_millis() as u64,
            "circuit breaker forced open"
        );
    }

    /// Return to Closed and clear all counters
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.consecutive_successes = 0;
        inner.half_open_in_flight = 0;
        inner.probe_deadline = None;
        inner.last_failure_time = None;
        inner.next_retry_time = None;
        inner.state_changed_at = now;
        info!(breaker = %self.name, "circuit breaker reset");
    }

    /// Current state as last evaluated. Does not perform the lazy Open to
    /// HalfOpen transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Time left before an Open breaker admits a probe
    pub fn retry_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => inner.next_retry_time.map(|at| at.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Snapshot for monitoring
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.now();
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            consecutive_successes: inner.consecutive_successes,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            last_failure_time: inner.last_failure_time,
            retry_in: match inner.state {
                CircuitState::Open => {
                    inner.next_retry_time.map(|at| at.saturating_duration_since(now))
                }
                _ => None,
            },
            state_changed_at: inner.state_changed_at,
        }
    }

    /// Error value for a refused call
    pub fn open_error(&self) -> CircuitBreakerError {
        CircuitBreakerError::Open { name: self.name.clone() }
    }

    /// Run `operation` if the breaker admits it and record the outcome.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let Some(permit) = self.try_acquire() else {
            debug!(breaker = %self.name, state = %self.state(), "call rejected");
            return Err(CallError::Rejected(self.open_error()));
        };

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                permit.failure();
                Err(CallError::Failed(error))
            }
        }
    }
}
