//! Recovery strategies and the default decision table.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolmesh_common::duration_millis;
use toolmesh_common::error::ErrorClass;
use toolmesh_common::resilience::BackoffStrategy;

/// Ceiling for any single recovery delay
pub const MAX_RECOVERY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Fail without retrying
    None,
    /// Sleep with backoff, then run again
    Retry,
    /// Run the registered reconnect handlers, then run again
    Reconnect,
    /// Retry once, then hold the circuit open for a cooldown before the next try
    CircuitBreak,
    /// Skip the primary path and serve a fallback
    Fallback,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Retry => "retry",
            Self::Reconnect => "reconnect",
            Self::CircuitBreak => "circuit_break",
            Self::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// What to do about one kind of error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub action: RecoveryAction,
    /// Base delay before the first retry
    #[serde(with = "duration_millis")]
    pub delay: Duration,
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    /// Grow the delay by `delay` per attempt instead of multiplying
    pub linear_backoff: bool,
    /// Whether a caller may serve fallback data once recovery gives up
    pub fallback_enabled: bool,
    /// Log an escalation when recovery is exhausted
    pub notify_ops: bool,
}

impl RecoveryStrategy {
    pub fn none() -> Self {
        Self {
            action: RecoveryAction::None,
            delay: Duration::ZERO,
            max_attempts: 0,
            backoff_multiplier: 1.0,
            linear_backoff: false,
            fallback_enabled: false,
            notify_ops: false,
        }
    }

    /// Exponential retry
    pub fn retry(delay: Duration, max_attempts: u32) -> Self {
        Self {
            action: RecoveryAction::Retry,
            delay,
            max_attempts,
            backoff_multiplier: 2.0,
            fallback_enabled: true,
            ..Self::none()
        }
    }

    /// Linear retry, used for rate limiting
    pub fn linear_retry(delay: Duration, max_attempts: u32) -> Self {
        Self { linear_backoff: true, backoff_multiplier: 1.0, ..Self::retry(delay, max_attempts) }
    }

    pub fn fallback() -> Self {
        Self { action: RecoveryAction::Fallback, fallback_enabled: true, ..Self::none() }
    }

    /// Delay before retry `attempt` (0-based), capped at [`MAX_RECOVERY_DELAY`]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let curve = if self.linear_backoff {
            BackoffStrategy::Linear { initial: self.delay, increment: self.delay }
        } else {
            BackoffStrategy::Exponential { initial: self.delay, multiplier: self.backoff_multiplier }
        };
        curve.raw_delay(attempt).min(MAX_RECOVERY_DELAY)
    }
}

/// Strategy used for a class when no code-specific entry exists
pub fn default_for_class(class: ErrorClass) -> RecoveryStrategy {
    match class {
        ErrorClass::Transient => RecoveryStrategy::retry(Duration::from_millis(100), 3),
        ErrorClass::Timeout => RecoveryStrategy::retry(Duration::from_millis(500), 3),
        ErrorClass::RateLimited => RecoveryStrategy::linear_retry(Duration::from_secs(1), 3),
        ErrorClass::CircuitBreaker => RecoveryStrategy::fallback(),
        ErrorClass::ServerError => RecoveryStrategy {
            action: RecoveryAction::CircuitBreak,
            notify_ops: true,
            ..RecoveryStrategy::retry(Duration::from_millis(500), 2)
        },
        ErrorClass::ClientError | ErrorClass::Unknown => RecoveryStrategy::none(),
    }
}

/// Code-specific entries installed on every new manager. Keys are
/// already normalized.
pub(crate) fn default_table() -> HashMap<String, RecoveryStrategy> {
    let mut table = HashMap::new();
    table.insert(
        "NETWORK_ERROR".to_string(),
        RecoveryStrategy {
            action: RecoveryAction::Reconnect,
            ..RecoveryStrategy::retry(Duration::from_millis(200), 3)
        },
    );
    table.insert("CIRCUIT_OPEN".to_string(), RecoveryStrategy::fallback());
    table.insert("CLIENT_CLOSED".to_string(), RecoveryStrategy::none());
    table.insert("CANCELLED".to_string(), RecoveryStrategy::none());
    table
}
