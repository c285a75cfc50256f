//! Backoff delay computation for retry loops.
//!
//! Delays are computed per attempt from the attempt number alone (never
//! accumulated), then jittered within a fixed symmetric band and clamped to
//! `[0, max_delay]`. The pre-jitter sequence is therefore non-decreasing and
//! bounded by `max_delay` for every strategy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::utils::serde::duration_millis;

/// Shape of the pre-jitter delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every attempt
    Fixed {
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    /// `initial + attempt * increment`
    Linear {
        #[serde(with = "duration_millis")]
        initial: Duration,
        #[serde(with = "duration_millis")]
        increment: Duration,
    },
    /// `initial * multiplier^attempt`
    Exponential {
        #[serde(with = "duration_millis")]
        initial: Duration,
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Doubling backoff starting at `initial`
    pub const fn exponential(initial: Duration) -> Self {
        Self::Exponential { initial, multiplier: 2.0 }
    }

    /// Raw delay for `attempt` (0-based), before clamping and jitter.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Linear { initial, increment } => {
                initial.saturating_add(increment.saturating_mul(attempt))
            }
            Self::Exponential { initial, multiplier } => {
                // Multipliers below 1 would shrink the delay; treat as flat.
                let factor = multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
                let millis = initial.as_millis() as f64 * factor;
                if millis.is_finite() && millis < u64::MAX as f64 {
                    Duration::from_millis(millis as u64)
                } else {
                    Duration::MAX
                }
            }
        }
    }
}

/// Randomization applied after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Jitter {
    /// Deterministic delays
    None,
    /// Multiply by a factor drawn uniformly from `[1 - ratio, 1 + ratio]`.
    /// `ratio` is clamped to `[0, 1]`.
    Symmetric { ratio: f64 },
}

impl Jitter {
    /// The ±25% band used by the HTTP retry loop
    pub const DEFAULT: Self = Self::Symmetric { ratio: 0.25 };

    /// Apply jitter using `rng`.
    pub fn apply_with<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        match *self {
            Self::None => delay,
            Self::Symmetric { ratio } => {
                let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
                if ratio == 0.0 || delay.is_zero() {
                    return delay;
                }
                let factor = rng.gen_range((1.0 - ratio)..=(1.0 + ratio));
                delay.mul_f64(factor.max(0.0))
            }
        }
    }
}

/// Strategy plus ceiling plus jitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub jitter: Jitter,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::exponential(Duration::from_millis(100)),
            max_delay: Duration::from_secs(5),
            jitter: Jitter::DEFAULT,
        }
    }
}

impl BackoffPolicy {
    /// Exponential doubling from `base`, capped at `max_delay`, ±25% jitter.
    pub const fn exponential(base: Duration, max_delay: Duration) -> Self {
        Self { strategy: BackoffStrategy::exponential(base), max_delay, jitter: Jitter::DEFAULT }
    }

    /// Linear growth from `step`, capped at `max_delay`, ±25% jitter.
    pub const fn linear(step: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Linear { initial: step, increment: step },
            max_delay,
            jitter: Jitter::DEFAULT,
        }
    }

    /// Same policy without jitter
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = Jitter::None;
        self
    }

    /// Pre-jitter delay for `attempt`, clamped to `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.strategy.raw_delay(attempt).min(self.max_delay)
    }

    /// Jittered delay for `attempt` using the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Jittered delay for `attempt` using `rng`, clamped to `max_delay`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        self.jitter.apply_with(self.base_delay(attempt), rng).min(self.max_delay)
    }
}
