//! Request and cache counters for the REST client
//!
//! Counters are plain atomics; the health fields sit behind a small mutex
//! because they are written together.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use toolmesh_common::resilience::CircuitState;

/// Point-in-time view of the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub circuit_state: CircuitState,
    pub last_health_check: Option<DateTime<Utc>>,
    pub healthy: bool,
}

impl ClientMetrics {
    /// Tool cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        (self.cache_hits as f64 / total as f64) * 100.0
    }
}

#[derive(Debug, Clone, Copy)]
struct HealthSample {
    checked_at: Option<DateTime<Utc>>,
    healthy: bool,
}

#[derive(Debug)]
pub(crate) struct ClientMetricsRecorder {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    health: Mutex<HealthSample>,
}

impl Default for ClientMetricsRecorder {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            // Assume healthy until a check says otherwise.
            health: Mutex::new(HealthSample { checked_at: None, healthy: true }),
        }
    }
}

impl ClientMetricsRecorder {
    pub(crate) fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, success: bool) {
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_health(&self, healthy: bool) {
        *self.health.lock() = HealthSample { checked_at: Some(Utc::now()), healthy };
    }

    pub(crate) fn snapshot(&self, circuit_state: CircuitState) -> ClientMetrics {
        let health = *self.health.lock();
        ClientMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            circuit_state,
            last_health_check: health.checked_at,
            healthy: health.healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let recorder = ClientMetricsRecorder::default();
        recorder.record_request();
        recorder.record_request();
        recorder.record_outcome(true);
        recorder.record_outcome(false);
        recorder.record_cache(true);
        recorder.record_cache(false);
        recorder.record_cache(false);
        recorder.record_cache(true);

        let snapshot = recorder.snapshot(CircuitState::Closed);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.cache_hit_rate(), 50.0);
        assert!(snapshot.healthy);
        assert!(snapshot.last_health_check.is_none());
    }

    #[test]
    fn test_health_sample_timestamped() {
        let recorder = ClientMetricsRecorder::default();
        recorder.record_health(false);
        let snapshot = recorder.snapshot(CircuitState::Open);
        assert!(!snapshot.healthy);
        assert!(snapshot.last_health_check.is_some());
        assert_eq!(snapshot.circuit_state, CircuitState::Open);
    }
}
