//! Batch processor metrics

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use toolmesh_common::duration_millis;

/// Weight of the newest sample in the moving averages
const SMOOTHING: f64 = 0.2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchMetrics {
    pub batches_processed: u64,
    pub requests_processed: u64,
    pub successes: u64,
    pub failures: u64,
    /// ListTools requests answered by another request's backend call
    pub coalesced_requests: u64,
    pub queue_full_rejections: u64,
    pub avg_batch_size: f64,
    #[serde(with = "duration_millis")]
    pub avg_processing_time: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct BatchMetricsRecorder {
    inner: Mutex<BatchMetrics>,
}

impl BatchMetricsRecorder {
    pub(crate) fn record_batch(
        &self,
        size: usize,
        elapsed: Duration,
        successes: u64,
        failures: u64,
        coalesced: u64,
    ) {
        let mut m = self.inner.lock();
        if m.batches_processed == 0 {
            m.avg_batch_size = size as f64;
            m.avg_processing_time = elapsed;
        } else {
            m.avg_batch_size += SMOOTHING * (size as f64 - m.avg_batch_size);
            let avg = m.avg_processing_time.as_secs_f64();
            m.avg_processing_time =
                Duration::from_secs_f64(avg + SMOOTHING * (elapsed.as_secs_f64() - avg));
        }
        m.batches_processed += 1;
        m.requests_processed += size as u64;
        m.successes += successes;
        m.failures += failures;
        m.coalesced_requests += coalesced;
    }

    pub(crate) fn record_queue_full(&self) {
        self.inner.lock().queue_full_rejections += 1;
    }

    pub(crate) fn snapshot(&self) -> BatchMetrics {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average_starts_at_first_sample() {
        let recorder = BatchMetricsRecorder::default();
        recorder.record_batch(10, Duration::from_millis(100), 9, 1, 0);
        recorder.record_batch(20, Duration::from_millis(200), 20, 0, 3);

        let m = recorder.snapshot();
        assert_eq!(m.batches_processed, 2);
        assert_eq!(m.requests_processed, 30);
        assert!((m.avg_batch_size - 12.0).abs() < 1e-9);
        assert!((m.avg_processing_time.as_secs_f64() - 0.12).abs() < 1e-6);
        assert_eq!((m.successes, m.failures, m.coalesced_requests), (29, 1, 3));
    }
}
