//! Cache counters, kept under a single lock so a snapshot is consistent.

use parking_lot::Mutex;
use serde::Serialize;
use toolmesh_common::compression::CompressionService;

/// Point-in-time view of the cache manager
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l2_errors: u64,
    pub sets: u64,
    pub coalesced_requests: u64,
    pub warmup_requests: u64,
    pub warmup_successes: u64,
    pub warmup_failures: u64,
    pub warmup_dropped: u64,
    pub warmup_candidates: u64,
    pub invalidations: u64,
    pub cascade_invalidations: u64,
    pub evictions: u64,
    pub compressed_payloads: u64,
    /// Bytes before compression, over compressed payloads only
    pub bytes_before_compression: u64,
    pub bytes_after_compression: u64,
}

impl CacheMetrics {
    /// Combined hit rate over both tiers as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        // An L1 miss that hits L2 is still a hit overall.
        let total = self.l1_hits + self.l1_misses;
        if total == 0 {
            return 0.0;
        }
        (hits as f64 / total as f64) * 100.0
    }

    /// Average fraction of bytes saved by compression
    pub fn compression_ratio(&self) -> f64 {
        CompressionService::compression_ratio(
            self.bytes_before_compression as usize,
            self.bytes_after_compression as usize,
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheMetricsRecorder {
    inner: Mutex<CacheMetrics>,
}

impl CacheMetricsRecorder {
    pub(crate) fn update(&self, f: impl FnOnce(&mut CacheMetrics)) {
        f(&mut self.inner.lock());
    }

    pub(crate) fn record_compression(&self, original: usize, compressed: usize) {
        self.update(|m| {
            m.compressed_payloads += 1;
            m.bytes_before_compression += original as u64;
            m.bytes_after_compression += compressed as u64;
        });
    }

    pub(crate) fn snapshot(&self) -> CacheMetrics {
        self.inner.lock().clone()
    }
}
