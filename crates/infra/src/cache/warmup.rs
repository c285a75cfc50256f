//! Background warmup: a small worker pool fed by one bounded, two-priority
//! queue, plus a periodic scan that refreshes hot entries before they expire.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::manager::CacheShared;

/// Queue selection for [`CacheManager::warm_cache`](super::CacheManager::warm_cache)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPriority {
    Low,
    Normal,
    High,
}

/// Produces the serialized value for a key
pub(crate) type LoadFuture = BoxFuture<'static, Result<Vec<u8>, String>>;

/// Repeatable loader kept for periodic refreshes
pub(crate) type SharedLoader = Arc<dyn Fn() -> LoadFuture + Send + Sync>;

#[derive(Clone)]
pub(crate) struct RegisteredLoader {
    pub loader: SharedLoader,
    pub ttl: Duration,
}

pub(crate) struct WarmupJob {
    pub key: String,
    pub ttl: Duration,
    /// Refresh even if the key is currently cached
    pub force: bool,
    pub load: LoadFuture,
}

impl fmt::Debug for WarmupJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupJob")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

/// High and normal lanes sharing one capacity.
pub(crate) struct WarmupQueue {
    capacity: usize,
    pending: AtomicUsize,
    high_tx: mpsc::Sender<WarmupJob>,
    normal_tx: mpsc::Sender<WarmupJob>,
    high_rx: Mutex<mpsc::Receiver<WarmupJob>>,
    normal_rx: Mutex<mpsc::Receiver<WarmupJob>>,
}

impl WarmupQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (high_tx, high_rx) = mpsc::channel(capacity);
        let (normal_tx, normal_rx) = mpsc::channel(capacity);
        Self {
            capacity,
            pending: AtomicUsize::new(0),
            high_tx,
            normal_tx,
            high_rx: Mutex::new(high_rx),
            normal_rx: Mutex::new(normal_rx),
        }
    }

    /// Enqueue without waiting. A full queue hands the job back.
    pub(crate) fn try_push(
        &self,
        job: WarmupJob,
        priority: WarmupPriority,
    ) -> Result<(), WarmupJob> {
        let reserved = self.pending.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
            (pending < self.capacity).then_some(pending + 1)
        });
        if reserved.is_err() {
            return Err(job);
        }

        let tx = match priority {
            WarmupPriority::High => &self.high_tx,
            WarmupPriority::Normal | WarmupPriority::Low => &self.normal_tx,
        };
        tx.try_send(job).map_err(|err| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            match err {
                mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
            }
        })
    }

    /// Jobs waiting across both lanes
    pub(crate) fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Next job, high priority first
    async fn next(&self) -> Option<WarmupJob> {
        let job = tokio::select! {
            biased;
            job = recv(&self.high_rx) => job,
            job = recv(&self.normal_rx) => job,
        };
        if job.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        job
    }
}

async fn recv(rx: &Mutex<mpsc::Receiver<WarmupJob>>) -> Option<WarmupJob> {
    rx.lock().await.recv().await
}

pub(crate) async fn worker_loop(id: usize, shared: Arc<CacheShared>, cancel: CancellationToken) {
    debug!(worker = id, "warmup worker started");
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = shared.warmup.next() => job,
        };
        let Some(job) = job else { break };

        tokio::select! {
            _ = cancel.cancelled() => break,
            () = run_job(&shared, job) => {}
        }
    }
    debug!(worker = id, "warmup worker stopped");
}

async fn run_job(shared: &CacheShared, job: WarmupJob) {
    let WarmupJob { key, ttl, force, load } = job;

    if !force && shared.is_cached(&key) {
        debug!(key = %key, "warmup skipped, already cached");
        return;
    }

    let timeout = shared.config.warmup_load_timeout;
    match tokio::time::timeout(timeout, load).await {
        Ok(Ok(bytes)) => {
            shared.store(&key, Arc::new(bytes), ttl, Vec::new()).await;
            shared.metrics.update(|m| m.warmup_successes += 1);
            debug!(key = %key, "warmup loaded");
        }
        Ok(Err(message)) => {
            shared.metrics.update(|m| m.warmup_failures += 1);
            warn!(key = %key, error = %message, "warmup loader failed");
        }
        Err(_) => {
            shared.metrics.update(|m| m.warmup_failures += 1);
            warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "warmup loader timed out");
        }
    }
}

pub(crate) async fn scan_loop(shared: Arc<CacheShared>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("warmup scan loop cancelled");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                let queued = shared.scan_hot_entries();
                debug!(queued, "periodic warmup scan finished");
            }
        }
    }
}
