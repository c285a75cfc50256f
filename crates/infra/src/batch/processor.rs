//! Batch processor
//!
//! Two entry points share one backend and one concurrency budget:
//!
//! - **Queued**: [`BatchProcessor::submit`] puts a request on a bounded
//!   queue and waits for its reply. Workers drain the queue in batches
//!   closed by size or age, and `ListTools` requests for the same tenant
//!   within a batch share one backend call.
//! - **Fan-out**: [`BatchProcessor::batch_list_tools`] and
//!   [`BatchProcessor::batch_execute_tools`] run many calls at once, bounded
//!   by a semaphore with one permit per worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolmesh_domain::config::BatchConfig;
use toolmesh_domain::types::{Tool, ToolExecutionResponse};
use toolmesh_common::error::ErrorClassification;
use tracing::{debug, info, warn};

use super::errors::BatchError;
use super::metrics::{BatchMetrics, BatchMetricsRecorder};
use super::types::{BatchOperation, BatchResponse, FanOutResult, ToolInvocation};
use crate::api::{ApiError, ToolApi};

/// Type alias for task handles to avoid complexity warnings
type TaskHandles = Arc<Mutex<Vec<JoinHandle<()>>>>;

type Reply = oneshot::Sender<Result<BatchResponse, BatchError>>;

struct BatchRequest {
    operation: BatchOperation,
    tenant_id: String,
    reply: Reply,
}

struct Shared {
    api: Arc<dyn ToolApi>,
    config: BatchConfig,
    queue: Mutex<mpsc::Receiver<BatchRequest>>,
    metrics: BatchMetricsRecorder,
}

pub struct BatchProcessor {
    shared: Arc<Shared>,
    sender: mpsc::Sender<BatchRequest>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    workers: TaskHandles,
}

impl BatchProcessor {
    pub fn new(api: Arc<dyn ToolApi>, config: BatchConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        let shared = Shared {
            api,
            config,
            queue: Mutex::new(receiver),
            metrics: BatchMetricsRecorder::default(),
        };
        Self {
            shared: Arc::new(shared),
            sender,
            permits,
            cancel: CancellationToken::new(),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawn the queue workers.
    ///
    /// # Errors
    ///
    /// [`BatchError::AlreadyRunning`] on a second call, [`BatchError::Shutdown`]
    /// after [`close`](Self::close).
    pub async fn start(&self) -> Result<(), BatchError> {
        if self.cancel.is_cancelled() {
            return Err(BatchError::Shutdown);
        }
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return Err(BatchError::AlreadyRunning);
        }
        let count = self.shared.config.workers.max(1);
        for id in 0..count {
            let shared = Arc::clone(&self.shared);
            let cancel = self.cancel.clone();
            workers.push(tokio::spawn(worker_loop(id, shared, cancel)));
        }
        info!(workers = count, "batch processor started");
        Ok(())
    }

    /// Queue `operation` and wait for its result.
    ///
    /// # Errors
    ///
    /// - [`BatchError::QueueFull`] if the queue stayed full for
    ///   `enqueue_timeout`
    /// - [`BatchError::Shutdown`] if the processor closed first
    /// - [`BatchError::Api`] if the backend call failed
    pub async fn submit(
        &self,
        operation: BatchOperation,
        tenant_id: &str,
    ) -> Result<BatchResponse, BatchError> {
        let reply = self.enqueue(operation, tenant_id).await?;
        reply.await.unwrap_or(Err(BatchError::Shutdown))
    }

    /// [`submit`](Self::submit) that stops waiting when `cancel` fires.
    ///
    /// A cancelled request may still run; its result is discarded.
    pub async fn submit_with_cancel(
        &self,
        operation: BatchOperation,
        tenant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BatchResponse, BatchError> {
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(BatchError::Cancelled),
            reply = self.enqueue(operation, tenant_id) => reply?,
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(BatchError::Cancelled),
            result = reply => result.unwrap_or(Err(BatchError::Shutdown)),
        }
    }

    async fn enqueue(
        &self,
        operation: BatchOperation,
        tenant_id: &str,
    ) -> Result<oneshot::Receiver<Result<BatchResponse, BatchError>>, BatchError> {
        if self.cancel.is_cancelled() {
            return Err(BatchError::Shutdown);
        }
        let (reply, receiver) = oneshot::channel();
        let request = BatchRequest { operation, tenant_id: tenant_id.to_string(), reply };
        let timeout = self.shared.config.enqueue_timeout;

        match self.sender.send_timeout(request, timeout).await {
            Ok(()) => Ok(receiver),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.shared.metrics.record_queue_full();
                debug!(timeout_ms = timeout.as_millis() as u64, "batch queue full");
                Err(BatchError::QueueFull(timeout))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(BatchError::Shutdown),
        }
    }

    /// List tools for every tenant concurrently, results in input order
    pub async fn batch_list_tools(&self, tenants: &[String]) -> FanOutResult<Vec<Tool>> {
        let calls = tenants.iter().map(|tenant| async move {
            let _permit = self.permit().await?;
            self.shared.api.list_tools(tenant).await
        });
        FanOutResult { items: join_all(calls).await }
    }

    /// Execute every invocation concurrently, results in input order
    pub async fn batch_execute_tools(
        &self,
        invocations: Vec<ToolInvocation>,
    ) -> FanOutResult<ToolExecutionResponse> {
        let calls = invocations.into_iter().map(|call| async move {
            let _permit = self.permit().await?;
            self.shared
                .api
                .execute_tool(&call.tenant_id, &call.tool_id, &call.action, call.parameters)
                .await
        });
        FanOutResult { items: join_all(calls).await }
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ApiError> {
        self.permits.acquire().await.map_err(|_| ApiError::Closed)
    }

    pub fn metrics(&self) -> BatchMetrics {
        self.shared.metrics.snapshot()
    }

    /// Requests waiting in the queue
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Stop the workers and fail every request still queued with
    /// [`BatchError::Shutdown`].
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.permits.close();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("batch worker panicked: {}", e),
                Err(_) => warn!("batch worker did not complete within timeout"),
            }
        }

        let mut queue = self.shared.queue.lock().await;
        queue.close();
        let mut failed = 0;
        while let Ok(request) = queue.try_recv() {
            let _ = request.reply.send(Err(BatchError::Shutdown));
            failed += 1;
        }
        info!(failed, "batch processor closed");
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>, cancel: CancellationToken) {
    debug!(worker = id, "batch worker started");
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = collect_batch(&shared) => batch,
        };
        let Some(batch) = batch else { break };
        dispatch(&shared, batch).await;
    }
    debug!(worker = id, "batch worker stopped");
}

/// Wait for one request, then keep taking more until the batch is full or
/// `max_batch_wait` has passed since the first one.
async fn collect_batch(shared: &Shared) -> Option<Vec<BatchRequest>> {
    let mut queue = shared.queue.lock().await;
    let first = queue.recv().await?;
    let deadline = tokio::time::Instant::now() + shared.config.max_batch_wait;
    let mut batch = vec![first];

    while batch.len() < shared.config.max_batch_size {
        match tokio::time::timeout_at(deadline, queue.recv()).await {
            Ok(Some(request)) => batch.push(request),
            Ok(None) | Err(_) => break,
        }
    }
    Some(batch)
}

/// Split into runs of the same operation, keeping submission order
fn group_by_operation(batch: Vec<BatchRequest>) -> Vec<Vec<BatchRequest>> {
    let mut groups: Vec<Vec<BatchRequest>> = Vec::new();
    for request in batch {
        match groups.iter_mut().find(|g| g[0].operation.same_kind(&request.operation)) {
            Some(group) => group.push(request),
            None => groups.push(vec![request]),
        }
    }
    groups
}

#[derive(Default)]
struct Tally {
    successes: u64,
    failures: u64,
    coalesced: u64,
}

impl Tally {
    fn reply(&mut self, reply: Reply, result: Result<BatchResponse, BatchError>) {
        if result.is_ok() {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        // The caller may have stopped waiting.
        let _ = reply.send(result);
    }
}

async fn dispatch(shared: &Shared, batch: Vec<BatchRequest>) {
    let started = Instant::now();
    let size = batch.len();
    let mut tally = Tally::default();

    for group in group_by_operation(batch) {
        if matches!(group[0].operation, BatchOperation::ListTools) {
            list_tools_coalesced(shared, group, &mut tally).await;
        } else {
            for request in group {
                let result = call(shared, &request.operation, &request.tenant_id).await;
                tally.reply(request.reply, result.map_err(BatchError::from));
            }
        }
    }

    debug!(size, successes = tally.successes, failures = tally.failures, "batch dispatched");
    shared.metrics.record_batch(
        size,
        started.elapsed(),
        tally.successes,
        tally.failures,
        tally.coalesced,
    );
}

/// One backend call per tenant, answered to every request for that tenant
async fn list_tools_coalesced(shared: &Shared, group: Vec<BatchRequest>, tally: &mut Tally) {
    let mut by_tenant: Vec<(String, Vec<Reply>)> = Vec::new();
    for request in group {
        match by_tenant.iter_mut().find(|(tenant, _)| *tenant == request.tenant_id) {
            Some((_, replies)) => {
                replies.push(request.reply);
                tally.coalesced += 1;
            }
            None => by_tenant.push((request.tenant_id, vec![request.reply])),
        }
    }

    for (tenant, replies) in by_tenant {
        match shared.api.list_tools(&tenant).await {
            Ok(tools) => {
                for reply in replies {
                    tally.reply(reply, Ok(BatchResponse::Tools(tools.clone())));
                }
            }
            Err(e) => {
                let (code, class, message) = (e.error_code(), e.error_class(), e.to_string());
                let mut replies = replies.into_iter();
                if let Some(first) = replies.next() {
                    tally.reply(first, Err(BatchError::Api(e)));
                }
                for reply in replies {
                    let err = BatchError::Shared {
                        operation: "list_tools".to_string(),
                        code: code.clone(),
                        class,
                        message: message.clone(),
                    };
                    tally.reply(reply, Err(err));
                }
            }
        }
    }
}

async fn call(
    shared: &Shared,
    operation: &BatchOperation,
    tenant_id: &str,
) -> Result<BatchResponse, ApiError> {
    let api = &shared.api;
    match operation {
        BatchOperation::ListTools => api.list_tools(tenant_id).await.map(BatchResponse::Tools),
        BatchOperation::GetTool { tool_id } => {
            api.get_tool(tenant_id, tool_id).await.map(BatchResponse::Tool)
        }
        BatchOperation::ExecuteTool { tool_id, action, parameters } => api
            .execute_tool(tenant_id, tool_id, action, parameters.clone())
            .await
            .map(BatchResponse::Execution),
        BatchOperation::GetToolHealth { tool_id } => {
            api.get_tool_health(tenant_id, tool_id).await.map(BatchResponse::Health)
        }
    }
}
