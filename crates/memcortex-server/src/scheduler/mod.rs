//! The concurrent request scheduler (C6): three interchangeable
//! strategies — worker pool, batch processor, pipeline — sharing one
//! metrics shape and one cancellation contract.
//!
//! All three sit between the dispatcher and its middleware chain:
//! `submit` takes the unit of work (typically `dispatcher.dispatch(...)`
//! boxed as a future) and returns its result, or a [`SchedulerError`] if
//! the request was rejected, cancelled, or its worker panicked.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::warn;

use memcortex_protocol::{JsonRpcError, JsonRpcErrorCode};

pub mod front;
pub use front::RequestScheduler;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Errors the scheduler itself can produce, distinct from the handler's
/// own [`memcortex_protocol::MemoryError`].
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The bounded queue was full at submission time.
    #[error("scheduler queue is full")]
    Overloaded,
    /// The caller's cancellation signal fired before the task finished.
    #[error("request was cancelled")]
    Cancelled,
    /// The worker task panicked or its channel was dropped.
    #[error("worker task failed: {0}")]
    WorkerFailed(String),
    /// The scheduler is shutting down and accepts no further work.
    #[error("scheduler is shut down")]
    ShuttingDown,
}

impl From<SchedulerError> for JsonRpcError {
    fn from(error: SchedulerError) -> Self {
        let code = match error {
            SchedulerError::Overloaded => JsonRpcErrorCode::Overloaded,
            SchedulerError::Cancelled => JsonRpcErrorCode::ApplicationError(-32006),
            SchedulerError::WorkerFailed(_) => JsonRpcErrorCode::InternalError,
            SchedulerError::ShuttingDown => JsonRpcErrorCode::Overloaded,
        };
        Self {
            code: code.code(),
            message: error.to_string(),
            data: None,
        }
    }
}

/// The metrics map shared by all three scheduler strategies.
#[derive(Default)]
pub struct SchedulerMetrics {
    total_requests: AtomicU64,
    active_requests: AtomicU64,
    rejected_requests: AtomicU64,
    completed_requests: AtomicU64,
    durations: parking_lot::Mutex<Vec<u64>>,
}

const MAX_DURATION_SAMPLES: usize = 2048;

impl SchedulerMetrics {
    fn record_submit(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_active(&self, delta: i64) {
        if delta >= 0 {
            self.active_requests.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            self.active_requests.fetch_sub((-delta) as u64, Ordering::Relaxed);
        }
    }

    fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completed(&self, elapsed: Duration) {
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
        let mut durations = self.durations.lock();
        durations.push(elapsed.as_micros() as u64);
        if durations.len() > MAX_DURATION_SAMPLES {
            durations.remove(0);
        }
    }

    fn percentile(&self, pct: f64) -> u64 {
        let durations = self.durations.lock();
        if durations.is_empty() {
            return 0;
        }
        let mut sorted = durations.clone();
        sorted.sort_unstable();
        let rank = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }

    /// A point-in-time snapshot of this scheduler's metrics.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            completed_requests: self.completed_requests.load(Ordering::Relaxed),
            p50_duration_micros: self.percentile(0.50),
            p95_duration_micros: self.percentile(0.95),
            p99_duration_micros: self.percentile(0.99),
        }
    }
}

/// Snapshot shape shared by all three scheduler strategies.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SchedulerSnapshot {
    /// Work items submitted since construction.
    pub total_requests: u64,
    /// Work items currently running.
    pub active_requests: u64,
    /// Work items rejected (queue full or shutting down).
    pub rejected_requests: u64,
    /// Work items that ran to completion (success or handler error).
    pub completed_requests: u64,
    /// 50th percentile wall-clock duration, in microseconds.
    pub p50_duration_micros: u64,
    /// 95th percentile wall-clock duration, in microseconds.
    pub p95_duration_micros: u64,
    /// 99th percentile wall-clock duration, in microseconds.
    pub p99_duration_micros: u64,
}

struct Job<T> {
    task: BoxFuture<T>,
    cancel: Option<oneshot::Receiver<()>>,
    respond_to: oneshot::Sender<Result<T, SchedulerError>>,
    enqueued_at: Instant,
}

/// Configuration for [`WorkerPool`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Queue capacity; submissions beyond this are rejected immediately.
    pub max_queue_size: usize,
    /// Number of worker tasks draining the queue.
    pub num_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 256,
            num_workers: 4,
        }
    }
}

/// A bounded queue feeding a fixed pool of worker tasks. Submissions past
/// `max_queue_size` are rejected with [`SchedulerError::Overloaded`].
pub struct WorkerPool<T: Send + 'static> {
    sender: mpsc::Sender<Job<T>>,
    metrics: Arc<SchedulerMetrics>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start a worker pool per `config`.
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.max_queue_size);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let metrics = Arc::new(SchedulerMetrics::default());

        let mut workers = Vec::with_capacity(config.num_workers);
        for _ in 0..config.num_workers {
            let receiver = Arc::clone(&receiver);
            let metrics = Arc::clone(&metrics);
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(job) = job else { break };
                    run_job(job, &metrics).await;
                }
            }));
        }

        Self { sender, metrics, workers }
    }

    /// Submit a unit of work. Rejects immediately if the queue is full.
    pub async fn submit(&self, task: impl Future<Output = T> + Send + 'static) -> Result<T, SchedulerError> {
        self.submit_cancellable(task, None).await
    }

    /// Submit a unit of work that can be preempted by `cancel` firing
    /// before the task completes.
    pub async fn submit_cancellable(
        &self,
        task: impl Future<Output = T> + Send + 'static,
        cancel: Option<oneshot::Receiver<()>>,
    ) -> Result<T, SchedulerError> {
        self.metrics.record_submit();
        let (respond_to, response) = oneshot::channel();
        let job = Job {
            task: Box::pin(task),
            cancel,
            respond_to,
            enqueued_at: Instant::now(),
        };

        if self.sender.try_send(job).is_err() {
            self.metrics.record_rejected();
            return Err(SchedulerError::Overloaded);
        }

        response
            .await
            .unwrap_or_else(|_| Err(SchedulerError::WorkerFailed("worker dropped the response channel".to_string())))
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> SchedulerSnapshot {
        self.metrics.snapshot()
    }

    /// Stop accepting work and wait up to `timeout` for in-flight jobs to
    /// drain, then abort any workers still running.
    pub async fn shutdown(self, timeout: Duration) {
        drop(self.sender);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        for worker in self.workers {
            tokio::select! {
                _ = worker => {}
                _ = &mut deadline => {
                    warn!("worker pool shutdown timed out, aborting remaining workers");
                    break;
                }
            }
        }
    }
}

async fn run_job<T: Send + 'static>(job: Job<T>, metrics: &SchedulerMetrics) {
    metrics.record_active(1);
    let started = job.enqueued_at;
    let result = match job.cancel {
        Some(mut cancel) => {
            tokio::select! {
                output = job.task => Ok(output),
                _ = &mut cancel => Err(SchedulerError::Cancelled),
            }
        }
        None => Ok(job.task.await),
    };
    metrics.record_active(-1);
    metrics.record_completed(started.elapsed());
    let _ = job.respond_to.send(result);
}

/// Configuration for [`BatchProcessor`].
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Flush the accumulated batch once it reaches this size.
    pub batch_size: usize,
    /// Flush the accumulated batch once this much time has elapsed since
    /// its first item arrived, even if `batch_size` was not reached.
    pub batch_timeout: Duration,
    /// Queue capacity for incoming items awaiting batching.
    pub queue_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            batch_timeout: Duration::from_millis(20),
            queue_size: 1024,
        }
    }
}

struct BatchItem<I, T> {
    value: I,
    respond_to: oneshot::Sender<Result<T, SchedulerError>>,
}

/// Accumulates items until `batch_size` is reached or `batch_timeout`
/// elapses, then hands the whole batch to a handler in one call.
pub struct BatchProcessor<I: Send + 'static, T: Send + 'static> {
    sender: mpsc::Sender<BatchItem<I, T>>,
    metrics: Arc<SchedulerMetrics>,
    worker: tokio::task::JoinHandle<()>,
}

impl<I: Send + 'static, T: Send + 'static> BatchProcessor<I, T> {
    /// Start a batch processor calling `handler` once per flushed batch.
    /// `handler` must return exactly one output per input, in order.
    pub fn new<H, Fut>(config: BatchConfig, handler: H) -> Self
    where
        H: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Result<T, SchedulerError>>> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<BatchItem<I, T>>(config.queue_size);
        let metrics = Arc::new(SchedulerMetrics::default());
        let handler = Arc::new(handler);

        let worker_metrics = Arc::clone(&metrics);
        let worker = tokio::spawn(async move {
            let mut buffer: Vec<BatchItem<I, T>> = Vec::with_capacity(config.batch_size);
            loop {
                let first = match receiver.recv().await {
                    Some(item) => item,
                    None => break,
                };
                buffer.push(first);
                let deadline = tokio::time::sleep(config.batch_timeout);
                tokio::pin!(deadline);

                while buffer.len() < config.batch_size {
                    tokio::select! {
                        item = receiver.recv() => match item {
                            Some(item) => buffer.push(item),
                            None => break,
                        },
                        _ = &mut deadline => break,
                    }
                }

                let started = Instant::now();
                worker_metrics.record_active(buffer.len() as i64);
                let (values, responders): (Vec<I>, Vec<_>) =
                    buffer.drain(..).map(|item| (item.value, item.respond_to)).unzip();
                let count = values.len();
                let results = handler(values).await;
                worker_metrics.record_active(-(count as i64));

                for (responder, result) in responders.into_iter().zip(results) {
                    worker_metrics.record_completed(started.elapsed());
                    let _ = responder.send(result);
                }
            }
        });

        Self { sender, metrics, worker }
    }

    /// Submit one item; resolves once its batch has been handled.
    pub async fn submit(&self, value: I) -> Result<T, SchedulerError> {
        self.metrics.record_submit();
        let (respond_to, response) = oneshot::channel();
        if self.sender.try_send(BatchItem { value, respond_to }).is_err() {
            self.metrics.record_rejected();
            return Err(SchedulerError::Overloaded);
        }
        response
            .await
            .unwrap_or_else(|_| Err(SchedulerError::WorkerFailed("batch worker dropped the response channel".to_string())))
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> SchedulerSnapshot {
        self.metrics.snapshot()
    }

    /// Stop accepting new items and wait for the in-flight batch to drain.
    pub async fn shutdown(self, timeout: Duration) {
        drop(self.sender);
        let _ = tokio::time::timeout(timeout, self.worker).await;
    }
}

type StageFn<T> = Arc<dyn Fn(T) -> BoxFuture<T> + Send + Sync>;

struct PipelineItem<T> {
    value: T,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
    respond_to: Option<oneshot::Sender<Result<T, SchedulerError>>>,
}

/// N stages connected by channels, each applying one transformation to
/// the item in flight. Trades higher end-to-end concurrency for lower
/// per-request latency than a worker pool.
pub struct Pipeline<T: Send + 'static> {
    entry: mpsc::Sender<PipelineItem<T>>,
    metrics: Arc<SchedulerMetrics>,
    stages: Vec<tokio::task::JoinHandle<()>>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Build a pipeline of `stages`, each run as its own task, connected
    /// by channels of capacity `stage_buffer`.
    pub fn new(stage_fns: Vec<StageFn<T>>, stage_buffer: usize) -> Self {
        assert!(!stage_fns.is_empty(), "pipeline needs at least one stage");
        let metrics = Arc::new(SchedulerMetrics::default());

        let (entry, mut next_rx) = mpsc::channel::<PipelineItem<T>>(stage_buffer);
        let mut stages = Vec::with_capacity(stage_fns.len());
        let last_index = stage_fns.len() - 1;

        for (index, stage_fn) in stage_fns.into_iter().enumerate() {
            let is_last = index == last_index;
            let (tx, rx) = if is_last {
                (None, None)
            } else {
                let (tx, rx) = mpsc::channel::<PipelineItem<T>>(stage_buffer);
                (Some(tx), Some(rx))
            };

            let mut inbound = next_rx;
            let metrics = Arc::clone(&metrics);
            let outbound = tx.clone();
            stages.push(tokio::spawn(async move {
                while let Some(mut item) = inbound.recv().await {
                    if item.cancelled.load(Ordering::Relaxed) {
                        if let Some(respond_to) = item.respond_to.take() {
                            let _ = respond_to.send(Err(SchedulerError::Cancelled));
                        }
                        continue;
                    }

                    let output = stage_fn(item.value).await;
                    item.value = output;

                    if is_last {
                        metrics.record_completed(Duration::from_micros(0));
                        if let Some(respond_to) = item.respond_to.take() {
                            let _ = respond_to.send(Ok(item.value));
                        }
                    } else if let Some(outbound) = &outbound {
                        let _ = outbound.send(item).await;
                    }
                }
            }));

            if let Some(rx) = rx {
                next_rx = rx;
            }
        }

        Self { entry, metrics, stages }
    }

    /// Submit one item through all stages, returning a handle that
    /// resolves with the final stage's output. `cancel`, if fired before
    /// the item reaches its next stage boundary, short-circuits it.
    pub async fn submit(&self, value: T, cancel: Option<oneshot::Receiver<()>>) -> Result<T, SchedulerError> {
        self.metrics.record_submit();
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        if let Some(cancel) = cancel {
            let cancelled = Arc::clone(&cancelled);
            tokio::spawn(async move {
                if cancel.await.is_ok() {
                    cancelled.store(true, Ordering::Relaxed);
                }
            });
        }

        let (respond_to, response) = oneshot::channel();
        let item = PipelineItem {
            value,
            cancelled,
            respond_to: Some(respond_to),
        };

        if self.entry.send(item).await.is_err() {
            self.metrics.record_rejected();
            return Err(SchedulerError::ShuttingDown);
        }

        response
            .await
            .unwrap_or_else(|_| Err(SchedulerError::WorkerFailed("pipeline dropped the response channel".to_string())))
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> SchedulerSnapshot {
        self.metrics.snapshot()
    }

    /// Stop accepting new items and wait for in-flight items to drain.
    pub async fn shutdown(self, timeout: Duration) {
        drop(self.entry);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        for stage in self.stages {
            tokio::select! {
                _ = stage => {}
                _ = &mut deadline => break,
            }
        }
    }
}
