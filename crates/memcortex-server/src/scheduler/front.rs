//! Fronts [`Dispatcher::dispatch`] with whichever concurrency strategy
//! `ServerConfig::scheduler_strategy` selects, so the scheduler (C6) is
//! genuinely on the request path rather than just available for callers
//! to opt into.

use std::sync::Arc;

use memcortex_protocol::JsonRpcRequest;

use crate::config::SchedulerStrategy;
use crate::dispatcher::{DispatchOutcome, Dispatcher, McpSession};

use super::{
    BatchConfig, BatchProcessor, BoxFuture, Pipeline, SchedulerError, SchedulerSnapshot, StageFn, WorkerPool,
    WorkerPoolConfig,
};

/// One scheduled unit of work: a request bound to the dispatcher and
/// session it should run against.
pub struct ScheduledJob {
    dispatcher: Arc<Dispatcher>,
    session: Arc<McpSession>,
    request: JsonRpcRequest,
}

/// Picks one of the three scheduler strategies per [`SchedulerStrategy`]
/// and runs every dispatched request through it.
pub enum RequestScheduler {
    /// Bounded queue, fixed worker pool.
    WorkerPool(WorkerPool<DispatchOutcome>),
    /// Requests land together in the same flush; each still runs its own
    /// dispatch call, concurrently, within that flush.
    Batch(BatchProcessor<ScheduledJob, DispatchOutcome>),
    /// A two-stage pipeline: route, then execute.
    Pipeline(Pipeline<PipelineSlot>),
}

/// Carries a job through the pipeline's stages; each stage mutates and
/// returns it.
pub struct PipelineSlot {
    dispatcher: Arc<Dispatcher>,
    session: Arc<McpSession>,
    request: Option<JsonRpcRequest>,
    outcome: Option<DispatchOutcome>,
}

impl RequestScheduler {
    /// Build the scheduler `strategy` selects, with its default tuning.
    pub fn new(strategy: SchedulerStrategy) -> Self {
        match strategy {
            SchedulerStrategy::WorkerPool => Self::WorkerPool(WorkerPool::new(WorkerPoolConfig::default())),
            SchedulerStrategy::Batch => Self::Batch(BatchProcessor::new(BatchConfig::default(), run_batch)),
            SchedulerStrategy::Pipeline => Self::Pipeline(Pipeline::new(pipeline_stages(), 256)),
        }
    }

    /// Run `request` through the selected strategy, against `dispatcher`
    /// and `session`.
    pub async fn schedule(
        &self,
        dispatcher: Arc<Dispatcher>,
        session: Arc<McpSession>,
        request: JsonRpcRequest,
    ) -> Result<DispatchOutcome, SchedulerError> {
        match self {
            Self::WorkerPool(pool) => {
                pool.submit(async move { dispatcher.dispatch(&session, request).await }).await
            }
            Self::Batch(batch) => batch.submit(ScheduledJob { dispatcher, session, request }).await,
            Self::Pipeline(pipeline) => {
                let slot = PipelineSlot {
                    dispatcher,
                    session,
                    request: Some(request),
                    outcome: None,
                };
                let slot = pipeline.submit(slot, None).await?;
                slot.outcome
                    .ok_or_else(|| SchedulerError::WorkerFailed("pipeline produced no outcome".to_string()))
            }
        }
    }

    /// Metrics for whichever strategy is running.
    pub fn metrics(&self) -> SchedulerSnapshot {
        match self {
            Self::WorkerPool(pool) => pool.metrics(),
            Self::Batch(batch) => batch.metrics(),
            Self::Pipeline(pipeline) => pipeline.metrics(),
        }
    }
}

async fn run_batch(jobs: Vec<ScheduledJob>) -> Vec<Result<DispatchOutcome, SchedulerError>> {
    let dispatches = jobs.into_iter().map(|job| async move {
        Ok(job.dispatcher.dispatch(&job.session, job.request).await)
    });
    futures::future::join_all(dispatches).await
}

fn pipeline_stages() -> Vec<StageFn<PipelineSlot>> {
    vec![
        Arc::new(|slot: PipelineSlot| Box::pin(async move { slot }) as BoxFuture<PipelineSlot>),
        Arc::new(|mut slot: PipelineSlot| {
            Box::pin(async move {
                if let Some(request) = slot.request.take() {
                    slot.outcome = Some(slot.dispatcher.dispatch(&slot.session, request).await);
                }
                slot
            }) as BoxFuture<PipelineSlot>
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memcortex_protocol::{JsonRpcNotification, MemoryResult, RequestId};
    use serde_json::{json, Value};

    use crate::dispatcher::{ToolDefinition, ToolHandler};

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, params: Option<Value>) -> MemoryResult<Value> {
            Ok(params.unwrap_or(Value::Null))
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes its arguments".to_string(),
                input_schema: json!({ "type": "object" }),
            }
        }
    }

    async fn ready_session() -> (Arc<Dispatcher>, Arc<McpSession>) {
        let dispatcher = Arc::new(Dispatcher::new("memcortex", "0.1.0"));
        dispatcher.register_tool("echo", Arc::new(EchoTool));
        let session = Arc::new(McpSession::new());
        dispatcher
            .dispatch(&session, JsonRpcRequest::new("initialize", None, RequestId::from(1i64)))
            .await;
        dispatcher.dispatch_notification(&session, JsonRpcNotification::new("notifications/initialized", None));
        (dispatcher, session)
    }

    async fn assert_echoes(scheduler: RequestScheduler) {
        let (dispatcher, session) = ready_session().await;
        let params = json!({ "name": "echo", "arguments": { "x": 7 } });
        let outcome = scheduler
            .schedule(dispatcher, session, JsonRpcRequest::new("tools/call", Some(params), RequestId::from(2i64)))
            .await
            .unwrap();
        assert_eq!(outcome.response.unwrap().result().unwrap()["x"], 7);
    }

    #[tokio::test]
    async fn worker_pool_strategy_fronts_dispatch() {
        assert_echoes(RequestScheduler::new(SchedulerStrategy::WorkerPool)).await;
    }

    #[tokio::test]
    async fn batch_strategy_fronts_dispatch() {
        assert_echoes(RequestScheduler::new(SchedulerStrategy::Batch)).await;
    }

    #[tokio::test]
    async fn pipeline_strategy_fronts_dispatch() {
        assert_echoes(RequestScheduler::new(SchedulerStrategy::Pipeline)).await;
    }
}
