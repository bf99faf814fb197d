//! Sinks: terminal drainers of a chain's output queue.

use crate::cancellation::CancellationToken;
use crate::core::{Job, JobRole};
use crate::errors::{BoxError, PipelineError, PipelineResult};
use crate::observability::StageMetrics;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::queue::Outlet;

/// Caller-supplied per-item side effect.
pub(crate) type Consumer<T> =
    Box<dyn FnMut(T) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// What the drainer does with each item.
pub(crate) enum Sink<T> {
    /// Hand every item to a consumer function.
    Consume(Consumer<T>),
    /// Forward every item into a queue owned by the caller.
    Forward(mpsc::Sender<T>),
}

impl<T: Send + 'static> Sink<T> {
    /// Builds the drainer job reading `input` until it closes.
    pub(crate) fn into_job(
        self,
        stage: &str,
        input: Outlet<T>,
        token: Arc<CancellationToken>,
        metrics: Arc<StageMetrics>,
    ) -> Job {
        let drainer = Drainer {
            stage: stage.to_string(),
            input,
            token,
            metrics,
        };
        Job::new(stage, JobRole::Drainer, drainer.run(self))
    }
}

struct Drainer<T> {
    stage: String,
    input: Outlet<T>,
    token: Arc<CancellationToken>,
    metrics: Arc<StageMetrics>,
}

impl<T: Send + 'static> Drainer<T> {
    async fn run(mut self, mut sink: Sink<T>) -> PipelineResult<()> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => return Err(PipelineError::Cancelled),
                next = self.input.recv() => next,
            };
            let Some(item) = next else {
                debug!(stage = %self.stage, "sink drained");
                return Ok(());
            };
            self.metrics.record_receive();

            match &mut sink {
                Sink::Consume(consumer) => {
                    consumer(item)
                        .await
                        .map_err(|e| PipelineError::stage(&self.stage, e))?;
                }
                Sink::Forward(tx) => {
                    tokio::select! {
                        biased;
                        () = self.token.cancelled() => return Err(PipelineError::Cancelled),
                        sent = tx.send(item) => {
                            sent.map_err(|_| PipelineError::disconnected(&self.stage))?;
                        }
                    }
                }
            }
            self.metrics.record_emit();
        }
    }
}
