//! A stage: one input queue, a pool of workers, one shared output queue.
//!
//! Workers compete for items on the input queue, so a stage with more than one
//! worker does not preserve the relative order of its stream. Within a single
//! worker items are processed in the order received.
//!
//! The output queue is closed exactly once, after every worker of the stage
//! has stopped. Each worker owns an [`OutputLease`]; the queue's senders live
//! only inside leases, so the queue closes when the last lease is released and
//! never before.

use crate::cancellation::CancellationToken;
use crate::core::{FilterChain, Job, JobRole};
use crate::errors::{BoxError, PipelineError, PipelineResult};
use crate::observability::StageMetrics;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::queue::{self, Outlet, QueueSender};

/// An async transform shared by every worker of a stage.
pub type Transform<In, Out> =
    Arc<dyn Fn(In) -> BoxFuture<'static, Result<Out, BoxError>> + Send + Sync>;

/// Boxes an async closure into a [`Transform`].
pub(crate) fn boxed_transform<In, Out, F, Fut>(f: F) -> Transform<In, Out>
where
    F: Fn(In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, BoxError>> + Send + 'static,
{
    Arc::new(move |item| f(item).boxed())
}

/// A queue read by several workers at once.
type SharedReceiver<T> = Arc<Mutex<Outlet<T>>>;

/// The "last worker out" barrier of a stage's output queue.
#[derive(Debug)]
pub(crate) struct StageGate {
    stage: String,
    remaining: AtomicUsize,
    closes: AtomicUsize,
}

impl StageGate {
    fn new(stage: &str, workers: usize) -> Arc<Self> {
        Arc::new(Self {
            stage: stage.to_string(),
            remaining: AtomicUsize::new(workers),
            closes: AtomicUsize::new(0),
        })
    }

    /// Number of times the output queue was released by the last worker.
    #[cfg(test)]
    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.closes.fetch_add(1, Ordering::SeqCst);
            debug!(stage = %self.stage, "all workers finished, output closed");
        }
    }
}

/// A worker's handle on the stage's output queue.
pub(crate) struct OutputLease<T> {
    tx: Option<QueueSender<T>>,
    gate: Arc<StageGate>,
}

impl<T> OutputLease<T> {
    /// Splits `tx` into one lease per worker. `tx` itself is consumed so no
    /// sender outlives the leases.
    pub(crate) fn split(
        stage: &str,
        tx: QueueSender<T>,
        workers: usize,
    ) -> (Vec<Self>, Arc<StageGate>) {
        let gate = StageGate::new(stage, workers);
        let mut leases: Vec<Self> = (1..workers)
            .map(|_| Self {
                tx: Some(tx.clone()),
                gate: gate.clone(),
            })
            .collect();
        if workers > 0 {
            leases.push(Self {
                tx: Some(tx),
                gate: gate.clone(),
            });
        }
        (leases, gate)
    }

    fn sender(&self) -> Option<&QueueSender<T>> {
        self.tx.as_ref()
    }
}

impl<T> Drop for OutputLease<T> {
    fn drop(&mut self) {
        // The sender must be gone before the gate reports the close.
        drop(self.tx.take());
        self.gate.release();
    }
}

/// A fully configured stage, ready to be turned into worker jobs.
pub(crate) struct Stage<In, Out> {
    pub(crate) name: String,
    pub(crate) transform: Transform<In, Out>,
    pub(crate) filters: FilterChain<In>,
    pub(crate) output_filters: FilterChain<Out>,
    pub(crate) workers: usize,
    pub(crate) buffer_size: usize,
}

impl<In, Out> Stage<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Allocates the output queue and builds one job per worker.
    pub(crate) fn into_jobs(
        self,
        input: Outlet<In>,
        token: &Arc<CancellationToken>,
        metrics: &Arc<StageMetrics>,
    ) -> (Outlet<Out>, Vec<Job>) {
        let (tx, rx) = queue::channel(self.buffer_size);
        let (leases, _gate) = OutputLease::split(&self.name, tx, self.workers);
        let input: SharedReceiver<In> = Arc::new(Mutex::new(input));

        debug!(
            stage = %self.name,
            workers = self.workers,
            buffer_size = self.buffer_size,
            filters = self.filters.len(),
            "stage materialized"
        );

        let jobs = leases
            .into_iter()
            .enumerate()
            .map(|(index, lease)| {
                let worker = Worker {
                    stage: self.name.clone(),
                    transform: self.transform.clone(),
                    filters: self.filters.clone(),
                    output_filters: self.output_filters.clone(),
                    input: input.clone(),
                    token: token.clone(),
                    metrics: metrics.clone(),
                };
                let name = format!("{}/worker-{index}", self.name);
                Job::new(name, JobRole::Worker, worker.run(lease))
            })
            .collect();

        (rx, jobs)
    }
}

/// One member of a stage's worker pool.
struct Worker<In, Out> {
    stage: String,
    transform: Transform<In, Out>,
    filters: FilterChain<In>,
    output_filters: FilterChain<Out>,
    input: SharedReceiver<In>,
    token: Arc<CancellationToken>,
    metrics: Arc<StageMetrics>,
}

impl<In, Out> Worker<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    async fn run(self, lease: OutputLease<Out>) -> PipelineResult<()> {
        let Some(output) = lease.sender() else {
            return Ok(());
        };

        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => return Err(PipelineError::Cancelled),
                next = async { self.input.lock().await.recv().await } => next,
            };
            let Some(item) = next else {
                trace!(stage = %self.stage, "input exhausted");
                return Ok(());
            };
            self.metrics.record_receive();

            if !self.filters.accept(&item) {
                self.metrics.record_filter();
                continue;
            }

            let result = (self.transform)(item)
                .await
                .map_err(|e| PipelineError::stage(&self.stage, e))?;

            if !self.output_filters.accept(&result) {
                self.metrics.record_filter();
                continue;
            }

            output.send(result, &self.token, &self.stage).await?;
            self.metrics.record_emit();
        }
    }
}
