//! The pipeline runtime: runs every job of a chain and aggregates the outcome.

use crate::cancellation::CancellationToken;
use crate::core::{Job, PipelineState};
use crate::errors::{PipelineError, PipelineResult};
use crate::observability::{StageMetrics, StageMetricsSnapshot};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything a finalized chain needs to run: the shared token, the jobs and
/// the per-stage counters. Filled in while the builder is materialized.
pub(crate) struct Wiring {
    token: Arc<CancellationToken>,
    jobs: Vec<Job>,
    metrics: Vec<Arc<StageMetrics>>,
}

impl Wiring {
    pub(crate) fn new() -> Self {
        Self {
            token: Arc::new(CancellationToken::new()),
            jobs: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub(crate) const fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Number of stages registered so far, the source included.
    pub(crate) fn stage_count(&self) -> usize {
        self.metrics.len()
    }

    /// Registers counters for a new stage.
    pub(crate) fn register(&mut self, stage: &str) -> Arc<StageMetrics> {
        let metrics = Arc::new(StageMetrics::new(stage));
        self.metrics.push(metrics.clone());
        metrics
    }

    pub(crate) fn push(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub(crate) fn extend(&mut self, jobs: impl IntoIterator<Item = Job>) {
        self.jobs.extend(jobs);
    }
}

/// Handle to a running (or ready to run) pipeline.
///
/// Handles are cheap to clone; all clones observe and control the same run.
/// Dropping every handle does not stop the pipeline.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<RuntimeInner>,
}

/// The result of the supervisor task, awaitable by any number of waiters.
type Outcome = Shared<BoxFuture<'static, PipelineResult<()>>>;

enum Launch {
    /// Jobs waiting to be dispatched.
    Pending(Vec<Job>),
    /// Jobs dispatched; the supervisor publishes the outcome once all have
    /// finished.
    Started(Outcome),
}

struct RuntimeInner {
    id: Uuid,
    token: Arc<CancellationToken>,
    metrics: Vec<Arc<StageMetrics>>,
    launch: Mutex<Launch>,
    started: AtomicBool,
    active: AtomicUsize,
    /// First failure observed; later failures are only logged.
    first_error: Mutex<Option<PipelineError>>,
    created_at: Instant,
}

impl Pipeline {
    pub(crate) fn new(wiring: Wiring) -> Self {
        let Wiring {
            token,
            jobs,
            metrics,
        } = wiring;

        let pipeline = Self {
            inner: Arc::new(RuntimeInner {
                id: Uuid::new_v4(),
                token,
                metrics,
                active: AtomicUsize::new(jobs.len()),
                launch: Mutex::new(Launch::Pending(jobs)),
                started: AtomicBool::new(false),
                first_error: Mutex::new(None),
                created_at: Instant::now(),
            }),
        };
        debug!(pipeline = %pipeline.id(), "pipeline built");
        pipeline
    }

    /// Returns the run identifier used in log output.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Dispatches every job onto the Tokio runtime.
    ///
    /// Idempotent; [`Pipeline::wait`] calls it too.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        self.launch();
    }

    /// Waits for every job to finish and returns the first error observed.
    ///
    /// Every call, from any clone, returns the same outcome. Dropping a wait
    /// before it resolves does not affect the run or later waits. Starts the
    /// pipeline if it has not been started yet.
    pub async fn wait(&self) -> PipelineResult<()> {
        self.launch().await
    }

    /// Dispatches the jobs on first use and returns the shared outcome.
    fn launch(&self) -> Outcome {
        let mut launch = self.inner.launch.lock();
        let jobs = match &mut *launch {
            Launch::Started(outcome) => return outcome.clone(),
            Launch::Pending(jobs) => std::mem::take(jobs),
        };

        info!(pipeline = %self.id(), jobs = jobs.len(), "pipeline starting");
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.run_job(job).await })
            })
            .collect();

        let supervisor = tokio::spawn(self.inner.clone().supervise(handles));
        let outcome = supervisor
            .map(|joined| {
                joined.unwrap_or_else(|join_error| {
                    Err(PipelineError::Panicked {
                        job: "supervisor".to_string(),
                        message: join_error.to_string(),
                    })
                })
            })
            .boxed()
            .shared();

        *launch = Launch::Started(outcome.clone());
        self.inner.started.store(true, Ordering::SeqCst);
        outcome
    }

    /// Requests cancellation of every job.
    ///
    /// Does not block. Safe to call repeatedly and after completion.
    pub fn cancel(&self) {
        if self.inner.token.cancel("pipeline cancelled by caller") {
            info!(pipeline = %self.id(), "pipeline cancel requested");
        }
    }

    /// Returns true while any job is still running.
    ///
    /// A snapshot only; use [`Pipeline::wait`] to synchronise.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && self.inner.active.load(Ordering::SeqCst) > 0
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        if !self.inner.started.load(Ordering::SeqCst) {
            return PipelineState::Built;
        }
        if self.inner.active.load(Ordering::SeqCst) > 0 {
            return PipelineState::Running;
        }
        match &*self.inner.first_error.lock() {
            None => PipelineState::Completed,
            Some(PipelineError::Cancelled) => PipelineState::Canceled,
            Some(_) => PipelineState::Failed,
        }
    }

    /// Returns a snapshot of every stage's counters, source first.
    #[must_use]
    pub fn metrics(&self) -> Vec<StageMetricsSnapshot> {
        self.inner.metrics.iter().map(|m| m.snapshot()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("cancelled", &self.inner.token.is_cancelled())
            .finish()
    }
}

impl RuntimeInner {
    async fn run_job(self: Arc<Self>, job: Job) {
        let name = job.name().to_string();
        let result = AssertUnwindSafe(job.run())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(PipelineError::Panicked {
                    job: name.clone(),
                    message: panic_message(payload.as_ref()),
                })
            });

        if let Err(err) = result {
            self.record_failure(&name, err);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Keeps the first failure and cancels the rest of the pipeline.
    ///
    /// The failure is stored before the token fires, so jobs that unwind
    /// because of it can never overwrite it with the cancellation error.
    fn record_failure(&self, job: &str, err: PipelineError) {
        let mut first = self.first_error.lock();
        if first.is_some() {
            debug!(pipeline = %self.id, job = %job, error = %err, "job stopped after pipeline failure");
            return;
        }

        if err.is_cancelled() {
            info!(pipeline = %self.id, job = %job, "pipeline cancelled");
        } else {
            warn!(pipeline = %self.id, job = %job, error = %err, "job failed, cancelling pipeline");
        }
        let reason = err.to_string();
        *first = Some(err);
        drop(first);
        self.token.cancel(reason);
    }

    /// Joins every job and settles the pipeline outcome.
    async fn supervise(self: Arc<Self>, handles: Vec<JoinHandle<()>>) -> PipelineResult<()> {
        for handle in handles {
            if let Err(join_error) = handle.await {
                self.record_failure(
                    "unknown",
                    PipelineError::Panicked {
                        job: "unknown".to_string(),
                        message: join_error.to_string(),
                    },
                );
            }
        }

        let first = self.first_error.lock().clone();
        let elapsed_ms = self.created_at.elapsed().as_secs_f64() * 1000.0;
        match first {
            None => {
                info!(pipeline = %self.id, elapsed_ms, "pipeline completed");
                Ok(())
            }
            Some(err) => {
                info!(pipeline = %self.id, elapsed_ms, error = %err, "pipeline stopped");
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobRole;
    use crate::errors::ErrorKind;
    use std::time::Duration;

    fn wiring_with(jobs: Vec<Job>) -> Wiring {
        let mut wiring = Wiring::new();
        wiring.extend(jobs);
        wiring
    }

    /// A job that parks until the pipeline is cancelled.
    fn parked(name: &str, token: &Arc<CancellationToken>) -> Job {
        let token = token.clone();
        Job::new(name, JobRole::Worker, async move {
            token.cancelled().await;
            Err(PipelineError::Cancelled)
        })
    }

    #[tokio::test]
    async fn test_all_jobs_succeed() {
        let pipeline = Pipeline::new(wiring_with(vec![Job::noop("a"), Job::noop("b")]));
        assert_eq!(pipeline.state(), PipelineState::Built);
        assert!(!pipeline.is_running());

        tokio_test::assert_ok!(pipeline.wait().await);
        assert_eq!(pipeline.state(), PipelineState::Completed);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_empty_pipeline_completes() {
        let pipeline = Pipeline::new(Wiring::new());
        tokio_test::assert_ok!(pipeline.wait().await);
        assert_eq!(pipeline.state(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_failure_wins_over_cancellation_echoes() {
        let mut wiring = Wiring::new();
        let token = wiring.token().clone();
        for i in 0..4 {
            wiring.push(parked(&format!("parked-{i}"), &token));
        }
        wiring.push(Job::new("failing", JobRole::Worker, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(PipelineError::stage("failing", "boom".into()))
        }));

        let pipeline = Pipeline::new(wiring);
        let err = pipeline.wait().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Stage);
        assert_eq!(err.origin(), Some("failing"));
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_external_cancel() {
        let mut wiring = Wiring::new();
        let token = wiring.token().clone();
        wiring.push(parked("parked", &token));

        let pipeline = Pipeline::new(wiring);
        pipeline.start();
        assert!(pipeline.is_running());
        assert_eq!(pipeline.state(), PipelineState::Running);

        pipeline.cancel();
        pipeline.cancel();

        let err = pipeline.wait().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(pipeline.state(), PipelineState::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let pipeline = Pipeline::new(wiring_with(vec![Job::noop("a")]));
        tokio_test::assert_ok!(pipeline.wait().await);

        pipeline.cancel();
        tokio_test::assert_ok!(pipeline.wait().await);
        assert_eq!(pipeline.state(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_wait_is_idempotent_and_runs_jobs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let job = Job::new("counted", JobRole::Feeder, async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::stage("counted", "once".into()))
        });

        let pipeline = Pipeline::new(wiring_with(vec![job]));
        let first = pipeline.wait().await.unwrap_err();
        let second = pipeline.wait().await.unwrap_err();

        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_wait_does_not_settle_outcome() {
        let job = Job::new("slow", JobRole::Worker, async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(PipelineError::stage("slow", "late failure".into()))
        });
        let pipeline = Pipeline::new(wiring_with(vec![job]));

        let abandoned = tokio::time::timeout(Duration::from_millis(20), pipeline.wait()).await;
        assert!(abandoned.is_err());
        assert!(pipeline.is_running());

        let err = pipeline.wait().await.unwrap_err();
        assert_eq!(err.origin(), Some("slow"));
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_wait_after_detached_start_blocks_until_done() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let job = Job::new("slow", JobRole::Worker, async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        let pipeline = Pipeline::new(wiring_with(vec![job]));
        pipeline.start();

        let waiter = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        waiter.abort();

        tokio_test::assert_ok!(pipeline.wait().await);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(pipeline.state(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_outcome() {
        let pipeline = Pipeline::new(wiring_with(vec![Job::noop("a")]));
        let other = pipeline.clone();

        let (a, b) = tokio::join!(pipeline.wait(), other.wait());
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_job_fails_pipeline() {
        let mut wiring = Wiring::new();
        let token = wiring.token().clone();
        wiring.push(parked("parked", &token));
        wiring.push(Job::new("explodes", JobRole::Worker, async {
            panic!("kaboom");
        }));

        let pipeline = Pipeline::new(wiring);
        let err = pipeline.wait().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let mut wiring = Wiring::new();
        let token = wiring.token().clone();
        wiring.push(parked("parked", &token));

        let pipeline = Pipeline::new(wiring);
        pipeline.cancel();

        assert!(pipeline.wait().await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }
}
