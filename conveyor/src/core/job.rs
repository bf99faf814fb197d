//! A unit of long-running pipeline work.

use super::JobRole;
use crate::errors::PipelineResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tracing::Instrument;

/// One independently schedulable piece of work: a feeder, forwarder, stage
/// worker or sink drainer.
///
/// A job does nothing until [`Job::run`] is awaited. It finishes with `Ok(())`
/// on normal termination or with the error that stopped it.
pub struct Job {
    name: String,
    role: JobRole,
    future: BoxFuture<'static, PipelineResult<()>>,
}

impl Job {
    /// Creates a job from a future.
    pub fn new<F>(name: impl Into<String>, role: JobRole, future: F) -> Self
    where
        F: Future<Output = PipelineResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            role,
            future: future.boxed(),
        }
    }

    /// Creates a job that completes immediately.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, JobRole::Noop, async { Ok(()) })
    }

    /// Returns the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the job role.
    #[must_use]
    pub const fn role(&self) -> JobRole {
        self.role
    }

    /// Runs the job to completion inside its own span.
    pub async fn run(self) -> PipelineResult<()> {
        let span = tracing::debug_span!("job", job = %self.name, role = %self.role);
        self.future.instrument(span).await
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;

    #[tokio::test]
    async fn test_noop_job_succeeds() {
        let job = Job::noop("source");
        assert_eq!(job.name(), "source");
        assert_eq!(job.role(), JobRole::Noop);
        tokio_test::assert_ok!(job.run().await);
    }

    #[tokio::test]
    async fn test_job_reports_failure() {
        let job = Job::new("stage-1/worker-0", JobRole::Worker, async {
            Err(PipelineError::stage("stage-1", "boom".into()))
        });

        let err = tokio_test::assert_err!(job.run().await);
        assert_eq!(err.origin(), Some("stage-1"));
    }

    #[test]
    fn test_job_is_lazy() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let job = Job::new("lazy", JobRole::Feeder, async move {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(format!("{job:?}").contains("lazy"));
    }
}
