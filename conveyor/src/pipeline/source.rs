//! Source adapters: the entry points that feed the first queue of a chain.

use crate::cancellation::CancellationToken;
use crate::core::{FilterChain, Job, JobRole};
use crate::errors::{BoxError, PipelineError, PipelineResult};
use crate::observability::StageMetrics;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::queue::{self, Outlet, QueueSender};

/// A pull-based producer of items.
///
/// Each call returns the next item and whether more items follow. The feeder
/// forwards the returned item and stops after the first `false`. A generator
/// that cannot produce even a single item must return an error rather than a
/// placeholder item with `false`; the engine forwards exactly what it is given.
///
/// Any `FnMut() -> Result<(T, bool), BoxError> + Send` closure is a generator.
#[async_trait]
pub trait Generator<T>: Send {
    /// Produces the next item and whether more items follow.
    async fn generate(&mut self) -> Result<(T, bool), BoxError>;
}

#[async_trait]
impl<T, F> Generator<T> for F
where
    T: Send,
    F: FnMut() -> Result<(T, bool), BoxError> + Send,
{
    async fn generate(&mut self) -> Result<(T, bool), BoxError> {
        (self)()
    }
}

/// Where the first queue of a chain gets its items.
pub(crate) enum Source<T> {
    /// Repeatedly invoke a generator.
    Generator(Box<dyn Generator<T>>),
    /// Read a queue created by the caller.
    Queue(mpsc::Receiver<T>),
    /// Poll a stream to exhaustion.
    Stream(BoxStream<'static, Result<T, BoxError>>),
}

impl<T: Send + 'static> Source<T> {
    /// Allocates the source's output queue and the job that fills it.
    ///
    /// Items rejected by `filters` are counted and never enter the queue. A
    /// caller's queue is only reused untouched when it is at least as large
    /// as requested and nothing has to be filtered.
    pub(crate) fn open(
        self,
        stage: &str,
        buffer_size: usize,
        filters: FilterChain<T>,
        token: Arc<CancellationToken>,
        metrics: Arc<StageMetrics>,
    ) -> (Outlet<T>, Job) {
        let feeder = Feeder {
            stage: stage.to_string(),
            filters,
            token,
            metrics,
        };

        match self {
            Self::Generator(generator) => {
                let (tx, rx) = queue::channel(buffer_size);
                let job = Job::new(stage, JobRole::Feeder, feeder.run_generator(generator, tx));
                (rx, job)
            }
            Self::Stream(stream) => {
                let (tx, rx) = queue::channel(buffer_size);
                let job = Job::new(stage, JobRole::Feeder, feeder.run_stream(stream, tx));
                (rx, job)
            }
            Self::Queue(rx) if buffer_size > rx.max_capacity() || !feeder.filters.is_empty() => {
                debug!(
                    stage = %stage,
                    native = rx.max_capacity(),
                    requested = buffer_size,
                    filters = feeder.filters.len(),
                    "forwarding source queue"
                );
                let (tx, forwarded) = queue::channel(buffer_size);
                let job = Job::new(stage, JobRole::Forwarder, feeder.run_forwarder(rx, tx));
                (forwarded, job)
            }
            Self::Queue(rx) => (rx.into(), Job::noop(stage)),
        }
    }
}

/// State shared by the three feeder loops.
struct Feeder<T> {
    stage: String,
    filters: FilterChain<T>,
    token: Arc<CancellationToken>,
    metrics: Arc<StageMetrics>,
}

impl<T: Send> Feeder<T> {
    /// Filters one item and writes it if it passes.
    async fn send(&self, tx: &QueueSender<T>, item: T) -> PipelineResult<()> {
        self.metrics.record_receive();
        if !self.filters.accept(&item) {
            self.metrics.record_filter();
            return Ok(());
        }
        tx.send(item, &self.token, &self.stage).await?;
        self.metrics.record_emit();
        Ok(())
    }

    async fn run_generator(
        self,
        mut generator: Box<dyn Generator<T>>,
        tx: QueueSender<T>,
    ) -> PipelineResult<()> {
        loop {
            let generated = tokio::select! {
                biased;
                () = self.token.cancelled() => return Err(PipelineError::Cancelled),
                generated = generator.generate() => generated,
            };
            let (item, more) = generated.map_err(|e| PipelineError::stage(&self.stage, e))?;
            self.send(&tx, item).await?;
            if !more {
                debug!(stage = %self.stage, "generator exhausted");
                return Ok(());
            }
        }
    }

    async fn run_stream(
        self,
        mut stream: BoxStream<'static, Result<T, BoxError>>,
        tx: QueueSender<T>,
    ) -> PipelineResult<()> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => return Err(PipelineError::Cancelled),
                next = stream.next() => next,
            };
            let Some(item) = next else {
                debug!(stage = %self.stage, "stream exhausted");
                return Ok(());
            };
            let item = item.map_err(|e| PipelineError::stage(&self.stage, e))?;
            self.send(&tx, item).await?;
        }
    }

    async fn run_forwarder(
        self,
        mut rx: mpsc::Receiver<T>,
        tx: QueueSender<T>,
    ) -> PipelineResult<()> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => return Err(PipelineError::Cancelled),
                next = rx.recv() => next,
            };
            let Some(item) = next else {
                debug!(stage = %self.stage, "source queue closed");
                return Ok(());
            };
            self.send(&tx, item).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{count_to, drain};
    use pretty_assertions::assert_eq;

    fn open<T: Send + 'static>(
        source: Source<T>,
        buffer_size: usize,
    ) -> (Outlet<T>, Job, Arc<CancellationToken>) {
        let token = Arc::new(CancellationToken::new());
        let metrics = Arc::new(StageMetrics::new("source"));
        let filters = FilterChain::new();
        let (rx, job) = source.open("source", buffer_size, filters, token.clone(), metrics);
        (rx, job, token)
    }

    #[tokio::test]
    async fn test_generator_source_emits_every_item() {
        let (rx, job, _) = open(Source::Generator(Box::new(count_to(10))), 0);
        assert_eq!(job.role(), JobRole::Feeder);

        let feeder = tokio::spawn(job.run());
        let items = drain(rx).await;

        assert_eq!(items, (0..10).collect::<Vec<_>>());
        tokio_test::assert_ok!(feeder.await.unwrap());
    }

    #[tokio::test]
    async fn test_generator_single_final_item() {
        let generator = || Ok::<_, BoxError>(("only", false));
        let (rx, job, _) = open(Source::Generator(Box::new(generator)), 0);

        let feeder = tokio::spawn(job.run());
        assert_eq!(drain(rx).await, vec!["only"]);
        tokio_test::assert_ok!(feeder.await.unwrap());
    }

    #[tokio::test]
    async fn test_generator_error_fails_feeder() {
        let mut calls = 0;
        let generator = move || {
            calls += 1;
            if calls == 3 {
                Err::<(i32, bool), BoxError>("generator broke".into())
            } else {
                Ok((calls, true))
            }
        };
        let (rx, job, _) = open(Source::Generator(Box::new(generator)), 4);

        let result = job.run().await;
        assert_eq!(drain(rx).await, vec![1, 2]);
        let err = tokio_test::assert_err!(result);
        assert_eq!(err.origin(), Some("source"));
        assert!(err.to_string().contains("generator broke"));
    }

    #[tokio::test]
    async fn test_generator_failing_before_first_item() {
        let generator = || Err::<(u8, bool), BoxError>("nothing to read".into());
        let (rx, job, _) = open(Source::Generator(Box::new(generator)), 0);

        let err = tokio_test::assert_err!(job.run().await);
        assert_eq!(err.kind(), crate::errors::ErrorKind::Stage);
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_feeder_stops_on_cancellation() {
        let endless = || Ok::<_, BoxError>((1u8, true));
        let (_rx, job, token) = open(Source::Generator(Box::new(endless)), 0);

        token.cancel("test");
        let err = tokio_test::assert_err!(job.run().await);
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_stream_source_allows_empty_sequence() {
        let stream = futures::stream::iter(Vec::<Result<u8, BoxError>>::new()).boxed();
        let (rx, job, _) = open(Source::Stream(stream), 0);

        tokio_test::assert_ok!(job.run().await);
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_source_reused_when_buffer_fits() {
        let (tx, rx) = mpsc::channel(8);
        let (rx, job, _) = open(Source::Queue(rx), 4);
        assert_eq!(job.role(), JobRole::Noop);
        assert_eq!(rx.buffer_size(), 8);

        tx.send(5).await.unwrap();
        drop(tx);
        tokio_test::assert_ok!(job.run().await);
        assert_eq!(drain(rx).await, vec![5]);
    }

    #[tokio::test]
    async fn test_queue_source_widened_when_buffer_larger() {
        let (tx, rx) = mpsc::channel(1);
        let (rx, job, _) = open(Source::Queue(rx), 16);
        assert_eq!(job.role(), JobRole::Forwarder);
        assert_eq!(rx.buffer_size(), 16);

        let forwarder = tokio::spawn(job.run());
        let producer = tokio::spawn(async move {
            for i in 0..5 {
                tx.send(i).await.unwrap();
            }
        });

        assert_eq!(drain(rx).await, vec![0, 1, 2, 3, 4]);
        producer.await.unwrap();
        tokio_test::assert_ok!(forwarder.await.unwrap());
    }

    #[tokio::test]
    async fn test_forwarder_observes_cancellation() {
        let (_tx, rx) = mpsc::channel::<u8>(1);
        let (_rx, job, token) = open(Source::Queue(rx), 4);

        let forwarder = tokio::spawn(job.run());
        token.cancel("stop");

        let err = tokio_test::assert_err!(forwarder.await.unwrap());
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_output_filters_apply_to_source_items() {
        let token = Arc::new(CancellationToken::new());
        let metrics = Arc::new(StageMetrics::new("source"));
        let filters = FilterChain::new().with(|x: &usize| *x % 3 == 0);
        let (rx, job) = Source::Generator(Box::new(count_to(10))).open(
            "source",
            0,
            filters,
            token,
            metrics.clone(),
        );

        let feeder = tokio::spawn(job.run());
        assert_eq!(drain(rx).await, vec![0, 3, 6, 9]);
        tokio_test::assert_ok!(feeder.await.unwrap());
        assert_eq!(metrics.received(), 10);
        assert_eq!(metrics.filtered(), 6);
        assert_eq!(metrics.emitted(), 4);
    }

    #[tokio::test]
    async fn test_filtered_queue_source_is_forwarded() {
        let (tx, rx) = mpsc::channel(8);
        let token = Arc::new(CancellationToken::new());
        let metrics = Arc::new(StageMetrics::new("source"));
        let filters = FilterChain::new().with(|x: &i32| *x > 0);
        let (rx, job) = Source::Queue(rx).open("source", 0, filters, token, metrics);
        assert_eq!(job.role(), JobRole::Forwarder);

        for i in [-1, 4, 0, 5] {
            tx.send(i).await.unwrap();
        }
        drop(tx);
        let forwarder = tokio::spawn(job.run());
        assert_eq!(drain(rx).await, vec![4, 5]);
        tokio_test::assert_ok!(forwarder.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_generator() {
        struct Stalled;

        #[async_trait]
        impl Generator<u8> for Stalled {
            async fn generate(&mut self) -> Result<(u8, bool), BoxError> {
                futures::future::pending().await
            }
        }

        let (_rx, job, token) = open(Source::Generator(Box::new(Stalled)), 0);
        let feeder = tokio::spawn(job.run());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        token.cancel("stop");

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), feeder)
            .await
            .expect("feeder should stop")
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }
}
