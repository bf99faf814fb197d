//! Typed chain builder.
//!
//! A [`Builder`] only records configuration. Nothing is allocated or spawned
//! until the chain is finalized with [`Builder::build`], [`Builder::emit`],
//! [`Builder::consume`] or [`Builder::forward_to`]; finalizing walks the chain
//! from the last stage back to the source and wires every queue exactly once.

use super::config::{PipelineConfig, StageConfig};
use super::queue::Outlet;
use super::runtime::{Pipeline, Wiring};
use super::sink::Sink;
use super::source::{Generator, Source};
use super::stage::{boxed_transform, Stage, Transform};
use crate::core::FilterChain;
use crate::errors::{BoxError, ConfigError, PipelineResult};
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use futures::FutureExt;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::warn;

/// Name given to the drainer job of a sink. Stages cannot use it.
pub(crate) const SINK_STAGE: &str = "sink";

/// Something that can be materialized into the queue feeding the next stage.
trait Link<T>: Send {
    fn materialize(self: Box<Self>, wiring: &mut Wiring) -> PipelineResult<Outlet<T>>;
}

/// One link of a typed chain, consuming `In` and producing `Out`.
///
/// The first builder of a chain has `In = ()` and owns the source; every
/// builder appended with [`Builder::connect`], [`Builder::then`] or
/// [`Builder::map`] owns a transform.
///
/// ```rust,ignore
/// let (pipeline, output) = Builder::from_generator(count_to(5))
///     .then(|x| async move { Ok::<_, BoxError>(x * 2) })
///     .workers(4)
///     .emit()?;
/// ```
#[must_use = "a builder does nothing until it is finalized"]
pub struct Builder<In, Out> {
    name: Option<String>,
    prev: Option<Box<dyn Link<In>>>,
    source: Option<Source<Out>>,
    transform: Option<Transform<In, Out>>,
    filters: FilterChain<In>,
    output_filters: FilterChain<Out>,
    workers: usize,
    buffer_size: usize,
}

impl<T: Send + 'static> Builder<(), T> {
    /// Creates a first builder without a source.
    ///
    /// Finalizing fails with [`ConfigError::MissingSource`] unless a source is
    /// attached with [`Builder::source`] or [`Builder::source_receiver`].
    pub fn new() -> Self {
        Self::with_source(None)
    }

    /// Creates a chain fed by a generator.
    pub fn from_generator<G>(generator: G) -> Self
    where
        G: Generator<T> + 'static,
    {
        Self::new().source(generator)
    }

    /// Creates a chain fed by a queue created by the caller.
    ///
    /// If the requested buffer is larger than the queue's capacity, items are
    /// copied into a larger queue by a forwarding job.
    pub fn from_receiver(rx: mpsc::Receiver<T>) -> Self {
        Self::new().source_receiver(rx)
    }

    /// Creates a chain fed by a fallible stream. The stream may be empty.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
    {
        Self::with_source(Some(Source::Stream(stream.boxed())))
    }

    /// Creates a chain fed by the items of an iterator. The iterator may be empty.
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(items).map(Ok))
    }

    /// Sets (or replaces) the generator feeding the chain.
    pub fn source<G>(mut self, generator: G) -> Self
    where
        G: Generator<T> + 'static,
    {
        self.source = Some(Source::Generator(Box::new(generator)));
        self
    }

    /// Sets (or replaces) the queue feeding the chain.
    pub fn source_receiver(mut self, rx: mpsc::Receiver<T>) -> Self {
        self.source = Some(Source::Queue(rx));
        self
    }

    fn with_source(source: Option<Source<T>>) -> Self {
        Self {
            name: None,
            prev: None,
            source,
            transform: None,
            filters: FilterChain::new(),
            output_filters: FilterChain::new(),
            workers: 1,
            buffer_size: 0,
        }
    }
}

impl<T: Send + 'static> Default for Builder<(), T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> Builder<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Sets the number of concurrent workers for this stage (default 1).
    ///
    /// Zero is rejected when the chain is finalized.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the capacity of this stage's output queue (default 0).
    pub fn buffer(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Names the stage. Names appear in errors, logs and metrics.
    ///
    /// The name `"sink"` is reserved and rejected when the chain is finalized.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an input filter, evaluated before the transform.
    ///
    /// Items the filter rejects are dropped silently. The first builder of a
    /// chain has no transform; input filters on it are rejected when the
    /// chain is finalized.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&In) -> bool + Send + Sync + 'static,
    {
        self.filters.push(predicate);
        self
    }

    /// Appends a whole chain of input filters.
    pub fn filters(mut self, chain: FilterChain<In>) -> Self {
        self.filters = self.filters.concat(chain);
        self
    }

    /// Adds an output filter, evaluated on each transform result.
    ///
    /// On the first builder of a chain it is evaluated on every source item.
    pub fn filter_output<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Out) -> bool + Send + Sync + 'static,
    {
        self.output_filters.push(predicate);
        self
    }

    /// Applies worker count and buffer size from `config`.
    pub fn with_config(self, config: &StageConfig) -> Self {
        self.workers(config.workers).buffer(config.buffer_size)
    }

    /// Applies the settings `config` holds for this stage's name, or its
    /// defaults when the stage is unnamed or has no entry.
    pub fn configure(self, config: &PipelineConfig) -> Self {
        let stage = self
            .name
            .as_deref()
            .map_or(config.defaults, |name| config.stage(name));
        self.with_config(&stage)
    }

    /// Sets the async transform of this stage.
    pub fn transform<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, BoxError>> + Send + 'static,
    {
        self.transform = Some(boxed_transform(transform));
        self
    }

    /// Appends a stage without a transform. The transform must be set with
    /// [`Builder::transform`] before the chain is finalized.
    pub fn connect<Next: Send + 'static>(self) -> Builder<Out, Next> {
        Builder {
            name: None,
            prev: Some(Box::new(self)),
            source: None,
            transform: None,
            filters: FilterChain::new(),
            output_filters: FilterChain::new(),
            workers: 1,
            buffer_size: 0,
        }
    }

    /// Appends a stage running an async transform.
    pub fn then<Next, F, Fut>(self, transform: F) -> Builder<Out, Next>
    where
        Next: Send + 'static,
        F: Fn(Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Next, BoxError>> + Send + 'static,
    {
        self.connect().transform(transform)
    }

    /// Appends a stage running an infallible synchronous transform.
    pub fn map<Next, F>(self, transform: F) -> Builder<Out, Next>
    where
        Next: Send + 'static,
        F: Fn(Out) -> Next + Send + Sync + 'static,
    {
        self.then(move |item| future::ready(Ok::<_, BoxError>(transform(item))))
    }

    /// Finalizes the chain without starting it.
    ///
    /// Returns the pipeline handle and the final output queue. The caller
    /// must drain the queue, or the last stage will block once it fills up.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a stage lacks its source or transform,
    /// asks for zero workers or uses a reserved name, or if the first stage
    /// has input filters.
    pub fn build(self) -> PipelineResult<(Pipeline, Outlet<Out>)> {
        let (wiring, output) = self.wire()?;
        Ok((Pipeline::new(wiring), output))
    }

    /// Finalizes and starts the chain.
    ///
    /// # Errors
    ///
    /// Same as [`Builder::build`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn emit(self) -> PipelineResult<(Pipeline, Outlet<Out>)> {
        let (pipeline, output) = self.build()?;
        pipeline.start();
        Ok((pipeline, output))
    }

    /// Finalizes and starts the chain, handing every output item to `consumer`.
    ///
    /// A consumer error fails the pipeline like a transform error.
    ///
    /// # Errors
    ///
    /// Same as [`Builder::build`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn consume<F, Fut>(self, mut consumer: F) -> PipelineResult<Pipeline>
    where
        F: FnMut(Out) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.sink(Sink::Consume(Box::new(move |item| consumer(item).boxed())))
    }

    /// Finalizes and starts the chain, forwarding every output item into `tx`.
    ///
    /// The pipeline's clone of `tx` is dropped when the chain finishes, so the
    /// caller's receiver closes once every other sender is gone.
    ///
    /// # Errors
    ///
    /// Same as [`Builder::build`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn forward_to(self, tx: mpsc::Sender<Out>) -> PipelineResult<Pipeline> {
        self.sink(Sink::Forward(tx))
    }

    fn sink(self, sink: Sink<Out>) -> PipelineResult<Pipeline> {
        let (mut wiring, output) = self.wire()?;
        let metrics = wiring.register(SINK_STAGE);
        let job = sink.into_job(SINK_STAGE, output, wiring.token().clone(), metrics);
        wiring.push(job);

        let pipeline = Pipeline::new(wiring);
        pipeline.start();
        Ok(pipeline)
    }

    fn wire(self) -> PipelineResult<(Wiring, Outlet<Out>)> {
        let mut wiring = Wiring::new();
        let output = Box::new(self).materialize(&mut wiring)?;
        Ok((wiring, output))
    }
}

impl<In, Out> Link<Out> for Builder<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn materialize(self: Box<Self>, wiring: &mut Wiring) -> PipelineResult<Outlet<Out>> {
        let Self {
            name,
            prev,
            source,
            transform,
            filters,
            output_filters,
            workers,
            buffer_size,
        } = *self;

        let Some(prev) = prev else {
            let name = name.unwrap_or_else(|| "source".to_string());
            let source = source.ok_or_else(|| ConfigError::MissingSource {
                stage: name.clone(),
            })?;
            check_name(&name)?;
            if !filters.is_empty() {
                return Err(ConfigError::SourceInputFilter { stage: name }.into());
            }

            let metrics = wiring.register(&name);
            let token = wiring.token().clone();
            let (output, job) = source.open(&name, buffer_size, output_filters, token, metrics);
            wiring.push(job);
            return Ok(output);
        };

        let input = prev.materialize(wiring)?;
        let name = name.unwrap_or_else(|| format!("stage-{}", wiring.stage_count()));
        check_name(&name)?;
        if source.is_some() {
            warn!(stage = %name, "source on a non-initial stage is ignored");
        }
        let transform = transform.ok_or_else(|| ConfigError::MissingTransform {
            stage: name.clone(),
        })?;
        if workers == 0 {
            return Err(ConfigError::InvalidWorkerCount {
                stage: name,
                count: workers,
            }
            .into());
        }

        let metrics = wiring.register(&name);
        let stage = Stage {
            name,
            transform,
            filters,
            output_filters,
            workers,
            buffer_size,
        };
        let (output, jobs) = stage.into_jobs(input, wiring.token(), &metrics);
        wiring.extend(jobs);
        Ok(output)
    }
}

fn check_name(stage: &str) -> Result<(), ConfigError> {
    if stage == SINK_STAGE {
        return Err(ConfigError::ReservedName {
            stage: stage.to_string(),
        });
    }
    Ok(())
}

impl<In, Out> std::fmt::Debug for Builder<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("name", &self.name)
            .field("initial", &self.prev.is_none())
            .field("has_source", &self.source.is_some())
            .field("has_transform", &self.transform.is_some())
            .field("filters", &self.filters.len())
            .field("output_filters", &self.output_filters.len())
            .field("workers", &self.workers)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}
