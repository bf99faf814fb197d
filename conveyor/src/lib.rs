//! # Conveyor
//!
//! Typed, concurrent stage pipelines for Tokio.
//!
//! Conveyor composes a source, any number of transform stages and an optional
//! sink into a running concurrent computation, without the caller having to
//! manage tasks, queues or shutdown by hand:
//!
//! - **Typed chains**: each stage's input type is the previous stage's output type
//! - **Worker pools**: every stage runs N workers over one shared input queue
//! - **Backpressure**: stages are connected by bounded queues
//! - **Fail-fast**: the first failure cancels every stage and is reported by `wait`
//! - **Lazy wiring**: nothing is allocated or spawned until the chain is finalized
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conveyor::prelude::*;
//!
//! let (pipeline, mut output) = Builder::from_iter(0..100)
//!     .map(|x| x * 2)
//!     .filter(|x| x % 3 == 0)
//!     .then(|x| async move { Ok::<_, BoxError>(x.to_string()) })
//!     .workers(4)
//!     .buffer(16)
//!     .emit()?;
//!
//! while let Some(item) = output.recv().await {
//!     println!("{item}");
//! }
//! pipeline.wait().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{FilterChain, Job, JobRole, PipelineState, Predicate};
    pub use crate::errors::{
        BoxError, ConfigError, ErrorKind, PipelineError, PipelineResult, SharedError,
    };
    pub use crate::observability::{init_tracing, LogConfig, StageMetricsSnapshot};
    pub use crate::pipeline::{
        Builder, Generator, Outlet, Pipeline, PipelineConfig, StageConfig, Transform,
    };
}
