//! Error types for the conveyor engine.
//!
//! Errors are grouped into three families: configuration errors raised while
//! a chain is finalized, the cancellation error returned by jobs that unwound
//! because the pipeline was aborted, and stage failures returned by caller
//! supplied functions. Every failure carries an [`ErrorKind`] so callers can
//! branch on the family without string matching.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by caller supplied generators, transforms and consumers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A stage failure shared between every observer of a pipeline outcome.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Result alias for engine operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// The family a [`PipelineError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The chain was misconfigured and never started.
    Config,
    /// The job unwound because the pipeline was cancelled.
    Cancelled,
    /// A generator, forwarder, transform or consumer failed.
    Stage,
    /// A stage lost the consumer of its output queue.
    Disconnected,
    /// A job panicked.
    Panicked,
}

/// Errors detected while finalizing a chain or loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The first builder of the chain has no source.
    #[error("first stage '{stage}' does not have a source")]
    MissingSource {
        /// Name of the offending stage.
        stage: String,
    },

    /// A non-initial builder has no transform.
    #[error("stage '{stage}' does not have a transform")]
    MissingTransform {
        /// Name of the offending stage.
        stage: String,
    },

    /// A stage was configured with zero workers.
    #[error("stage '{stage}' requested {count} workers; at least one is required")]
    InvalidWorkerCount {
        /// Name of the offending stage.
        stage: String,
        /// The requested worker count.
        count: usize,
    },

    /// The first builder of the chain has input filters. Its input is `()`,
    /// so they could only ever drop everything; use output filters instead.
    #[error("first stage '{stage}' has input filters; filter its output instead")]
    SourceInputFilter {
        /// Name of the offending stage.
        stage: String,
    },

    /// A stage was given a name the engine keeps for itself.
    #[error("stage name '{stage}' is reserved")]
    ReservedName {
        /// The rejected name.
        stage: String,
    },

    /// A configuration file could not be read or parsed.
    #[error("failed to load pipeline config '{path}': {message}")]
    Load {
        /// Path (or `<inline>`) of the configuration source.
        path: String,
        /// Underlying failure.
        message: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

/// The error surfaced by a pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The chain could not be finalized.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The pipeline was cancelled before it completed.
    #[error("pipeline cancelled")]
    Cancelled,

    /// A caller supplied function failed.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// The caller's error.
        #[source]
        source: SharedError,
    },

    /// The receiving side of a stage's output queue was dropped.
    #[error("stage '{stage}' lost the consumer of its output")]
    Disconnected {
        /// Name of the stage that could not deliver.
        stage: String,
    },

    /// A job panicked while running.
    #[error("job '{job}' panicked: {message}")]
    Panicked {
        /// Name of the job.
        job: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl PipelineError {
    /// Wraps a caller error as a failure of `stage`.
    #[must_use]
    pub fn stage(stage: impl Into<String>, source: BoxError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Arc::from(source),
        }
    }

    /// Creates a disconnected error for `stage`.
    #[must_use]
    pub fn disconnected(stage: impl Into<String>) -> Self {
        Self::Disconnected {
            stage: stage.into(),
        }
    }

    /// Returns the family of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Stage { .. } => ErrorKind::Stage,
            Self::Disconnected { .. } => ErrorKind::Disconnected,
            Self::Panicked { .. } => ErrorKind::Panicked,
        }
    }

    /// Returns true if this is the cancellation error.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the name of the stage or job the error is attributed to.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        match self {
            Self::Config(
                ConfigError::MissingSource { stage }
                | ConfigError::MissingTransform { stage }
                | ConfigError::InvalidWorkerCount { stage, .. }
                | ConfigError::SourceInputFilter { stage }
                | ConfigError::ReservedName { stage },
            )
            | Self::Stage { stage, .. }
            | Self::Disconnected { stage } => Some(stage.as_str()),
            Self::Panicked { job, .. } => Some(job.as_str()),
            Self::Config(_) | Self::Cancelled => None,
        }
    }

    /// Recovers the caller's own error from a stage failure.
    #[must_use]
    pub fn downcast_source<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            Self::Stage { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}
