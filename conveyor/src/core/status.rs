//! Pipeline state and job role enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRole {
    /// Pulls items from a generator, stream or iterator into the first queue.
    Feeder,
    /// Copies items from a caller-owned queue into a larger one.
    Forwarder,
    /// One worker of a stage's pool.
    Worker,
    /// Drains the last queue into a sink.
    Drainer,
    /// Does nothing; stands in for a source that needs no feeder.
    Noop,
}

impl fmt::Display for JobRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feeder => write!(f, "feeder"),
            Self::Forwarder => write!(f, "forwarder"),
            Self::Worker => write!(f, "worker"),
            Self::Drainer => write!(f, "drainer"),
            Self::Noop => write!(f, "noop"),
        }
    }
}

/// The lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Jobs are constructed but not yet dispatched.
    #[default]
    Built,
    /// Jobs are running.
    Running,
    /// Every job finished without error.
    Completed,
    /// A job failed and the rest were cancelled.
    Failed,
    /// The pipeline was cancelled before it completed.
    Canceled,
}

impl PipelineState {
    /// Returns true if the pipeline has stopped for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built => write!(f, "built"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}
