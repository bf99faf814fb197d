//! Per-stage item counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one stage, shared by all of its workers.
#[derive(Debug, Default)]
pub struct StageMetrics {
    /// Stage name.
    stage: String,
    /// Items taken from the input queue.
    received: AtomicU64,
    /// Items dropped by an input or output filter.
    filtered: AtomicU64,
    /// Items written to the output queue (or consumed, for a sink).
    emitted: AtomicU64,
}

impl StageMetrics {
    /// Creates zeroed counters for `stage`.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            ..Self::default()
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Records an item taken from the input queue.
    pub fn record_receive(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an item dropped by a filter.
    pub fn record_filter(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an item handed downstream.
    pub fn record_emit(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of received items.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Returns the number of filtered items.
    #[must_use]
    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    /// Returns the number of emitted items.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Takes a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> StageMetricsSnapshot {
        StageMetricsSnapshot {
            stage: self.stage.clone(),
            received: self.received(),
            filtered: self.filtered(),
            emitted: self.emitted(),
        }
    }
}

/// A copy of a stage's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetricsSnapshot {
    /// Stage name.
    pub stage: String,
    /// Items taken from the input queue.
    pub received: u64,
    /// Items dropped by a filter.
    pub filtered: u64,
    /// Items handed downstream.
    pub emitted: u64,
}

impl StageMetricsSnapshot {
    /// Returns the fraction of received items that were filtered, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn filter_rate(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            (self.filtered as f64 / self.received as f64) * 100.0
        }
    }

    /// Converts the snapshot to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "stage": self.stage,
            "received": self.received,
            "filtered": self.filtered,
            "emitted": self.emitted,
            "filter_rate_percent": (self.filter_rate() * 100.0).round() / 100.0
        })
    }
}
