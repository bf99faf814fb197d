//! Observability utilities.

mod logging;
mod metrics;

pub use logging::{init_tracing, LogConfig};
pub use metrics::{StageMetrics, StageMetricsSnapshot};
