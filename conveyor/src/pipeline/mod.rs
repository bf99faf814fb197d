//! Pipeline building and execution.
//!
//! This module provides:
//! - Source adapters over generators, queues, streams and iterators
//! - Buffered and hand-off queue edges
//! - Stage worker pools with exactly-once output close
//! - The typed chain builder
//! - The runtime handle with fail-fast error aggregation
//! - Stage and pipeline configuration

mod builder;
mod config;
mod queue;
mod runtime;
mod sink;
mod source;
mod stage;


pub use builder::Builder;
pub use config::{PipelineConfig, StageConfig};
pub use queue::Outlet;
pub use runtime::Pipeline;
pub use source::Generator;
pub use stage::Transform;
