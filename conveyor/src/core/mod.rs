//! Core types shared by the builder and the runtime.
//!
//! This module contains:
//! - Jobs, the units of concurrent work a pipeline runs
//! - Filter chains evaluated before items advance
//! - Pipeline state and job role enums

mod filter;
mod job;
mod status;

pub use filter::{FilterChain, Predicate};
pub use job::Job;
pub use status::{JobRole, PipelineState};
