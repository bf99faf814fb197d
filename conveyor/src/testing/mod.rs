//! Testing utilities for conveyor pipelines.
//!
//! This module provides:
//! - Generators and collectors for driving chains
//! - Mock transforms and consumers that fail or record on demand

mod fixtures;
mod mocks;

pub use fixtures::{count_to, drain, drain_sorted};
pub use mocks::{failing_at, Recorder};
