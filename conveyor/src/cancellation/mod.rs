//! Cooperative cancellation shared by every job of a pipeline.

mod token;

pub use token::CancellationToken;
