//! Transactional streaming core for Tributary pipelines.
//!
//! Data moves input -> transforms -> batcher -> output as [`Transaction`]s;
//! each transaction's resolution travels back to whoever produced it.

pub mod adapter;
pub mod batch;
pub mod config;
pub(crate) mod connection;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod predicate;
pub mod registry;
pub mod result;
pub mod sink;
pub mod source;
pub mod stage;
pub mod throttle;
pub mod transaction;
pub mod transform;

#[cfg(test)]
mod test_support;

// Re-export public API for convenience
pub use error::PipelineError;
pub use orchestrator::{check_pipeline, run_pipeline};
pub use pipeline::{build_pipeline, Pipeline};
pub use registry::Registry;
pub use result::{CheckResult, PipelineResult};
pub use transaction::Transaction;
