//! Shared Tributary message, acknowledgment and error model types.
//!
//! This crate has no runtime dependencies so adapters can depend on it
//! without pulling in the engine.

pub mod ack;
pub mod error;
pub mod message;
pub mod metric;

pub use ack::{AckResult, BatchError};
pub use error::{AdapterError, ConnectorError, ErrorCategory};
pub use message::{Batch, Part};
pub use metric::{StageKind, StageSnapshot};
