//! Structured error model for adapter and pipeline operations.
//!
//! [`ConnectorError`] carries a classification, a stable code and a message.
//! It is cheap to clone so one failure can be fanned out to every message of
//! a batch. [`AdapterError`] is what adapters return from `connect`, `read`
//! and `write`; its variants drive the reconnect state machine of the
//! source and sink wrappers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ack::BatchError;

/// Broad classification of a connector error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid adapter or pipeline configuration.
    Config,
    /// Connection could not be established or was lost.
    Connection,
    /// Invalid or corrupt message content.
    Data,
    /// Delivery to a downstream system was rejected.
    Delivery,
    /// The pipeline is shutting down and the message was not delivered.
    Shutdown,
    /// Internal engine or adapter error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Connection => "connection",
            Self::Data => "data",
            Self::Delivery => "delivery",
            Self::Shutdown => "shutdown",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error from an adapter or a pipeline stage.
///
/// Construct via category-specific factory methods (e.g., [`ConnectorError::data`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ConnectorError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ConnectorError {
    fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Configuration error.
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, code, message)
    }

    /// Connection establishment or loss.
    #[must_use]
    pub fn connection(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Connection, code, message)
    }

    /// Message content could not be processed.
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, code, message)
    }

    /// Downstream system refused the message.
    #[must_use]
    pub fn delivery(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Delivery, code, message)
    }

    /// Message abandoned because its stage is shutting down.
    #[must_use]
    pub fn shutdown(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Shutdown, code, message)
    }

    /// Internal error.
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Error returned by adapter operations.
///
/// `NotConnected`, `Timeout` and `Closed` are control signals interpreted by
/// the wrappers; the remaining variants describe a failed operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdapterError {
    /// The connection was lost; the wrapper reconnects before retrying.
    #[error("not connected")]
    NotConnected,
    /// Nothing arrived in time; the wrapper retries immediately.
    #[error("operation timed out")]
    Timeout,
    /// The adapter has shut down permanently.
    #[error("adapter closed")]
    Closed,
    /// Some messages of a written batch failed.
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// The operation failed as a whole.
    #[error(transparent)]
    Failed(#[from] ConnectorError),
}

impl AdapterError {
    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Timeout => "timeout",
            Self::Closed => "closed",
            Self::Batch(_) => "batch",
            Self::Failed(_) => "failed",
        }
    }
}
