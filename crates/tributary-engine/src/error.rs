//! Pipeline error model.

use std::time::Duration;

use tributary_types::error::ConnectorError;

/// Error surfaced at the engine boundary.
///
/// `Connector` wraps a typed `ConnectorError` raised while building or
/// running a stage. `Infrastructure` wraps opaque host-side failures
/// (configuration, registry lookups, task panics). `ShutdownTimeout` means a
/// stage did not finish closing in time; the caller may wait again.
#[derive(Debug)]
pub enum PipelineError {
    /// Typed adapter or stage error.
    Connector(ConnectorError),
    /// Configuration, registry or task failure.
    Infrastructure(anyhow::Error),
    /// A stage did not report closed before the deadline.
    ShutdownTimeout { stage: String, timeout: Duration },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connector(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
            Self::ShutdownTimeout { stage, timeout } => {
                write!(f, "stage '{stage}' did not close within {timeout:?}")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<ConnectorError> for PipelineError {
    fn from(e: ConnectorError) -> Self {
        Self::Connector(e)
    }
}

impl PipelineError {
    /// Returns `true` for a shutdown timeout; waiting again may succeed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ShutdownTimeout { .. })
    }

    /// Returns the typed connector error if this is a `Connector` variant.
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Connector(e) => Some(e),
            _ => None,
        }
    }
}
