//! Connection bookkeeping shared by the source and sink wrappers.

use std::sync::Arc;

use tributary_types::error::AdapterError;

use crate::metrics::StageMetrics;
use crate::throttle::{should_log_attempt, Throttle};

/// Outcome of one connect attempt, as seen by a wrapper's reconnect loop.
pub(crate) enum ConnectStep {
    /// Connected; proceed.
    Up,
    /// Waited out the backoff; try again.
    Retry,
    /// Shutdown fired or the adapter closed for good.
    Stop,
}

/// Tracks reconnect attempts and logs failures at decreasing frequency.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    stage: Arc<str>,
    metrics: Arc<StageMetrics>,
    failures: u32,
}

impl ConnectionState {
    pub(crate) fn new(stage: Arc<str>, metrics: Arc<StageMetrics>) -> Self {
        Self {
            stage,
            metrics,
            failures: 0,
        }
    }

    /// Fold one connect result into the state, backing off on failure.
    pub(crate) async fn on_connect(
        &mut self,
        result: Result<(), AdapterError>,
        throttle: &mut Throttle,
    ) -> ConnectStep {
        match result {
            Ok(()) => {
                tracing::info!(
                    stage = %self.stage,
                    attempts = self.failures + 1,
                    "Connected"
                );
                self.failures = 0;
                throttle.reset();
                self.metrics.record_connection_up();
                ConnectStep::Up
            }
            Err(AdapterError::Closed) => {
                tracing::info!(stage = %self.stage, "Adapter closed while connecting");
                ConnectStep::Stop
            }
            Err(err) => {
                self.failures = self.failures.saturating_add(1);
                self.metrics.record_connection_failed();
                if should_log_attempt(self.failures) {
                    tracing::warn!(
                        stage = %self.stage,
                        attempt = self.failures,
                        error = %err,
                        "Failed to connect, retrying"
                    );
                }
                if throttle.retry().await {
                    ConnectStep::Retry
                } else {
                    ConnectStep::Stop
                }
            }
        }
    }

    /// Record a lost connection reported by `read` or `write`.
    pub(crate) fn lost(&self) {
        tracing::warn!(stage = %self.stage, "Connection lost, reconnecting");
        self.metrics.record_connection_lost();
    }
}
