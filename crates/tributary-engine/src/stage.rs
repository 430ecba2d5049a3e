//! Stage lifecycle: spawning, two-phase shutdown and metrics access.
//!
//! Every running stage is a tokio task paired with two tokens. `shutdown` is
//! the request: the task watches it and stops taking new work. `closed` is
//! the report: it fires when the task has finished, including on panic, via
//! a drop guard held for the task's whole lifetime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tributary_types::metric::{StageKind, StageSnapshot};

use crate::error::PipelineError;
use crate::metrics::StageMetrics;

/// Shared state handed to a stage's task.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub name: Arc<str>,
    pub shutdown: CancellationToken,
    pub metrics: Arc<StageMetrics>,
}

impl StageContext {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            shutdown: CancellationToken::new(),
            metrics: Arc::new(StageMetrics::new()),
        }
    }
}

/// Handle to a running stage.
#[derive(Debug)]
pub struct StageHandle {
    name: Arc<str>,
    kind: StageKind,
    shutdown: CancellationToken,
    closed: CancellationToken,
    metrics: Arc<StageMetrics>,
}

impl StageHandle {
    /// Spawn `body` on the current runtime.
    pub fn spawn<F>(kind: StageKind, ctx: &StageContext, body: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let closed = CancellationToken::new();
        let guard = closed.clone().drop_guard();
        let name = ctx.name.clone();
        tokio::spawn(async move {
            let _closed_on_exit = guard;
            body.await;
            tracing::debug!(stage = %name, "Stage closed");
        });
        Self {
            name: ctx.name.clone(),
            kind,
            shutdown: ctx.shutdown.clone(),
            closed,
            metrics: ctx.metrics.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Request shutdown. Returns immediately.
    pub fn close_async(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the stage has finished.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShutdownTimeout`] if the stage is still running
    /// after `timeout`. The stage keeps running; the wait may be repeated.
    pub async fn wait_for_close(&self, timeout: Duration) -> Result<(), PipelineError> {
        tokio::time::timeout(timeout, self.closed.cancelled())
            .await
            .map_err(|_| PipelineError::ShutdownTimeout {
                stage: self.name.to_string(),
                timeout,
            })
    }

    /// Wait until the stage has finished, without a deadline.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn connected(&self) -> bool {
        self.metrics.is_connected()
    }

    pub fn metrics(&self) -> StageSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_two_phase_close() {
        let ctx = StageContext::new("test");
        let shutdown = ctx.shutdown.clone();
        let handle = StageHandle::spawn(StageKind::Transform, &ctx, async move {
            shutdown.cancelled().await;
        });
        assert!(!handle.is_closed());
        handle.close_async();
        handle
            .wait_for_close(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_close_times_out_and_can_be_repeated() {
        let ctx = StageContext::new("stuck");
        let release = CancellationToken::new();
        let release_inner = release.clone();
        let handle = StageHandle::spawn(StageKind::Output, &ctx, async move {
            release_inner.cancelled().await;
        });
        handle.close_async();

        let err = handle
            .wait_for_close(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("stuck"));

        release.cancel();
        handle
            .wait_for_close(Duration::from_millis(50))
            .await
            .unwrap();
    }
}
