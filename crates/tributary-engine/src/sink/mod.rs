//! Output stage: takes transactions, writes them, and resolves each one.

pub mod pool;
pub mod serial;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tributary_types::ack::AckResult;
use tributary_types::error::{AdapterError, ConnectorError};
use tributary_types::metric::StageKind;

use crate::adapter::Sink;
use crate::connection::{ConnectStep, ConnectionState};
use crate::stage::{StageContext, StageHandle};
use crate::throttle::{RetryConfig, Throttle};
use crate::transaction::Transaction;

pub use pool::SinkPool;
pub use serial::SerialSink;

/// Spawn the output stage: a single loop for `max_in_flight <= 1`,
/// otherwise a pool of that many workers.
pub fn spawn_sink(
    ctx: &StageContext,
    adapter: Arc<dyn Sink>,
    retry: RetryConfig,
    max_in_flight: usize,
    input: mpsc::Receiver<Transaction>,
) -> StageHandle {
    if max_in_flight <= 1 {
        let stage = SerialSink::new(ctx.clone(), adapter, retry, input);
        StageHandle::spawn(StageKind::Output, ctx, stage.run())
    } else {
        let stage = SinkPool::new(ctx.clone(), adapter, retry, max_in_flight, input);
        StageHandle::spawn(StageKind::Output, ctx, stage.run())
    }
}

/// Connection state shared by every writer of one output.
///
/// Reconnects are serialised through `state` so only one writer calls
/// `connect` at a time; the others wait and then see `connected`.
pub(crate) struct ConnectGate {
    connected: AtomicBool,
    closed: AtomicBool,
    state: Mutex<(Throttle, ConnectionState)>,
}

impl ConnectGate {
    pub(crate) fn new(ctx: &StageContext, retry: RetryConfig) -> Self {
        Self {
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: Mutex::new((
                Throttle::new(retry, ctx.shutdown.clone()),
                ConnectionState::new(ctx.name.clone(), ctx.metrics.clone()),
            )),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Outcome of handing one transaction to the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Take the next transaction.
    Continue,
    /// Shutdown fired or the adapter closed; stop this loop.
    Stop,
}

/// Write loop body shared by the serial and pool variants.
pub(crate) struct Writer {
    ctx: StageContext,
    adapter: Arc<dyn Sink>,
    gate: Arc<ConnectGate>,
    throttle: Throttle,
}

impl Writer {
    pub(crate) fn new(
        ctx: StageContext,
        adapter: Arc<dyn Sink>,
        gate: Arc<ConnectGate>,
        retry: RetryConfig,
    ) -> Self {
        let throttle = Throttle::new(retry, ctx.shutdown.clone());
        Self {
            ctx,
            adapter,
            gate,
            throttle,
        }
    }

    /// Write one transaction and resolve it exactly once.
    pub(crate) async fn deliver(&mut self, txn: Transaction) -> Delivery {
        self.ctx.metrics.record_received(&txn.payload);
        let (batch, ack) = txn.into_parts();

        loop {
            if !self.ensure_connected().await {
                let result = AckResult::Failed(self.stop_error());
                self.ctx.metrics.record_ack(&result);
                ack.resolve(result);
                return Delivery::Stop;
            }

            let written = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => {
                    let result = AckResult::Failed(ConnectorError::shutdown(
                        "WRITE_INTERRUPTED",
                        "write interrupted by shutdown",
                    ));
                    self.ctx.metrics.record_ack(&result);
                    ack.resolve(result);
                    return Delivery::Stop;
                }
                r = self.adapter.write(&batch) => r,
            };

            let (result, next) = match written {
                Ok(()) => {
                    self.throttle.reset();
                    self.ctx.metrics.record_sent(batch.len());
                    (AckResult::Ok, Delivery::Continue)
                }
                Err(AdapterError::NotConnected) => {
                    if self.gate.connected.swap(false, Ordering::AcqRel) {
                        tracing::warn!(stage = %self.ctx.name, "Connection lost, reconnecting");
                        self.ctx.metrics.record_connection_lost();
                    }
                    continue;
                }
                Err(AdapterError::Closed) => {
                    self.gate.closed.store(true, Ordering::Release);
                    tracing::info!(stage = %self.ctx.name, "Output closed");
                    (AckResult::Failed(self.stop_error()), Delivery::Stop)
                }
                Err(AdapterError::Batch(be)) => {
                    self.ctx.metrics.record_error();
                    tracing::warn!(
                        stage = %self.ctx.name,
                        failed = be.failed_count(),
                        parts = batch.len(),
                        error = %be.cause(),
                        "Batch partially delivered"
                    );
                    (AckResult::from(be), Delivery::Continue)
                }
                Err(err) => {
                    self.ctx.metrics.record_error();
                    tracing::warn!(stage = %self.ctx.name, error = %err, "Failed to send message");
                    let cause = match err {
                        AdapterError::Failed(e) => e,
                        other => ConnectorError::delivery("WRITE_FAILED", other.to_string()),
                    };
                    self.ctx.metrics.record_ack(&AckResult::Failed(cause.clone()));
                    ack.resolve(AckResult::Failed(cause));
                    return if self.throttle.retry().await {
                        Delivery::Continue
                    } else {
                        Delivery::Stop
                    };
                }
            };
            self.ctx.metrics.record_ack(&result);
            ack.resolve(result);
            return next;
        }
    }

    async fn ensure_connected(&self) -> bool {
        if self.gate.is_closed() {
            return false;
        }
        if self.gate.connected.load(Ordering::Acquire) {
            return true;
        }
        let mut guard = tokio::select! {
            biased;
            () = self.ctx.shutdown.cancelled() => return false,
            g = self.gate.state.lock() => g,
        };
        loop {
            if self.gate.is_closed() {
                return false;
            }
            if self.gate.connected.load(Ordering::Acquire) {
                return true;
            }
            let result = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => return false,
                r = self.adapter.connect() => r,
            };
            let (throttle, conn) = &mut *guard;
            match conn.on_connect(result, throttle).await {
                ConnectStep::Up => {
                    self.gate.connected.store(true, Ordering::Release);
                    return true;
                }
                ConnectStep::Retry => {}
                ConnectStep::Stop => {
                    if !self.ctx.shutdown.is_cancelled() {
                        self.gate.closed.store(true, Ordering::Release);
                    }
                    return false;
                }
            }
        }
    }

    fn stop_error(&self) -> ConnectorError {
        if self.gate.is_closed() {
            ConnectorError::connection("OUTPUT_CLOSED", "output adapter closed")
        } else {
            ConnectorError::shutdown("SHUTTING_DOWN", "output shutting down")
        }
    }

    pub(crate) async fn close_adapter(ctx: &StageContext, adapter: &dyn Sink) {
        if let Err(err) = adapter.close().await {
            tracing::warn!(stage = %ctx.name, error = %err, "Failed to close output");
        }
        ctx.metrics.set_disconnected();
    }
}
