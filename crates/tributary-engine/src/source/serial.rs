//! Serial input loop: read, emit, wait for the outcome, acknowledge, repeat.

use tokio::sync::mpsc;
use tributary_types::ack::AckResult;
use tributary_types::error::AdapterError;

use crate::adapter::Source;
use crate::connection::{ConnectStep, ConnectionState};
use crate::stage::StageContext;
use crate::throttle::{RetryConfig, Throttle};
use crate::transaction::Transaction;

pub struct SerialSource {
    ctx: StageContext,
    adapter: Box<dyn Source>,
    retry: RetryConfig,
    /// Taken when shutdown fires so downstream sees the input end.
    out: Option<mpsc::Sender<Transaction>>,
}

impl SerialSource {
    pub fn new(
        ctx: StageContext,
        adapter: Box<dyn Source>,
        retry: RetryConfig,
        out: mpsc::Sender<Transaction>,
    ) -> Self {
        Self {
            ctx,
            adapter,
            retry,
            out: Some(out),
        }
    }

    /// Run until shutdown, the adapter closes, or downstream goes away.
    ///
    /// A batch already emitted when shutdown fires is still waited on and
    /// acknowledged before the adapter is closed. The output channel closes
    /// as soon as shutdown fires, so a downstream batcher can flush it.
    pub async fn run(mut self) {
        let mut throttle = Throttle::new(self.retry, self.ctx.shutdown.clone());
        let mut conn = ConnectionState::new(self.ctx.name.clone(), self.ctx.metrics.clone());
        let mut connected = false;

        loop {
            if !connected {
                if !self.connect(&mut conn, &mut throttle).await {
                    break;
                }
                connected = true;
            }

            let read = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => break,
                r = self.adapter.read() => r,
            };
            let batch = match read {
                Ok(batch) if !batch.is_empty() => batch,
                Ok(_) => {
                    if throttle.retry().await {
                        continue;
                    }
                    break;
                }
                Err(AdapterError::NotConnected) => {
                    conn.lost();
                    connected = false;
                    continue;
                }
                Err(AdapterError::Timeout) => continue,
                Err(AdapterError::Closed) => {
                    tracing::info!(stage = %self.ctx.name, "Input closed");
                    break;
                }
                Err(err) => {
                    self.ctx.metrics.record_error();
                    tracing::warn!(stage = %self.ctx.name, error = %err, "Failed to read message");
                    if throttle.retry().await {
                        continue;
                    }
                    break;
                }
            };
            throttle.reset();
            self.ctx.metrics.record_received(&batch);

            let parts = batch.len();
            let (txn, outcome) = Transaction::new(batch);
            let emitted = match &self.out {
                Some(out) => tokio::select! {
                    biased;
                    () = self.ctx.shutdown.cancelled() => false,
                    r = out.send(txn) => r.is_ok(),
                },
                None => false,
            };
            if emitted {
                self.ctx.metrics.record_sent(parts);
            }

            let mut wait = std::pin::pin!(outcome.wait());
            let result = loop {
                tokio::select! {
                    biased;
                    r = &mut wait => break r,
                    () = self.ctx.shutdown.cancelled(), if self.out.is_some() => {
                        self.out = None;
                    }
                }
            };
            self.acknowledge(result).await;
            if !emitted {
                break;
            }
        }

        if let Err(err) = self.adapter.close().await {
            tracing::warn!(stage = %self.ctx.name, error = %err, "Failed to close input");
        }
        self.ctx.metrics.set_disconnected();
    }

    async fn connect(&mut self, conn: &mut ConnectionState, throttle: &mut Throttle) -> bool {
        loop {
            let result = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => return false,
                r = self.adapter.connect() => r,
            };
            match conn.on_connect(result, throttle).await {
                ConnectStep::Up => return true,
                ConnectStep::Retry => {}
                ConnectStep::Stop => return false,
            }
        }
    }

    async fn acknowledge(&mut self, result: AckResult) {
        self.ctx.metrics.record_ack(&result);
        if !result.is_ok() {
            tracing::debug!(stage = %self.ctx.name, result = ?result, "Message rejected downstream");
        }
        if let Err(err) = self.adapter.acknowledge(result).await {
            self.ctx.metrics.record_error();
            tracing::warn!(stage = %self.ctx.name, error = %err, "Failed to acknowledge message");
        }
    }
}
