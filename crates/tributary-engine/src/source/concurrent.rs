//! Input loop with several batches outstanding at once.
//!
//! Reads happen on one task, so emission order equals read order. Each
//! emitted transaction gets its own task that waits for the outcome and
//! invokes the batch's [`AckFn`]. A semaphore bounds how many are pending.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tributary_types::ack::AckResult;
use tributary_types::error::AdapterError;

use crate::adapter::{AckFn, AckSource};
use crate::connection::{ConnectStep, ConnectionState};
use crate::stage::StageContext;
use crate::throttle::{RetryConfig, Throttle};
use crate::transaction::Transaction;

pub struct ConcurrentSource {
    ctx: StageContext,
    adapter: Box<dyn AckSource>,
    retry: RetryConfig,
    max_in_flight: usize,
    out: mpsc::Sender<Transaction>,
}

impl ConcurrentSource {
    pub fn new(
        ctx: StageContext,
        adapter: Box<dyn AckSource>,
        retry: RetryConfig,
        max_in_flight: usize,
        out: mpsc::Sender<Transaction>,
    ) -> Self {
        Self {
            ctx,
            adapter,
            retry,
            max_in_flight: max_in_flight.max(1),
            out,
        }
    }

    pub async fn run(mut self) {
        let mut throttle = Throttle::new(self.retry, self.ctx.shutdown.clone());
        let mut conn = ConnectionState::new(self.ctx.name.clone(), self.ctx.metrics.clone());
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut pending: JoinSet<()> = JoinSet::new();
        let mut connected = false;

        loop {
            while pending.try_join_next().is_some() {}

            if !connected {
                if !self.connect(&mut conn, &mut throttle).await {
                    break;
                }
                connected = true;
            }

            let permit = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => break,
                p = permits.clone().acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let read = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => break,
                r = self.adapter.read() => r,
            };
            let (batch, ack) = match read {
                Ok((batch, ack)) if !batch.is_empty() => (batch, ack),
                Ok((_, ack)) => {
                    Self::invoke_ack(&self.ctx, ack, AckResult::Ok).await;
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
            let emitted = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => false,
                r = self.out.send(txn) => r.is_ok(),
            };
            if emitted {
                self.ctx.metrics.record_sent(parts);
            }

            let metrics = self.ctx.metrics.clone();
            let stage = self.ctx.name.clone();
            pending.spawn(async move {
                let result = outcome.wait().await;
                metrics.record_ack(&result);
                if let Err(err) = ack(result).await {
                    metrics.record_error();
                    tracing::warn!(stage = %stage, error = %err, "Failed to acknowledge message");
                }
                drop(permit);
            });
            if !emitted {
                break;
            }
        }

        // Closing the output lets a downstream batcher flush what it holds.
        drop(self.out);
        let outstanding = pending.len();
        if outstanding > 0 {
            tracing::debug!(stage = %self.ctx.name, outstanding, "Draining acknowledgments");
        }
        while pending.join_next().await.is_some() {}

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

    async fn invoke_ack(ctx: &StageContext, ack: AckFn, result: AckResult) {
        if let Err(err) = ack(result).await {
            ctx.metrics.record_error();
            tracing::warn!(stage = %ctx.name, error = %err, "Failed to acknowledge message");
        }
    }
}
