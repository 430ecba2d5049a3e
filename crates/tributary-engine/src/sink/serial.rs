//! Single write loop: the next transaction is taken only after the current
//! one is resolved.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ConnectGate, Delivery, Writer};
use crate::adapter::Sink;
use crate::stage::StageContext;
use crate::throttle::RetryConfig;
use crate::transaction::Transaction;

pub struct SerialSink {
    ctx: StageContext,
    adapter: Arc<dyn Sink>,
    retry: RetryConfig,
    input: mpsc::Receiver<Transaction>,
}

impl SerialSink {
    pub fn new(
        ctx: StageContext,
        adapter: Arc<dyn Sink>,
        retry: RetryConfig,
        input: mpsc::Receiver<Transaction>,
    ) -> Self {
        Self {
            ctx,
            adapter,
            retry,
            input,
        }
    }

    /// Run until shutdown, input end, or the adapter closes. Transactions
    /// still queued when the loop stops are dropped, which their origins
    /// observe as failures.
    pub async fn run(mut self) {
        let gate = Arc::new(ConnectGate::new(&self.ctx, self.retry));
        let mut writer = Writer::new(self.ctx.clone(), self.adapter.clone(), gate, self.retry);

        loop {
            let txn = tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => break,
                t = self.input.recv() => match t {
                    Some(t) => t,
                    None => break,
                },
            };
            if writer.deliver(txn).await == Delivery::Stop {
                break;
            }
        }

        drop(self.input);
        Writer::close_adapter(&self.ctx, self.adapter.as_ref()).await;
    }
}
