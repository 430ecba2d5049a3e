//! Fixed pool of write loops sharing one inbound channel.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use super::{ConnectGate, Delivery, Writer};
use crate::adapter::Sink;
use crate::stage::StageContext;
use crate::throttle::RetryConfig;
use crate::transaction::Transaction;

pub struct SinkPool {
    ctx: StageContext,
    adapter: Arc<dyn Sink>,
    retry: RetryConfig,
    workers: usize,
    input: mpsc::Receiver<Transaction>,
}

impl SinkPool {
    pub fn new(
        ctx: StageContext,
        adapter: Arc<dyn Sink>,
        retry: RetryConfig,
        workers: usize,
        input: mpsc::Receiver<Transaction>,
    ) -> Self {
        Self {
            ctx,
            adapter,
            retry,
            workers: workers.max(1),
            input,
        }
    }

    /// Run `workers` write loops until shutdown, input end, or the adapter
    /// closes. At most `workers` writes are in progress at any time.
    pub async fn run(self) {
        let input = Arc::new(Mutex::new(self.input));
        let gate = Arc::new(ConnectGate::new(&self.ctx, self.retry));
        let mut workers = JoinSet::new();

        for id in 0..self.workers {
            let mut writer =
                Writer::new(self.ctx.clone(), self.adapter.clone(), gate.clone(), self.retry);
            let input = input.clone();
            let gate = gate.clone();
            let ctx = self.ctx.clone();
            workers.spawn(async move {
                loop {
                    if gate.is_closed() {
                        break;
                    }
                    let txn = {
                        let mut rx = tokio::select! {
                            biased;
                            () = ctx.shutdown.cancelled() => break,
                            rx = input.lock() => rx,
                        };
                        tokio::select! {
                            biased;
                            () = ctx.shutdown.cancelled() => None,
                            t = rx.recv() => t,
                        }
                    };
                    let Some(txn) = txn else {
                        break;
                    };
                    if writer.deliver(txn).await == Delivery::Stop {
                        break;
                    }
                }
                tracing::debug!(stage = %ctx.name, worker = id, "Output worker stopped");
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(stage = %self.ctx.name, error = %err, "Output worker panicked");
            }
        }

        drop(input);
        Writer::close_adapter(&self.ctx, self.adapter.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tributary_types::ack::AckResult;
    use tributary_types::error::AdapterError;
    use tributary_types::message::Batch;

    use super::*;
    use crate::test_support::{fast_retry, RecordingSink};

    fn spawn(
        sink: RecordingSink,
        workers: usize,
    ) -> (StageContext, mpsc::Sender<Transaction>, tokio::task::JoinHandle<()>) {
        let ctx = StageContext::new("output");
        let (tx, rx) = mpsc::channel(64);
        let stage = SinkPool::new(ctx.clone(), Arc::new(sink), fast_retry(), workers, rx);
        (ctx, tx, tokio::spawn(stage.run()))
    }

    #[tokio::test]
    async fn test_never_exceeds_worker_count() {
        let sink = RecordingSink::new().with_delay(Duration::from_millis(10));
        let max = sink.max_in_flight();
        let written = sink.written();
        let (_ctx, tx, task) = spawn(sink, 3);

        let mut outcomes = Vec::new();
        for i in 0..12 {
            let (txn, outcome) = Transaction::new(Batch::quick([format!("m{i}")]));
            tx.send(txn).await.unwrap();
            outcomes.push(outcome);
        }
        for outcome in outcomes {
            assert!(outcome.wait().await.is_ok());
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(written.lock().unwrap().len(), 12);
        let peak = max.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2, "pool never overlapped writes");
    }

    #[tokio::test]
    async fn test_connect_is_serialised_across_workers() {
        let sink = RecordingSink::new().with_connect_results(vec![
            Err(AdapterError::Failed(tributary_types::error::ConnectorError::connection(
                "REFUSED", "down",
            ))),
            Err(AdapterError::Failed(tributary_types::error::ConnectorError::connection(
                "REFUSED", "down",
            ))),
        ]);
        let connects = sink.connects();
        let (ctx, tx, task) = spawn(sink, 4);

        let mut outcomes = Vec::new();
        for i in 0..4 {
            let (txn, outcome) = Transaction::new(Batch::quick([format!("m{i}")]));
            tx.send(txn).await.unwrap();
            outcomes.push(outcome);
        }
        for outcome in outcomes {
            assert_eq!(outcome.wait().await, AckResult::Ok);
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(connects.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.metrics.snapshot().connection_failed, 2);
        assert_eq!(ctx.metrics.snapshot().connection_up, 1);
    }
}
