//! Batcher stage: merges inbound transactions and fans the outcome back out.

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tributary_types::ack::AckResult;

use super::policy::{BatchPolicy, Origin, Pending};
use crate::stage::StageContext;
use crate::transaction::Transaction;
use crate::transform::{split_join, Chain};

pub struct Batcher {
    ctx: StageContext,
    processors: Chain,
    pending: Pending,
    input: mpsc::Receiver<Transaction>,
    out: mpsc::Sender<Transaction>,
    fan_outs: JoinSet<()>,
}

impl Batcher {
    pub fn new(
        ctx: StageContext,
        policy: BatchPolicy,
        input: mpsc::Receiver<Transaction>,
        out: mpsc::Sender<Transaction>,
    ) -> Self {
        Self {
            ctx,
            processors: policy.processors.clone(),
            pending: Pending::new(policy),
            input,
            out,
            fan_outs: JoinSet::new(),
        }
    }

    /// Run until shutdown or input end, then flush whatever is pending and
    /// wait for every released batch to be resolved.
    pub async fn run(mut self) {
        loop {
            while self.fan_outs.try_join_next().is_some() {}

            let deadline = self.pending.deadline();
            tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => break,
                () = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() =>
                {
                    tracing::trace!(stage = %self.ctx.name, parts = self.pending.len(), "Period elapsed");
                    self.release().await;
                }
                t = self.input.recv() => match t {
                    Some(txn) => {
                        self.ctx.metrics.record_received(&txn.payload);
                        if txn.is_empty() {
                            txn.resolve(AckResult::Ok);
                            continue;
                        }
                        self.pending.add(txn);
                        if self.pending.is_ready() {
                            self.release().await;
                        }
                    }
                    None => break,
                },
            }
        }

        if !self.pending.is_empty() {
            tracing::debug!(stage = %self.ctx.name, parts = self.pending.len(), "Flushing pending batch");
            self.release().await;
        }
        drop(self.out);
        while self.fan_outs.join_next().await.is_some() {}
    }

    /// Run the processors over the pending batch, emit what they produce and
    /// spawn the fan-out resolver.
    async fn release(&mut self) {
        let Some((batch, origins)) = self.pending.take() else {
            return;
        };
        let parts = batch.len();
        let derived = if self.processors.is_empty() {
            vec![batch]
        } else {
            match self.processors.apply(batch) {
                Ok(derived) => derived,
                Err(err) => {
                    self.ctx.metrics.record_error();
                    tracing::warn!(stage = %self.ctx.name, parts, error = %err, "Batch processors failed");
                    let result = AckResult::Failed(err);
                    self.ctx.metrics.record_ack(&result);
                    fan_out(&result, origins);
                    return;
                }
            }
        };
        let (txns, joined) = split_join(derived, parts);

        let metrics = self.ctx.metrics.clone();
        self.fan_outs.spawn(async move {
            let result = joined.await;
            metrics.record_ack(&result);
            fan_out(&result, origins);
        });

        for txn in txns {
            let len = txn.len();
            if self.out.send(txn).await.is_ok() {
                self.ctx.metrics.record_sent(len);
            } else {
                tracing::warn!(stage = %self.ctx.name, parts = len, "Downstream closed, batch not delivered");
            }
        }
    }
}

/// Resolve every origin with its share of `result`.
fn fan_out(result: &AckResult, origins: Vec<Origin>) {
    for origin in origins {
        origin.ack.resolve(result.slice(origin.start, origin.len));
    }
}
