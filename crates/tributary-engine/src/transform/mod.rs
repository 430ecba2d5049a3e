//! Transform chain stage.
//!
//! Each inbound transaction runs through every step in order. The origin's
//! obligation either moves with the result (same shape), resolves at once
//! (nothing left, or a step failed), or is joined across derived
//! transactions when a step split or reshaped the batch.

pub mod builtin;

use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tributary_types::ack::{AckResult, BatchError};
use tributary_types::error::ConnectorError;
use tributary_types::message::Batch;
use tributary_types::metric::StageKind;

use crate::stage::{StageContext, StageHandle};
use crate::transaction::{AckHandle, AckReceiver, Transaction};

/// One processing step.
///
/// Returning no batches drops the input; returning several splits it.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// An error aborts the chain and fails the origin transaction.
    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ConnectorError>;
}

/// Ordered list of steps.
#[derive(Clone, Default)]
pub struct Chain {
    steps: Arc<Vec<Box<dyn Transform>>>,
}

impl Chain {
    pub fn new(steps: Vec<Box<dyn Transform>>) -> Self {
        Self {
            steps: Arc::new(steps),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step over every batch produced by the step before it.
    /// Empty batches are discarded between steps.
    ///
    /// # Errors
    ///
    /// Returns the first step error, with the step's name in its details.
    pub fn apply(&self, batch: Batch) -> Result<Vec<Batch>, ConnectorError> {
        let mut current = vec![batch];
        for step in self.steps.iter() {
            let mut next = Vec::with_capacity(current.len());
            for batch in current {
                let produced = step.process(batch).map_err(|e| {
                    let details = serde_json::json!({ "step": step.name() });
                    e.with_details(details)
                })?;
                next.extend(produced.into_iter().filter(|b| !b.is_empty()));
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        Ok(current)
    }
}

/// Spawn the transform stage with `workers` loops sharing one input.
pub fn spawn_transform(
    ctx: &StageContext,
    chain: Chain,
    workers: usize,
    input: mpsc::Receiver<Transaction>,
    out: mpsc::Sender<Transaction>,
) -> StageHandle {
    let stage = TransformStage::new(ctx.clone(), chain, workers, input, out);
    StageHandle::spawn(StageKind::Transform, ctx, stage.run())
}

pub struct TransformStage {
    ctx: StageContext,
    chain: Chain,
    workers: usize,
    input: mpsc::Receiver<Transaction>,
    out: mpsc::Sender<Transaction>,
}

impl TransformStage {
    pub fn new(
        ctx: StageContext,
        chain: Chain,
        workers: usize,
        input: mpsc::Receiver<Transaction>,
        out: mpsc::Sender<Transaction>,
    ) -> Self {
        Self {
            ctx,
            chain,
            workers: workers.max(1),
            input,
            out,
        }
    }

    pub async fn run(self) {
        let input = Arc::new(Mutex::new(self.input));
        let mut workers = JoinSet::new();

        for _ in 0..self.workers {
            let input = input.clone();
            let mut worker = Worker {
                ctx: self.ctx.clone(),
                chain: self.chain.clone(),
                out: self.out.clone(),
                joins: JoinSet::new(),
            };
            workers.spawn(async move {
                loop {
                    let txn = {
                        let mut rx = tokio::select! {
                            biased;
                            () = worker.ctx.shutdown.cancelled() => break,
                            rx = input.lock() => rx,
                        };
                        tokio::select! {
                            biased;
                            () = worker.ctx.shutdown.cancelled() => None,
                            t = rx.recv() => t,
                        }
                    };
                    let Some(txn) = txn else {
                        break;
                    };
                    if !worker.handle(txn).await {
                        break;
                    }
                }
                drop(worker.out);
                while worker.joins.join_next().await.is_some() {}
            });
        }
        drop(self.out);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(stage = %self.ctx.name, error = %err, "Transform worker panicked");
            }
        }
    }
}

struct Worker {
    ctx: StageContext,
    chain: Chain,
    out: mpsc::Sender<Transaction>,
    joins: JoinSet<()>,
}

impl Worker {
    /// Process one transaction. Returns `false` once downstream is gone or
    /// shutdown interrupted forwarding.
    async fn handle(&mut self, txn: Transaction) -> bool {
        while self.joins.try_join_next().is_some() {}
        self.ctx.metrics.record_received(&txn.payload);

        let (batch, ack) = txn.into_parts();
        let origin_len = batch.len();
        let derived = match self.chain.apply(batch) {
            Ok(derived) => derived,
            Err(err) => {
                self.ctx.metrics.record_error();
                tracing::warn!(stage = %self.ctx.name, error = %err, "Transform failed");
                let result = AckResult::Failed(err);
                self.ctx.metrics.record_ack(&result);
                ack.resolve(result);
                return true;
            }
        };

        match derived.len() {
            0 => {
                self.ctx.metrics.record_ack(&AckResult::Ok);
                ack.resolve(AckResult::Ok);
                true
            }
            1 if derived[0].len() == origin_len => {
                let mut derived = derived;
                let batch = derived.remove(0);
                self.forward(Transaction::from_parts(batch, ack)).await
            }
            _ => self.fan_out(derived, origin_len, ack).await,
        }
    }

    async fn fan_out(&mut self, derived: Vec<Batch>, origin_len: usize, ack: AckHandle) -> bool {
        let (txns, joined) = split_join(derived, origin_len);
        let metrics = self.ctx.metrics.clone();
        self.joins.spawn(async move {
            let result = joined.await;
            metrics.record_ack(&result);
            ack.resolve(result);
        });

        for txn in txns {
            if !self.forward(txn).await {
                return false;
            }
        }
        true
    }

    async fn forward(&mut self, txn: Transaction) -> bool {
        let parts = txn.len();
        let sent = tokio::select! {
            biased;
            () = self.ctx.shutdown.cancelled() => false,
            r = self.out.send(txn) => r.is_ok(),
        };
        if sent {
            self.ctx.metrics.record_sent(parts);
        }
        sent
    }
}

/// Wrap the batches derived from one origin of `origin_len` parts into
/// transactions, plus a future yielding the origin's combined outcome.
///
/// A single batch of the origin's length passes its outcome through as is.
/// No batches at all resolve `Ok`.
pub(crate) fn split_join(
    mut derived: Vec<Batch>,
    origin_len: usize,
) -> (Vec<Transaction>, BoxFuture<'static, AckResult>) {
    if derived.len() == 1 && derived[0].len() == origin_len {
        let (txn, outcome) = Transaction::new(derived.remove(0));
        return (vec![txn], outcome.wait().boxed());
    }

    let total: usize = derived.iter().map(Batch::len).sum();
    let positional = total == origin_len;
    let mut pending = Vec::with_capacity(derived.len());
    let mut txns = Vec::with_capacity(derived.len());
    let mut offset = 0;
    for batch in derived {
        let len = batch.len();
        let (txn, outcome) = Transaction::new(batch);
        pending.push((offset, len, outcome));
        txns.push(txn);
        offset += len;
    }
    (txns, join_outcomes(pending, origin_len, positional).boxed())
}

/// Combine the outcomes of derived transactions into one for the origin.
///
/// When the derived batches cover the origin part for part, failures are
/// mapped back by offset. Otherwise the first failure fails the origin.
async fn join_outcomes(
    pending: Vec<(usize, usize, AckReceiver)>,
    origin_len: usize,
    positional: bool,
) -> AckResult {
    let ranges: Vec<(usize, usize)> = pending.iter().map(|(o, l, _)| (*o, *l)).collect();
    let results = join_all(pending.into_iter().map(|(_, _, outcome)| outcome.wait())).await;

    let Some(first) = results.iter().find(|r| !r.is_ok()) else {
        return AckResult::Ok;
    };
    let cause = match first {
        AckResult::Failed(e) => e.clone(),
        AckResult::Partial(be) => be.cause().clone(),
        AckResult::Ok => return AckResult::Ok,
    };
    if !positional {
        return AckResult::Failed(cause);
    }

    let mut be = BatchError::with_len(origin_len, cause);
    for ((offset, len), result) in ranges.into_iter().zip(results) {
        match result {
            AckResult::Ok => {}
            AckResult::Failed(e) => {
                for index in offset..offset + len {
                    be.mark_failed(index, e.clone());
                }
            }
            AckResult::Partial(part) => {
                for (index, e) in part.iter_failed() {
                    be.mark_failed(offset + index, e.clone());
                }
            }
        }
    }
    AckResult::from(be)
}
