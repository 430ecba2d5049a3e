//! Transactions: a batch paired with a single-use acknowledgment obligation.
//!
//! The obligation is the sending half of a oneshot channel. Resolving
//! consumes it, so a transaction is resolved at most once by construction.
//! Dropping it unresolved is observed by the waiting side as a failure.

use tokio::sync::oneshot;
use tributary_types::ack::AckResult;
use tributary_types::error::ConnectorError;
use tributary_types::message::Batch;

/// Resolve obligation for one transaction.
#[derive(Debug)]
pub struct AckHandle {
    tx: oneshot::Sender<AckResult>,
}

impl AckHandle {
    /// Deliver the outcome. A receiver that has gone away is ignored.
    pub fn resolve(self, result: AckResult) {
        let _ = self.tx.send(result.normalize());
    }

    /// Whether the waiting side has stopped listening.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Waiting side of a transaction's obligation.
#[derive(Debug)]
pub struct AckReceiver {
    rx: oneshot::Receiver<AckResult>,
}

impl AckReceiver {
    /// Wait for the outcome. A dropped obligation resolves as a failure.
    pub async fn wait(self) -> AckResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => AckResult::Failed(ConnectorError::internal(
                "ACK_DROPPED",
                "transaction dropped before resolution",
            )),
        }
    }
}

/// Create a linked obligation/receiver pair.
pub fn ack_pair() -> (AckHandle, AckReceiver) {
    let (tx, rx) = oneshot::channel();
    (AckHandle { tx }, AckReceiver { rx })
}

/// A batch in flight together with its obligation.
#[derive(Debug)]
pub struct Transaction {
    pub payload: Batch,
    ack: AckHandle,
}

impl Transaction {
    /// New transaction and the receiver its origin waits on.
    pub fn new(payload: Batch) -> (Self, AckReceiver) {
        let (ack, rx) = ack_pair();
        (Self { payload, ack }, rx)
    }

    /// Reassemble a transaction around an existing obligation.
    pub fn from_parts(payload: Batch, ack: AckHandle) -> Self {
        Self { payload, ack }
    }

    /// Split into payload and obligation so a stage can move the obligation on.
    pub fn into_parts(self) -> (Batch, AckHandle) {
        (self.payload, self.ack)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Resolve this transaction, consuming it.
    pub fn resolve(self, result: AckResult) {
        self.ack.resolve(result);
    }
}
