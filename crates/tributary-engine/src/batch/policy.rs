//! Release policy and pending state for the batcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tributary_types::error::ConnectorError;
use tributary_types::message::Batch;

use crate::predicate::Predicate;
use crate::transaction::{AckHandle, Transaction};
use crate::transform::Chain;

/// When to release the pending batch. Zero disables a size trigger.
#[derive(Clone, Default)]
pub struct BatchPolicy {
    pub count: usize,
    pub byte_size: usize,
    pub period: Option<Duration>,
    pub check: Option<Arc<dyn Predicate>>,
    /// Steps run over each released batch before it is sent on.
    pub processors: Chain,
}

impl std::fmt::Debug for BatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPolicy")
            .field("count", &self.count)
            .field("byte_size", &self.byte_size)
            .field("period", &self.period)
            .field("check", &self.check.is_some())
            .field("processors", &self.processors.len())
            .finish()
    }
}

impl BatchPolicy {
    /// Policy releasing every `count` parts.
    pub fn count(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_byte_size(mut self, byte_size: usize) -> Self {
        self.byte_size = byte_size;
        self
    }

    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    #[must_use]
    pub fn with_check(mut self, check: Arc<dyn Predicate>) -> Self {
        self.check = Some(check);
        self
    }

    #[must_use]
    pub fn with_processors(mut self, processors: Chain) -> Self {
        self.processors = processors;
        self
    }

    /// Whether any trigger is set.
    pub fn is_noop(&self) -> bool {
        self.count == 0
            && self.byte_size == 0
            && self.period.map_or(true, |p| p.is_zero())
            && self.check.is_none()
    }

    /// # Errors
    ///
    /// Returns a config error if the policy could never release a batch.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.is_noop() {
            return Err(ConnectorError::config(
                "EMPTY_BATCH_POLICY",
                "batch policy must set at least one of count, byte_size, period or check",
            ));
        }
        Ok(())
    }
}

/// Position range one inbound transaction occupies in the pending batch.
#[derive(Debug)]
pub struct Origin {
    pub start: usize,
    pub len: usize,
    pub ack: AckHandle,
}

/// Parts accumulated since the last release.
#[derive(Debug)]
pub struct Pending {
    policy: BatchPolicy,
    batch: Batch,
    bytes: usize,
    origins: Vec<Origin>,
    first_at: Option<Instant>,
}

impl Pending {
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            batch: Batch::new(),
            bytes: 0,
            origins: Vec::new(),
            first_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Append a transaction's parts and record its range.
    pub fn add(&mut self, txn: Transaction) {
        let (batch, ack) = txn.into_parts();
        let start = self.batch.len();
        let len = batch.len();
        if self.first_at.is_none() {
            self.first_at = Some(Instant::now());
        }
        self.bytes += batch.byte_size();
        self.batch.extend(batch);
        self.origins.push(Origin { start, len, ack });
    }

    /// Whether a count, size or check trigger has fired.
    pub fn is_ready(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        if self.policy.count > 0 && self.batch.len() >= self.policy.count {
            return true;
        }
        if self.policy.byte_size > 0 && self.bytes >= self.policy.byte_size {
            return true;
        }
        if let Some(check) = &self.policy.check {
            match check.evaluate(&self.batch) {
                Ok(ready) => return ready,
                Err(err) => {
                    tracing::warn!(error = %err, "Batch check failed, ignoring");
                }
            }
        }
        false
    }

    /// When the period trigger fires, if one is set and parts are pending.
    pub fn deadline(&self) -> Option<Instant> {
        let period = self.policy.period.filter(|p| !p.is_zero())?;
        self.first_at.map(|first| first + period)
    }

    /// Take the pending batch and its origins, resetting the state.
    pub fn take(&mut self) -> Option<(Batch, Vec<Origin>)> {
        if self.origins.is_empty() {
            return None;
        }
        self.bytes = 0;
        self.first_at = None;
        let batch = std::mem::take(&mut self.batch);
        let origins = std::mem::take(&mut self.origins);
        Some((batch, origins))
    }
}
