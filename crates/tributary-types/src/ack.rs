//! Delivery outcomes.
//!
//! Every transaction is resolved with exactly one [`AckResult`]. A
//! [`BatchError`] records which positions of a batch failed so that a stage
//! which merged several messages can hand each origin its own outcome.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::message::Batch;

/// Per-position failures of a batch. Positions not listed succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{} of {len} messages failed: {cause}", .failures.len())]
pub struct BatchError {
    len: usize,
    cause: ConnectorError,
    failures: BTreeMap<usize, ConnectorError>,
}

impl BatchError {
    /// Start a batch error for `batch` with an overall cause.
    #[must_use]
    pub fn new(batch: &Batch, cause: ConnectorError) -> Self {
        Self::with_len(batch.len(), cause)
    }

    /// Start a batch error for a batch of `len` parts.
    #[must_use]
    pub fn with_len(len: usize, cause: ConnectorError) -> Self {
        Self {
            len,
            cause,
            failures: BTreeMap::new(),
        }
    }

    /// Mark `index` as failed. Indices outside the batch are ignored.
    #[must_use]
    pub fn failed(mut self, index: usize, err: ConnectorError) -> Self {
        self.mark_failed(index, err);
        self
    }

    /// In-place variant of [`BatchError::failed`].
    pub fn mark_failed(&mut self, index: usize, err: ConnectorError) {
        if index < self.len {
            self.failures.insert(index, err);
        }
    }

    /// Length of the batch this error describes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn cause(&self) -> &ConnectorError {
        &self.cause
    }

    /// Number of positions explicitly marked as failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// Whether any position has been marked.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Error recorded for `index`, if it failed.
    #[must_use]
    pub fn failure(&self, index: usize) -> Option<&ConnectorError> {
        self.failures.get(&index)
    }

    /// Failed positions in ascending order.
    pub fn iter_failed(&self) -> impl Iterator<Item = (usize, &ConnectorError)> {
        self.failures.iter().map(|(i, e)| (*i, e))
    }

    /// Outcome for the sub-range `[start, start + len)`, re-indexed from 0.
    ///
    /// Returns [`AckResult::Ok`] when nothing in the range failed. A
    /// single-position range resolves to its own error; a wider range
    /// resolves to a narrower [`BatchError`] with the same cause.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> AckResult {
        if !self.has_failures() {
            return AckResult::Failed(self.cause.clone());
        }
        let end = start.saturating_add(len);
        let mut narrowed = BatchError::with_len(len, self.cause.clone());
        for (index, err) in self.failures.range(start..end) {
            narrowed.mark_failed(index - start, err.clone());
        }
        match (narrowed.failed_count(), len) {
            (0, _) => AckResult::Ok,
            (_, 1) => AckResult::Failed(narrowed.failures.remove(&0).unwrap_or(narrowed.cause)),
            _ => AckResult::Partial(narrowed),
        }
    }
}

/// Outcome delivered to a transaction's origin.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AckResult {
    /// Every message was delivered.
    #[default]
    Ok,
    /// The whole batch failed.
    Failed(ConnectorError),
    /// Some positions failed; see [`BatchError`].
    Partial(BatchError),
}

impl AckResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Collapse into a plain result. A partial failure reports its cause.
    ///
    /// # Errors
    ///
    /// Returns the whole-batch error or the batch error's cause.
    pub fn into_result(self) -> Result<(), ConnectorError> {
        match self {
            Self::Ok => Ok(()),
            Self::Failed(err) => Err(err),
            Self::Partial(be) => Err(be.cause),
        }
    }

    /// Fold a partial failure with no marked positions into a whole failure.
    #[must_use]
    pub fn normalize(self) -> Self {
        match self {
            Self::Partial(be) if !be.has_failures() => Self::Failed(be.cause),
            other => other,
        }
    }

    /// Outcome for the positions `[start, start + len)` of the batch this
    /// result was produced for.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Self {
        match self {
            Self::Ok => Self::Ok,
            Self::Failed(err) => Self::Failed(err.clone()),
            Self::Partial(be) => be.slice(start, len),
        }
    }
}

impl From<Result<(), ConnectorError>> for AckResult {
    fn from(value: Result<(), ConnectorError>) -> Self {
        match value {
            Ok(()) => Self::Ok,
            Err(err) => Self::Failed(err),
        }
    }
}

impl From<BatchError> for AckResult {
    fn from(value: BatchError) -> Self {
        Self::Partial(value).normalize()
    }
}
