//! Predicate evaluator seam.
//!
//! The engine does not ship an expression language. A [`PredicateFactory`]
//! registered with the [`Registry`](crate::registry::Registry) turns the
//! `batching.check` expression into a [`Predicate`].

use std::sync::Arc;

use tributary_types::error::ConnectorError;
use tributary_types::message::Batch;

/// Boolean test over a pending batch.
///
/// As a batching `check`, it runs after every inbound transaction is added
/// and sees everything accumulated since the last release, not only the
/// newest parts. A `true` releases the whole pending batch.
pub trait Predicate: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the expression cannot be evaluated for this batch.
    fn evaluate(&self, batch: &Batch) -> Result<bool, ConnectorError>;
}

impl<F> Predicate for F
where
    F: Fn(&Batch) -> Result<bool, ConnectorError> + Send + Sync,
{
    fn evaluate(&self, batch: &Batch) -> Result<bool, ConnectorError> {
        self(batch)
    }
}

/// Compiles predicate expressions.
pub trait PredicateFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns a config error if the expression is invalid.
    fn build(&self, expression: &str) -> Result<Arc<dyn Predicate>, ConnectorError>;
}

impl<F> PredicateFactory for F
where
    F: Fn(&str) -> Result<Arc<dyn Predicate>, ConnectorError> + Send + Sync,
{
    fn build(&self, expression: &str) -> Result<Arc<dyn Predicate>, ConnectorError> {
        self(expression)
    }
}
