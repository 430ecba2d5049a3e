//! Adapter contracts implemented by concrete inputs and outputs.
//!
//! The engine never talks to an external system directly. A [`Source`] or
//! [`AckSource`] produces batches; a [`Sink`] consumes them. Errors are
//! reported as [`AdapterError`] so the wrappers can tell a lost connection
//! (`NotConnected`), an idle poll (`Timeout`) and a permanent stop
//! (`Closed`) apart from a failed operation.

use std::future::Future;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tributary_types::ack::AckResult;
use tributary_types::error::AdapterError;
use tributary_types::message::Batch;

/// Serial input: one batch outstanding at a time.
///
/// The wrapper calls [`Source::acknowledge`] with the outcome of each batch
/// before calling [`Source::read`] again.
#[async_trait]
pub trait Source: Send {
    /// Establish the connection. Called again after `NotConnected`.
    async fn connect(&mut self) -> Result<(), AdapterError>;

    /// Read the next batch.
    async fn read(&mut self) -> Result<Batch, AdapterError>;

    /// Outcome of the batch returned by the last `read`.
    async fn acknowledge(&mut self, result: AckResult) -> Result<(), AdapterError>;

    async fn close(&mut self) -> Result<(), AdapterError>;
}

/// Callback that acknowledges one batch read from an [`AckSource`].
pub type AckFn = Box<dyn FnOnce(AckResult) -> BoxFuture<'static, Result<(), AdapterError>> + Send>;

/// Box an async closure as an [`AckFn`].
pub fn ack_fn<F, Fut>(f: F) -> AckFn
where
    F: FnOnce(AckResult) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
{
    Box::new(move |result| Box::pin(f(result)))
}

/// Input whose batches are acknowledged independently.
///
/// Several batches may be outstanding; each carries its own [`AckFn`].
#[async_trait]
pub trait AckSource: Send {
    async fn connect(&mut self) -> Result<(), AdapterError>;

    async fn read(&mut self) -> Result<(Batch, AckFn), AdapterError>;

    async fn close(&mut self) -> Result<(), AdapterError>;
}

/// Output. Methods take `&self` so a pool of workers can write concurrently.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Deliver a batch. Return [`AdapterError::Batch`] when only some parts failed.
    async fn write(&self, batch: &Batch) -> Result<(), AdapterError>;

    async fn close(&self) -> Result<(), AdapterError>;
}
