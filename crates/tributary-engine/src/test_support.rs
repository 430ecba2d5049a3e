//! In-memory adapters for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tributary_types::ack::AckResult;
use tributary_types::error::AdapterError;
use tributary_types::message::Batch;

use crate::adapter::{ack_fn, AckFn, AckSource, Sink, Source};
use crate::throttle::RetryConfig;

pub(crate) type Shared<T> = Arc<Mutex<T>>;

pub(crate) fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(10),
        jitter: 0.0,
    }
}

/// Serial source replaying a script of read results, then `Closed`.
pub(crate) struct ScriptedSource {
    reads: VecDeque<Result<Batch, AdapterError>>,
    connect_results: VecDeque<Result<(), AdapterError>>,
    endless: Option<String>,
    read_count: Shared<usize>,
    connect_count: Shared<usize>,
    connect_times: Shared<Vec<tokio::time::Instant>>,
    acks: Shared<Vec<AckResult>>,
    closed: Shared<bool>,
}

impl ScriptedSource {
    pub(crate) fn new(reads: Vec<Result<Batch, AdapterError>>) -> Self {
        Self {
            reads: reads.into(),
            connect_results: VecDeque::new(),
            endless: None,
            read_count: Shared::default(),
            connect_count: Shared::default(),
            connect_times: Shared::default(),
            acks: Shared::default(),
            closed: Shared::default(),
        }
    }

    /// Source that returns `payload` forever.
    pub(crate) fn endless(payload: &str) -> Self {
        let mut source = Self::new(Vec::new());
        source.endless = Some(payload.to_string());
        source
    }

    /// Results for successive `connect` calls; `Ok` once exhausted.
    pub(crate) fn with_connect_results(mut self, results: Vec<Result<(), AdapterError>>) -> Self {
        self.connect_results = results.into();
        self
    }

    pub(crate) fn acks(&self) -> Shared<Vec<AckResult>> {
        self.acks.clone()
    }

    pub(crate) fn reads(&self) -> Shared<usize> {
        self.read_count.clone()
    }

    pub(crate) fn connects(&self) -> Shared<usize> {
        self.connect_count.clone()
    }

    pub(crate) fn connect_times(&self) -> Shared<Vec<tokio::time::Instant>> {
        self.connect_times.clone()
    }

    pub(crate) fn closed(&self) -> Shared<bool> {
        self.closed.clone()
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        *self.connect_count.lock().unwrap() += 1;
        self.connect_times.lock().unwrap().push(tokio::time::Instant::now());
        self.connect_results.pop_front().unwrap_or(Ok(()))
    }

    async fn read(&mut self) -> Result<Batch, AdapterError> {
        *self.read_count.lock().unwrap() += 1;
        if let Some(payload) = &self.endless {
            return Ok(Batch::quick([payload.as_str()]));
        }
        self.reads.pop_front().unwrap_or(Err(AdapterError::Closed))
    }

    async fn acknowledge(&mut self, result: AckResult) -> Result<(), AdapterError> {
        self.acks.lock().unwrap().push(result);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Per-message-ack source emitting one single-part batch per payload.
pub(crate) struct VecAckSource {
    payloads: VecDeque<String>,
    acks: Shared<Vec<(String, AckResult)>>,
}

impl VecAckSource {
    pub(crate) fn new<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            payloads: payloads.into_iter().map(Into::into).collect(),
            acks: Shared::default(),
        }
    }

    pub(crate) fn acks(&self) -> Shared<Vec<(String, AckResult)>> {
        self.acks.clone()
    }
}

#[async_trait]
impl AckSource for VecAckSource {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<(Batch, AckFn), AdapterError> {
        let Some(payload) = self.payloads.pop_front() else {
            return Err(AdapterError::Closed);
        };
        let acks = self.acks.clone();
        let key = payload.clone();
        let ack = ack_fn(move |result| async move {
            acks.lock().unwrap().push((key, result));
            Ok(())
        });
        Ok((Batch::quick([payload]), ack))
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Sink recording every write, with scripted results and optional latency.
#[derive(Default)]
pub(crate) struct RecordingSink {
    written: Shared<Vec<Batch>>,
    results: Mutex<VecDeque<Result<(), AdapterError>>>,
    connect_results: Mutex<VecDeque<Result<(), AdapterError>>>,
    connect_count: Arc<AtomicUsize>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Results for successive writes; `Ok` once exhausted.
    pub(crate) fn with_results(self, results: Vec<Result<(), AdapterError>>) -> Self {
        *self.results.lock().unwrap() = results.into();
        self
    }

    pub(crate) fn with_connect_results(self, results: Vec<Result<(), AdapterError>>) -> Self {
        *self.connect_results.lock().unwrap() = results.into();
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn written(&self) -> Shared<Vec<Batch>> {
        self.written.clone()
    }

    pub(crate) fn connects(&self) -> Arc<AtomicUsize> {
        self.connect_count.clone()
    }

    pub(crate) fn max_in_flight(&self) -> Arc<AtomicUsize> {
        self.max_in_flight.clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn connect(&self) -> Result<(), AdapterError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        self.connect_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn write(&self, batch: &Batch) -> Result<(), AdapterError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let result = self.results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.written.lock().unwrap().push(batch.clone());
        }
        result
    }

    async fn close(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
