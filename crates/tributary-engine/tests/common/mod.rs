//! In-memory adapters shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tributary_engine::adapter::{ack_fn, AckFn, AckSource, Sink, Source};
use tributary_engine::config::parse_pipeline_str;
use tributary_engine::config::PipelineConfig;
use tributary_engine::source::SourceKind;
use tributary_engine::Registry;
use tributary_types::ack::AckResult;
use tributary_types::error::AdapterError;
use tributary_types::message::Batch;

pub type Shared<T> = Arc<Mutex<T>>;

/// Serial source reading one single-part batch per payload, then `Closed`.
pub struct ListSource {
    payloads: VecDeque<String>,
    acks: Shared<Vec<AckResult>>,
}

impl ListSource {
    pub fn new(payloads: &[String]) -> Self {
        Self {
            payloads: payloads.iter().cloned().collect(),
            acks: Shared::default(),
        }
    }

    pub fn acks(&self) -> Shared<Vec<AckResult>> {
        self.acks.clone()
    }
}

#[async_trait]
impl Source for ListSource {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<Batch, AdapterError> {
        match self.payloads.pop_front() {
            Some(p) => Ok(Batch::quick([p])),
            None => Err(AdapterError::Closed),
        }
    }

    async fn acknowledge(&mut self, result: AckResult) -> Result<(), AdapterError> {
        self.acks.lock().unwrap().push(result);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Per-message-ack source. After the payloads run out it either reports
/// `Closed` or idles until shutdown.
pub struct ListAckSource {
    payloads: VecDeque<String>,
    idle_when_done: bool,
    acks: Shared<Vec<(String, AckResult)>>,
}

impl ListAckSource {
    pub fn new(payloads: &[String]) -> Self {
        Self {
            payloads: payloads.iter().cloned().collect(),
            idle_when_done: false,
            acks: Shared::default(),
        }
    }

    pub fn idle_when_done(mut self) -> Self {
        self.idle_when_done = true;
        self
    }

    pub fn acks(&self) -> Shared<Vec<(String, AckResult)>> {
        self.acks.clone()
    }
}

#[async_trait]
impl AckSource for ListAckSource {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<(Batch, AckFn), AdapterError> {
        let Some(payload) = self.payloads.pop_front() else {
            if self.idle_when_done {
                std::future::pending::<()>().await;
            }
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

/// Sink recording writes and connect attempts with their timestamps.
#[derive(Default)]
pub struct MemorySink {
    pub written: Shared<Vec<Batch>>,
    pub write_times: Shared<Vec<Instant>>,
    pub connect_times: Shared<Vec<Instant>>,
    write_results: Mutex<VecDeque<Result<(), AdapterError>>>,
    connect_results: Mutex<VecDeque<Result<(), AdapterError>>>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub peak_in_flight: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_results(self, results: Vec<Result<(), AdapterError>>) -> Self {
        *self.write_results.lock().unwrap() = results.into();
        self
    }

    pub fn with_connect_results(self, results: Vec<Result<(), AdapterError>>) -> Self {
        *self.connect_results.lock().unwrap() = results.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every written part's payload, in write order.
    pub fn payloads(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.iter().map(|p| String::from_utf8_lossy(p.as_bytes()).into_owned()))
            .collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn connect(&self) -> Result<(), AdapterError> {
        self.connect_times.lock().unwrap().push(Instant::now());
        self.connect_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn write(&self, batch: &Batch) -> Result<(), AdapterError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let result = self.write_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.written.lock().unwrap().push(batch.clone());
            self.write_times.lock().unwrap().push(Instant::now());
        }
        result
    }

    async fn close(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

pub fn payloads(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("m{i}")).collect()
}

/// Registry with the built-in transforms, `memory` as the output and a
/// source registered under `memory` that is built once by `source`.
pub fn registry<F>(source: F, sink: Arc<MemorySink>) -> Registry
where
    F: FnOnce() -> SourceKind + Send + 'static,
{
    let slot = Mutex::new(Some(source));
    let mut registry = Registry::with_builtin_transforms();
    registry.register_source("memory", move |_| {
        let build = slot.lock().unwrap().take().ok_or_else(|| {
            tributary_types::error::ConnectorError::config("REUSED", "source already built")
        })?;
        Ok(build())
    });
    registry.register_sink("memory", move |_| Ok(sink.clone() as Arc<dyn Sink>));
    registry
}

/// Pipeline config with `memory` input and output plus extra YAML sections.
pub fn config(input_max_in_flight: usize, extra: &str) -> PipelineConfig {
    let yaml = format!(
        "version: \"1.0\"\npipeline: integration\ninput:\n  use: memory\n  max_in_flight: {input_max_in_flight}\noutput:\n  use: memory\n{extra}"
    );
    parse_pipeline_str(&yaml).unwrap()
}

/// Poll until `cond` holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    while !cond() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
