//! Integration tests for pipeline assembly and end-to-end delivery.
//!
//! These tests build complete pipelines from YAML through the public API
//! and drive them with in-memory adapters.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{config, eventually, payloads, registry, ListAckSource, ListSource, MemorySink};
use rstest::rstest;
use tributary_engine::adapter::Sink;
use tributary_engine::build_pipeline;
use tributary_engine::config::{parser, validator};
use tributary_engine::source::SourceKind;
use tributary_engine::Registry;
use tributary_types::ack::{AckResult, BatchError};
use tributary_types::error::{AdapterError, ConnectorError};
use tributary_types::message::Batch;

const WAIT: Duration = Duration::from_secs(10);

fn fixture(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/pipelines")
        .join(name)
}

/// Test parsing and validating a well-formed pipeline YAML fixture.
#[test]
fn test_parse_and_validate_fixture_pipeline() {
    std::env::set_var("TRIB_FIXTURE_MESSAGE", "hello fixture");

    let config = parser::parse_pipeline(&fixture("generate_to_stdout.yaml"))
        .expect("Failed to parse fixture pipeline");

    assert_eq!(config.pipeline, "fixture_generate_to_stdout");
    assert_eq!(config.input.use_ref, "generate");
    assert_eq!(config.input.config["message"], "hello fixture");
    assert_eq!(config.input.max_in_flight, 8);
    assert_eq!(config.transforms.len(), 2);
    assert_eq!(config.output.max_in_flight, 2);
    assert_eq!(config.resources.transform_workers, 2);

    validator::validate_pipeline(&config).expect("Validation should pass");

    std::env::remove_var("TRIB_FIXTURE_MESSAGE");
}

/// Test that an invalid pipeline fixture reports every problem at once.
#[test]
fn test_parse_and_validate_invalid_fixture() {
    let config = parser::parse_pipeline(&fixture("invalid_pipeline.yaml"))
        .expect("Invalid fixture is still well-formed YAML");

    let err = validator::validate_pipeline(&config).unwrap_err().to_string();
    for needle in [
        "Unsupported pipeline version",
        "Pipeline name must not be empty",
        "input.max_in_flight",
        "at least one of count",
        "Output reference",
        "initial_interval",
    ] {
        assert!(err.contains(needle), "missing '{needle}' in: {err}");
    }
}

#[tokio::test]
async fn test_serial_source_to_serial_sink_preserves_order() {
    let input = payloads(20);
    let source = ListSource::new(&input);
    let acks = source.acks();
    let sink = Arc::new(MemorySink::new());
    let registry = registry(move || SourceKind::Serial(Box::new(source)), sink.clone());

    let pipeline = build_pipeline(&config(1, ""), &registry).unwrap();
    pipeline.wait_for_close(WAIT).await.unwrap();

    assert_eq!(sink.payloads(), input);
    let acks = acks.lock().unwrap();
    assert_eq!(acks.len(), 20);
    assert!(acks.iter().all(AckResult::is_ok));
}

#[tokio::test]
async fn test_every_origin_is_resolved_exactly_once() {
    let input = payloads(40);
    let source = ListAckSource::new(&input);
    let acks = source.acks();
    let nack = ConnectorError::delivery("NACK", "refused");
    let sink = Arc::new(
        MemorySink::new()
            .with_write_results(vec![Ok(()), Err(AdapterError::Failed(nack))])
            .with_delay(Duration::from_millis(1)),
    );
    let registry = registry(move || SourceKind::Concurrent(Box::new(source)), sink.clone());
    let cfg = config(
        8,
        "  max_in_flight: 3\ntransforms:\n  - use: metadata\n    config:\n      set:\n        seen: \"yes\"\nbatching:\n  count: 3\nretry:\n  initial_interval: 1ms\n  max_interval: 5ms\n",
    );

    let pipeline = build_pipeline(&cfg, &registry).unwrap();
    pipeline.wait_for_close(WAIT).await.unwrap();

    let acks = acks.lock().unwrap();
    let mut per_payload: HashMap<&str, usize> = HashMap::new();
    for (payload, _) in acks.iter() {
        *per_payload.entry(payload.as_str()).or_default() += 1;
    }
    assert_eq!(per_payload.len(), 40);
    assert!(per_payload.values().all(|&n| n == 1));

    let failed = acks.iter().filter(|(_, r)| !r.is_ok()).count();
    assert!((1..=3).contains(&failed), "failed = {failed}");
    assert_eq!(sink.payloads().len(), 40 - failed);
    assert!(sink
        .written
        .lock()
        .unwrap()
        .iter()
        .flat_map(Batch::iter)
        .all(|p| p.metadata_get("seen") == Some("yes")));
}

#[tokio::test]
async fn test_batch_error_fails_only_the_affected_origin() {
    let input: Vec<String> = ["a", "b", "c"].iter().map(|s| (*s).to_string()).collect();
    let source = ListAckSource::new(&input);
    let acks = source.acks();
    let nack = ConnectorError::delivery("NACK", "b refused");
    let sink = Arc::new(MemorySink::new().with_write_results(vec![Err(AdapterError::Batch(
        BatchError::with_len(3, nack.clone()).failed(1, nack.clone()),
    ))]));
    let registry = registry(move || SourceKind::Concurrent(Box::new(source)), sink);

    let pipeline = build_pipeline(&config(3, "batching:\n  count: 3\n"), &registry).unwrap();
    pipeline.wait_for_close(WAIT).await.unwrap();

    let acks: HashMap<String, AckResult> = acks.lock().unwrap().iter().cloned().collect();
    assert_eq!(acks["a"], AckResult::Ok);
    assert_eq!(acks["b"], AckResult::Failed(nack));
    assert_eq!(acks["c"], AckResult::Ok);
}

#[tokio::test(start_paused = true)]
async fn test_period_releases_a_lonely_message() {
    let source = ListAckSource::new(&payloads(1)).idle_when_done();
    let sink = Arc::new(MemorySink::new());
    let write_times = sink.write_times.clone();
    let registry = registry(move || SourceKind::Concurrent(Box::new(source)), sink);
    let cfg = config(1, "batching:\n  count: 100\n  period: 50ms\n");

    let start = tokio::time::Instant::now();
    let pipeline = build_pipeline(&cfg, &registry).unwrap();
    eventually(|| !write_times.lock().unwrap().is_empty()).await;

    let waited = write_times.lock().unwrap()[0] - start;
    assert!(waited >= Duration::from_millis(50), "waited {waited:?}");
    assert!(waited < Duration::from_millis(200), "waited {waited:?}");
    pipeline.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_output_reconnect_backs_off() {
    let down = || Err(AdapterError::Failed(ConnectorError::connection("DOWN", "refused")));
    let sink = Arc::new(MemorySink::new().with_connect_results(vec![down(), down(), down()]));
    let connects = sink.connect_times.clone();
    let source = ListSource::new(&payloads(1));
    let registry = registry(move || SourceKind::Serial(Box::new(source)), sink.clone());
    let cfg = config(
        1,
        "retry:\n  initial_interval: 10ms\n  max_interval: 1s\n  jitter: 0\n",
    );

    let pipeline = build_pipeline(&cfg, &registry).unwrap();
    pipeline.wait_for_close(WAIT).await.unwrap();

    let connects = connects.lock().unwrap();
    assert_eq!(connects.len(), 4);
    let gaps: Vec<Duration> = connects.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps[0] >= Duration::from_millis(10));
    assert!(gaps.windows(2).all(|g| g[1] >= g[0]), "gaps {gaps:?}");
    assert_eq!(sink.payloads().len(), 1);
    assert_eq!(pipeline.stages()[1].metrics().connection_failed, 3);
}

#[tokio::test]
async fn test_pool_bounds_concurrent_writes() {
    let source = ListAckSource::new(&payloads(30));
    let acks = source.acks();
    let sink = Arc::new(MemorySink::new().with_delay(Duration::from_millis(5)));
    let registry = registry(move || SourceKind::Concurrent(Box::new(source)), sink.clone());
    let cfg = config(16, "  max_in_flight: 3\nresources:\n  channel_capacity: 4\n");

    let pipeline = build_pipeline(&cfg, &registry).unwrap();
    pipeline.wait_for_close(WAIT).await.unwrap();

    let peak = sink.peak_in_flight.load(std::sync::atomic::Ordering::SeqCst);
    assert!(peak <= 3, "peak {peak}");
    assert!(peak >= 2, "peak {peak}");
    assert_eq!(sink.payloads().len(), 30);
    assert_eq!(acks.lock().unwrap().len(), 30);
}

#[rstest]
#[case(1, 1, 0)]
#[case(1, 3, 0)]
#[case(2, 1, 4)]
#[case(2, 3, 4)]
#[case(3, 4, 7)]
#[tokio::test]
async fn test_delivery_matrix(
    #[case] transform_workers: usize,
    #[case] output_workers: usize,
    #[case] batch_count: usize,
) {
    let input = payloads(25);
    let source = ListAckSource::new(&input);
    let acks = source.acks();
    let sink = Arc::new(MemorySink::new());
    let registry = registry(move || SourceKind::Concurrent(Box::new(source)), sink.clone());
    let batching = if batch_count > 0 {
        format!("batching:\n  count: {batch_count}\n")
    } else {
        String::new()
    };
    let cfg = config(
        8,
        &format!(
            "  max_in_flight: {output_workers}\ntransforms:\n  - use: noop\n{batching}resources:\n  transform_workers: {transform_workers}\n"
        ),
    );

    let pipeline = build_pipeline(&cfg, &registry).unwrap();
    pipeline.wait_for_close(WAIT).await.unwrap();

    let mut written = sink.payloads();
    written.sort();
    let mut expected = input.clone();
    expected.sort();
    assert_eq!(written, expected);
    let acks = acks.lock().unwrap();
    assert_eq!(acks.len(), 25);
    assert!(acks.iter().all(|(_, r)| r.is_ok()));
}

#[tokio::test]
async fn test_batch_processors_run_on_released_batches() {
    let input = payloads(6);
    let source = ListAckSource::new(&input);
    let acks = source.acks();
    let sink = Arc::new(MemorySink::new());
    let registry = registry(move || SourceKind::Concurrent(Box::new(source)), sink.clone());
    let cfg = config(
        3,
        "batching:\n  count: 3\n  processors:\n    - use: archive\n      config:\n        separator: \"+\"\n",
    );

    let pipeline = build_pipeline(&cfg, &registry).unwrap();
    pipeline.wait_for_close(WAIT).await.unwrap();

    assert_eq!(sink.payloads(), vec!["m0+m1+m2".to_string(), "m3+m4+m5".to_string()]);
    let acks = acks.lock().unwrap();
    assert_eq!(acks.len(), 6);
    assert!(acks.iter().all(|(_, r)| r.is_ok()));
}

#[tokio::test]
async fn test_graceful_shutdown_flushes_partial_batch() {
    let input: Vec<String> = ["a", "b"].iter().map(|s| (*s).to_string()).collect();
    let source = ListAckSource::new(&input).idle_when_done();
    let acks = source.acks();
    let sink = Arc::new(MemorySink::new());
    let registry = registry(move || SourceKind::Concurrent(Box::new(source)), sink.clone());

    let pipeline = build_pipeline(&config(4, "batching:\n  count: 10\n"), &registry).unwrap();
    eventually(|| pipeline.stages()[1].metrics().parts_received == 2).await;
    assert!(sink.payloads().is_empty());

    pipeline.stop(Duration::from_secs(5)).await.unwrap();

    assert_eq!(sink.written.lock().unwrap().len(), 1);
    assert_eq!(sink.payloads(), input);
    let acks = acks.lock().unwrap();
    assert_eq!(acks.len(), 2);
    assert!(acks.iter().all(|(_, r)| r.is_ok()));
}

/// Sink whose `close` never returns.
struct StuckOnClose;

#[async_trait]
impl Sink for StuckOnClose {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn write(&self, _batch: &Batch) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_stuck_stage_reports_shutdown_timeout() {
    let source = ListAckSource::new(&payloads(2)).idle_when_done();
    let mut registry = Registry::with_builtin_transforms();
    let slot = std::sync::Mutex::new(Some(source));
    registry.register_source("memory", move |_| {
        let source = slot
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ConnectorError::config("REUSED", "source already built"))?;
        Ok(SourceKind::Concurrent(Box::new(source)))
    });
    registry.register_sink("memory", |_| Ok(Arc::new(StuckOnClose) as Arc<dyn Sink>));

    let pipeline = build_pipeline(&config(2, ""), &registry).unwrap();
    eventually(|| pipeline.stages()[1].metrics().parts_sent == 2).await;

    let err = pipeline.stop(Duration::from_millis(100)).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("output.memory"));
    assert!(pipeline.stages()[0].is_closed());

    // Still stuck; waiting again reports the same stage.
    let err = pipeline
        .wait_for_close(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}
