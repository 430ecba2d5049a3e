//! Pipeline assembly: turns a validated config into running stages.
//!
//! Stages are wired input -> transform -> batcher -> output through bounded
//! channels. A graceful close only signals the input; every later stage
//! finishes on its own once its inbound channel closes and its outstanding
//! transactions are resolved.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tributary_types::error::ConnectorError;

use crate::batch::{spawn_batcher, BatchPolicy};
use crate::config::types::{parse_byte_size, parse_duration, BatchingConfig, PipelineConfig};
use crate::config::validator::validate_pipeline;
use crate::error::PipelineError;
use crate::registry::Registry;
use crate::result::{PipelineResult, StageReport};
use crate::sink::spawn_sink;
use crate::source::{spawn_source, SourceKind};
use crate::stage::{StageContext, StageHandle};
use crate::transform::{spawn_transform, Chain};

/// A running pipeline.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageHandle>,
    started: Instant,
}

/// Build every component named by `config` and spawn the stages.
///
/// Components are constructed before any stage is spawned, so a failing
/// lookup leaves nothing running. Must be called within a tokio runtime.
///
/// # Errors
///
/// Returns `Infrastructure` for invalid configuration and `Connector` when a
/// component cannot be constructed from the registry.
pub fn build_pipeline(config: &PipelineConfig, registry: &Registry) -> Result<Pipeline, PipelineError> {
    validate_pipeline(config)?;
    let retry = config.retry.to_retry_config()?;
    let capacity = config.resources.channel_capacity;

    let source = registry.build_source(&config.input.use_ref, &config.input.config)?;
    let steps = config
        .transforms
        .iter()
        .map(|t| registry.build_transform(&t.use_ref, &t.config))
        .collect::<Result<Vec<_>, _>>()?;
    let chain = Chain::new(steps);
    let policy = config
        .batching
        .as_ref()
        .map(|b| batch_policy(b, registry))
        .transpose()?;
    let sink = registry.build_sink(&config.output.use_ref, &config.output.config)?;

    if let (SourceKind::Serial(_), Some(policy)) = (&source, &policy) {
        if policy.period.is_none() && (policy.count > 1 || policy.byte_size > 0) {
            tracing::warn!(
                pipeline = config.pipeline,
                "Serial input waits for each batch to resolve; size-based batching without a period may stall"
            );
        }
    }

    let mut stages = Vec::with_capacity(4);

    let (tx, mut rx) = mpsc::channel(capacity);
    let ctx = StageContext::new(format!("input.{}", config.input.use_ref));
    stages.push(spawn_source(&ctx, source, retry, config.input.max_in_flight, tx));

    if !chain.is_empty() {
        let (tx, next) = mpsc::channel(capacity);
        let ctx = StageContext::new("transforms");
        stages.push(spawn_transform(
            &ctx,
            chain,
            config.resources.transform_workers,
            rx,
            tx,
        ));
        rx = next;
    }

    if let Some(policy) = policy {
        let (tx, next) = mpsc::channel(capacity);
        let ctx = StageContext::new("batching");
        stages.push(spawn_batcher(&ctx, policy, rx, tx)?);
        rx = next;
    }

    let ctx = StageContext::new(format!("output.{}", config.output.use_ref));
    stages.push(spawn_sink(&ctx, sink, retry, config.output.max_in_flight, rx));

    tracing::info!(
        pipeline = config.pipeline,
        stages = stages.len(),
        "Pipeline started"
    );

    Ok(Pipeline {
        name: config.pipeline.clone(),
        stages,
        started: Instant::now(),
    })
}

fn batch_policy(config: &BatchingConfig, registry: &Registry) -> Result<BatchPolicy, PipelineError> {
    let mut policy = BatchPolicy::count(config.count);
    if let Some(ref size) = config.byte_size {
        let bytes = parse_byte_size(size)?;
        let bytes = usize::try_from(bytes).map_err(|_| {
            ConnectorError::config("INVALID_CONFIG", format!("byte_size '{size}' is too large"))
        })?;
        policy = policy.with_byte_size(bytes);
    }
    if let Some(ref period) = config.period {
        let period = parse_duration(period)?;
        if !period.is_zero() {
            policy = policy.with_period(period);
        }
    }
    if let Some(ref check) = config.check {
        policy = policy.with_check(registry.build_predicate(check)?);
    }
    if !config.processors.is_empty() {
        let steps = config
            .processors
            .iter()
            .map(|p| registry.build_transform(&p.use_ref, &p.config))
            .collect::<Result<Vec<_>, _>>()?;
        policy = policy.with_processors(Chain::new(steps));
    }
    Ok(policy)
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in data-flow order, input first.
    pub fn stages(&self) -> &[StageHandle] {
        &self.stages
    }

    /// Ask the input to stop reading. Downstream stages drain and close.
    pub fn close_async(&self) {
        if let Some(input) = self.stages.first() {
            input.close_async();
        }
    }

    /// Wait for every stage to close, sharing one deadline.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` naming the first stage still running.
    pub async fn wait_for_close(&self, timeout: Duration) -> Result<(), PipelineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        for stage in &self.stages {
            if tokio::time::timeout_at(deadline, stage.closed()).await.is_err() {
                return Err(PipelineError::ShutdownTimeout {
                    stage: stage.name().to_string(),
                    timeout,
                });
            }
        }
        Ok(())
    }

    /// Wait until every stage has closed on its own, e.g. after input end.
    pub async fn closed(&self) {
        for stage in &self.stages {
            stage.closed().await;
        }
    }

    /// Graceful close bounded by `timeout`, then a forced close of every
    /// stage bounded by `timeout` again.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if a stage is still running after the
    /// forced close.
    pub async fn stop(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.close_async();
        match self.wait_for_close(timeout).await {
            Err(err) if err.is_timeout() => {
                tracing::warn!(
                    pipeline = self.name,
                    error = %err,
                    "Graceful shutdown timed out, interrupting all stages"
                );
            }
            other => return other,
        }
        for stage in &self.stages {
            stage.close_async();
        }
        self.wait_for_close(timeout).await
    }

    pub fn snapshots(&self) -> Vec<StageReport> {
        self.stages
            .iter()
            .map(|s| StageReport {
                name: s.name().to_string(),
                kind: s.kind(),
                snapshot: s.metrics(),
            })
            .collect()
    }

    /// Summary of the run so far.
    pub fn result(&self, stopped: bool) -> PipelineResult {
        PipelineResult {
            pipeline: self.name.clone(),
            duration_secs: self.started.elapsed().as_secs_f64(),
            stopped,
            stages: self.snapshots(),
        }
    }
}
