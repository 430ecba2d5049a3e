//! Pipeline orchestrator: runs a pipeline to completion and checks configs.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tributary_types::metric::StageKind;

use crate::config::types::PipelineConfig;
use crate::config::validator::validate_pipeline;
use crate::error::PipelineError;
use crate::pipeline::build_pipeline;
use crate::registry::Registry;
use crate::result::{CheckResult, ComponentCheck, PipelineResult};

/// Run a pipeline until its input ends or `stop` is cancelled.
///
/// On `stop` the pipeline is shut down in two phases, each bounded by
/// `resources.shutdown_timeout`.
///
/// # Errors
///
/// Returns an error if the pipeline cannot be built or does not close in time.
pub async fn run_pipeline(
    config: &PipelineConfig,
    registry: &Registry,
    stop: CancellationToken,
) -> Result<PipelineResult, PipelineError> {
    tracing::info!(pipeline = config.pipeline, "Starting pipeline run");
    let timeout = config.resources.shutdown_timeout()?;
    let pipeline = build_pipeline(config, registry)?;

    let stopped = tokio::select! {
        () = pipeline.closed() => false,
        () = stop.cancelled() => {
            tracing::info!(pipeline = config.pipeline, "Stop requested, closing input");
            pipeline.stop(timeout).await?;
            true
        }
    };

    let result = pipeline.result(stopped);
    tracing::info!(
        pipeline = config.pipeline,
        parts_read = result.parts_read(),
        parts_written = result.parts_written(),
        duration_secs = result.duration_secs,
        stopped,
        "Pipeline run complete"
    );
    Ok(result)
}

/// Validate `config` and construct every component it names without
/// starting anything.
///
/// # Errors
///
/// Returns an error if the configuration fails validation. Component
/// failures are reported per entry in the returned [`CheckResult`].
pub fn check_pipeline(config: &PipelineConfig, registry: &Registry) -> Result<CheckResult> {
    tracing::info!(
        pipeline = config.pipeline,
        "Checking pipeline configuration"
    );
    validate_pipeline(config)?;

    let mut components = Vec::new();
    let mut record = |role: StageKind, name: &str, error: Option<String>| {
        components.push(ComponentCheck {
            role,
            name: name.to_string(),
            error,
        });
    };

    let input = registry.build_source(&config.input.use_ref, &config.input.config);
    record(StageKind::Input, &config.input.use_ref, input.err().map(|e| e.to_string()));

    for tc in &config.transforms {
        let step = registry.build_transform(&tc.use_ref, &tc.config);
        record(StageKind::Transform, &tc.use_ref, step.err().map(|e| e.to_string()));
    }

    if let Some(batching) = &config.batching {
        if let Some(check) = batching.check.as_deref() {
            let predicate = registry.build_predicate(check);
            record(StageKind::Batcher, check, predicate.err().map(|e| e.to_string()));
        }
        for pc in &batching.processors {
            let step = registry.build_transform(&pc.use_ref, &pc.config);
            record(StageKind::Batcher, &pc.use_ref, step.err().map(|e| e.to_string()));
        }
    }

    let output = registry.build_sink(&config.output.use_ref, &config.output.config);
    record(StageKind::Output, &config.output.use_ref, output.err().map(|e| e.to_string()));

    Ok(CheckResult {
        pipeline: config.pipeline.clone(),
        components,
    })
}
