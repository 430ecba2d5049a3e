use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use tributary_engine::config::{parser, validator};
use tributary_engine::orchestrator;
use tributary_engine::PipelineResult;

use crate::adapters;

/// Execute the `run` command: parse, validate, and run a pipeline until its
/// input ends or Ctrl-C is pressed.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate
    validator::validate_pipeline(&config)?;

    tracing::info!(
        pipeline = config.pipeline,
        input = config.input.use_ref,
        output = config.output.use_ref,
        transforms = config.transforms.len(),
        "Pipeline validated"
    );

    // 3. Stop on Ctrl-C
    let stop = CancellationToken::new();
    let on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    // 4. Run
    let registry = adapters::registry();
    let result = orchestrator::run_pipeline(&config, &registry, stop).await?;

    print_summary(&result);
    Ok(())
}

/// Summary goes to stderr; stdout may be carrying pipeline output.
fn print_summary(result: &PipelineResult) {
    let outcome = if result.stopped { "stopped" } else { "completed" };
    eprintln!("Pipeline '{}' {outcome}.", result.pipeline);
    eprintln!("  Parts read:      {}", result.parts_read());
    eprintln!("  Parts written:   {}", result.parts_written());
    eprintln!("  Duration:        {:.2}s", result.duration_secs);
    if result.duration_secs > 0.0 {
        #[allow(clippy::cast_precision_loss)]
        let rate = result.parts_written() as f64 / result.duration_secs;
        eprintln!("  Throughput:      {rate:.0} parts/sec");
    }

    eprintln!("  Stages:");
    for stage in &result.stages {
        let s = &stage.snapshot;
        eprintln!(
            "    {:10} {:20} in {:>8}  out {:>8}  errors {:>5}  acked {:>8}  nacked {:>5}",
            stage.kind.to_string(),
            stage.name,
            s.parts_received,
            s.parts_sent,
            s.errors,
            s.acked,
            s.ack_errors,
        );
        if s.connection_failed > 0 || s.connection_lost > 0 {
            eprintln!(
                "               connections up {} failed {} lost {}",
                s.connection_up, s.connection_failed, s.connection_lost,
            );
        }
    }
}
