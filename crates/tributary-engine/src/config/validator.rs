//! Semantic validation for parsed pipeline configuration values.

use anyhow::{bail, Result};

use crate::config::types::{parse_byte_size, parse_duration, BatchingConfig, PipelineConfig};

fn validate_batching(batching: &BatchingConfig, errors: &mut Vec<String>) {
    let mut has_trigger = batching.count > 0;

    if let Some(ref size) = batching.byte_size {
        match parse_byte_size(size) {
            Ok(0) => {}
            Ok(_) => has_trigger = true,
            Err(_) => errors.push(format!("batching: invalid byte_size '{size}'")),
        }
    }
    if let Some(ref period) = batching.period {
        match parse_duration(period) {
            Ok(d) if d.is_zero() => {}
            Ok(_) => has_trigger = true,
            Err(_) => errors.push(format!("batching: invalid period '{period}'")),
        }
    }
    if let Some(ref check) = batching.check {
        if check.trim().is_empty() {
            errors.push("batching: check expression must not be empty".to_string());
        } else {
            has_trigger = true;
        }
    }

    for (i, processor) in batching.processors.iter().enumerate() {
        if processor.use_ref.trim().is_empty() {
            errors.push(format!("batching.processors[{i}]: reference (use) must not be empty"));
        }
    }

    if !has_trigger {
        errors.push(
            "batching must set at least one of count, byte_size, period or check".to_string(),
        );
    }
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported pipeline version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.input.use_ref.trim().is_empty() {
        errors.push("Input reference (use) must not be empty".to_string());
    }
    if config.input.max_in_flight == 0 {
        errors.push("input.max_in_flight must be at least 1".to_string());
    }

    for (i, transform) in config.transforms.iter().enumerate() {
        if transform.use_ref.trim().is_empty() {
            errors.push(format!("transforms[{i}]: reference (use) must not be empty"));
        }
    }

    if let Some(ref batching) = config.batching {
        validate_batching(batching, &mut errors);
    }

    if config.output.use_ref.trim().is_empty() {
        errors.push("Output reference (use) must not be empty".to_string());
    }
    if config.output.max_in_flight == 0 {
        errors.push("output.max_in_flight must be at least 1".to_string());
    }

    if config.resources.channel_capacity == 0 {
        errors.push("channel_capacity must be at least 1".to_string());
    }
    if config.resources.transform_workers == 0 {
        errors.push("transform_workers must be at least 1".to_string());
    }
    if parse_duration(&config.resources.shutdown_timeout).is_err() {
        errors.push(format!(
            "invalid shutdown_timeout '{}'",
            config.resources.shutdown_timeout
        ));
    }

    let initial = parse_duration(&config.retry.initial_interval);
    let max = parse_duration(&config.retry.max_interval);
    if initial.is_err() {
        errors.push(format!(
            "retry: invalid initial_interval '{}'",
            config.retry.initial_interval
        ));
    }
    if max.is_err() {
        errors.push(format!(
            "retry: invalid max_interval '{}'",
            config.retry.max_interval
        ));
    }
    if let (Ok(initial), Ok(max)) = (initial, max) {
        if initial.is_zero() {
            errors.push("retry: initial_interval must be > 0".to_string());
        }
        if initial > max {
            errors.push("retry: initial_interval must not exceed max_interval".to_string());
        }
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        errors.push(format!(
            "retry: jitter must be between 0 and 1, got {}",
            config.retry.jitter
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
pipeline: test_pipeline
input:
  use: generate
  config:
    count: 10
output:
  use: drop
"#
    }

    fn with_section(section: &str) -> String {
        format!("{}\n{}\n", valid_yaml().trim_end(), section.trim())
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let config = parse_pipeline_str(valid_yaml()).unwrap();
        assert!(validate_pipeline(&config).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let yaml = valid_yaml().replace("\"1.0\"", "\"2.0\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported pipeline version"));
    }

    #[test]
    fn test_empty_pipeline_name_fails() {
        let yaml = valid_yaml().replace("test_pipeline", "\"\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Pipeline name must not be empty"));
    }

    #[test]
    fn test_batching_without_trigger_fails() {
        let yaml = with_section("batching:\n  count: 0");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("at least one of count"));
    }

    #[test]
    fn test_batching_period_only_passes() {
        let yaml = with_section("batching:\n  period: 50ms");
        let config = parse_pipeline_str(&yaml).unwrap();
        assert!(validate_pipeline(&config).is_ok());
    }

    #[test]
    fn test_invalid_byte_size_fails() {
        let yaml = with_section("batching:\n  count: 2\n  byte_size: lots");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("invalid byte_size"));
    }

    #[test]
    fn test_batch_processor_needs_a_reference() {
        let yaml = with_section("batching:\n  count: 2\n  processors:\n    - use: archive\n    - use: \"\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        assert_eq!(config.batching.as_ref().unwrap().processors.len(), 2);
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("batching.processors[1]"));
        assert!(!err.contains("batching.processors[0]"));
    }

    #[test]
    fn test_zero_max_in_flight_fails() {
        let yaml = valid_yaml().replace("use: drop", "use: drop\n  max_in_flight: 0");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("output.max_in_flight"));
    }

    #[test]
    fn test_zero_channel_capacity_fails() {
        let yaml = with_section("resources:\n  channel_capacity: 0");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("channel_capacity"));
    }

    #[test]
    fn test_retry_bounds() {
        let yaml = with_section(
            "retry:\n  initial_interval: 10s\n  max_interval: 1s\n  jitter: 1.5",
        );
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("must not exceed max_interval"));
        assert!(err.contains("jitter must be between 0 and 1"));
    }

    #[test]
    fn test_all_errors_are_reported() {
        let yaml = valid_yaml()
            .replace("\"1.0\"", "\"9\"")
            .replace("use: generate", "use: \"\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported pipeline version"));
        assert!(err.contains("Input reference"));
    }
}
