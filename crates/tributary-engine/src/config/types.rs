//! Pipeline YAML configuration types and value parsers.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::throttle::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    pub input: InputConfig,
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub batching: Option<BatchingConfig>,
    pub output: OutputConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Outstanding transactions for inputs that acknowledge per batch.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default)]
    pub count: usize,
    /// Human-readable size such as `64kb`.
    #[serde(default)]
    pub byte_size: Option<String>,
    /// Human-readable duration such as `500ms`.
    #[serde(default)]
    pub period: Option<String>,
    /// Expression handed to the registered predicate evaluator.
    #[serde(default)]
    pub check: Option<String>,
    /// Transform steps applied to each released batch.
    #[serde(default)]
    pub processors: Vec<TransformConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(rename = "use")]
    pub use_ref: String,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Concurrent writes; more than 1 runs a worker pool.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_transform_workers")]
    pub transform_workers: usize,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
}

fn default_max_in_flight() -> usize {
    1
}
fn default_channel_capacity() -> usize {
    1
}
fn default_transform_workers() -> usize {
    1
}
fn default_shutdown_timeout() -> String {
    "30s".to_string()
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            transform_workers: default_transform_workers(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_interval")]
    pub initial_interval: String,
    #[serde(default = "default_max_interval")]
    pub max_interval: String,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_interval() -> String {
    "100ms".to_string()
}
fn default_max_interval() -> String {
    "60s".to_string()
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    /// # Errors
    ///
    /// Returns an error if either interval does not parse.
    pub fn to_retry_config(&self) -> Result<RetryConfig> {
        Ok(RetryConfig {
            initial_interval: parse_duration(&self.initial_interval)
                .context("retry.initial_interval")?,
            max_interval: parse_duration(&self.max_interval).context("retry.max_interval")?,
            jitter: self.jitter,
        })
    }
}

impl ResourceConfig {
    /// # Errors
    ///
    /// Returns an error if `shutdown_timeout` does not parse.
    pub fn shutdown_timeout(&self) -> Result<Duration> {
        parse_duration(&self.shutdown_timeout).context("resources.shutdown_timeout")
    }
}

/// Parse a duration such as `250ms`, `5s`, `2m` or `1h`. A bare number is
/// taken as milliseconds.
///
/// # Errors
///
/// Returns an error for an empty string, an unknown unit, or a non-numeric value.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_ascii_lowercase();
    if s.is_empty() {
        bail!("empty duration");
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .with_context(|| format!("invalid duration '{s}'"))?;
    let millis = match unit.trim() {
        "" | "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        other => bail!("invalid duration unit '{other}' in '{s}'"),
    };
    let nanos = (millis * 1_000_000.0).round();
    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        bail!("duration '{s}' out of range");
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Duration::from_nanos(nanos as u64))
}

/// Parse a byte size such as `512`, `64kb`, `1mb` or `2gb` (binary units).
///
/// # Errors
///
/// Returns an error for an empty string, an unknown unit, or a non-numeric value.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let s = s.trim().to_ascii_lowercase();
    if s.is_empty() {
        bail!("empty byte size");
    }
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: u64 = num
        .parse()
        .with_context(|| format!("invalid byte size '{s}'"))?;
    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "kb" | "k" => 1024,
        "mb" | "m" => 1024 * 1024,
        "gb" | "g" => 1024 * 1024 * 1024,
        other => bail!("invalid byte size unit '{other}' in '{s}'"),
    };
    value
        .checked_mul(multiplier)
        .with_context(|| format!("byte size '{s}' overflows"))
}
