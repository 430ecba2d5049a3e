//! Pipeline YAML loading.
//!
//! Before YAML parsing, `${NAME}` is replaced with the value of environment
//! variable `NAME` and `${NAME:fallback}` uses `fallback` when `NAME` is unset
//! or empty. `$${NAME}` is left in place as the literal `${NAME}`.

use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::types::PipelineConfig;

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\$)?\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("valid interpolation regex")
});

fn lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Expand environment references in a pipeline document.
///
/// # Errors
///
/// Fails listing every referenced variable that is unset and has no fallback.
pub fn interpolate_env(input: &str) -> Result<Cow<'_, str>> {
    let mut missing: Vec<String> = Vec::new();
    let expanded = INTERPOLATION.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[2];
        if caps.get(1).is_some() {
            return caps[0][1..].to_string();
        }
        match (lookup(name), caps.get(3)) {
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        anyhow::bail!(
            "Unset environment variable(s) without a fallback: {}",
            missing.join(", ")
        );
    }
    Ok(expanded)
}

/// Parse a pipeline document held in memory.
///
/// # Errors
///
/// Fails on unresolved environment references or malformed YAML.
pub fn parse_pipeline_str(yaml: &str) -> Result<PipelineConfig> {
    let expanded = interpolate_env(yaml)?;
    serde_yaml::from_str(&expanded).context("Pipeline YAML does not match the expected layout")
}

/// Parse a pipeline file.
///
/// # Errors
///
/// Fails if the file is unreadable or its content does not parse.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read pipeline file {}", path.display()))?;
    parse_pipeline_str(&content)
}
