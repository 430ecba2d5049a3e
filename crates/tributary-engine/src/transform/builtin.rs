//! Built-in transform steps.

use std::collections::BTreeMap;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tributary_types::error::ConnectorError;
use tributary_types::message::{Batch, Part};

use super::Transform;

fn parse_config<T: DeserializeOwned>(step: &str, config: &serde_json::Value) -> Result<T, ConnectorError> {
    let value = if config.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        config.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| ConnectorError::config("INVALID_CONFIG", format!("{step}: {e}")))
}

/// Passes batches through unchanged.
#[derive(Debug, Default)]
pub struct Noop;

impl Transform for Noop {
    fn name(&self) -> &str {
        "noop"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ConnectorError> {
        Ok(vec![batch])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SplitConfig {
    #[serde(default = "default_split_size")]
    size: usize,
}

fn default_split_size() -> usize {
    1
}

/// Breaks a batch into consecutive chunks of at most `size` parts.
#[derive(Debug)]
pub struct Split {
    size: usize,
}

impl Split {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let cfg: SplitConfig = parse_config("split", config)?;
        if cfg.size == 0 {
            return Err(ConnectorError::config("INVALID_CONFIG", "split: size must be at least 1"));
        }
        Ok(Self::new(cfg.size))
    }
}

impl Transform for Split {
    fn name(&self) -> &str {
        "split"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ConnectorError> {
        if batch.len() <= self.size {
            return Ok(vec![batch]);
        }
        let mut out = Vec::with_capacity(batch.len().div_ceil(self.size));
        let mut current = Batch::new();
        for part in batch {
            current.push(part);
            if current.len() == self.size {
                out.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArchiveConfig {
    #[serde(default = "default_separator")]
    separator: String,
}

fn default_separator() -> String {
    "\n".to_string()
}

/// Joins every part of a batch into a single part. Metadata of the first
/// part is kept.
#[derive(Debug)]
pub struct Archive {
    separator: Vec<u8>,
}

impl Archive {
    pub fn new(separator: &str) -> Self {
        Self {
            separator: separator.as_bytes().to_vec(),
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let cfg: ArchiveConfig = parse_config("archive", config)?;
        Ok(Self::new(&cfg.separator))
    }
}

impl Transform for Archive {
    fn name(&self) -> &str {
        "archive"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ConnectorError> {
        if batch.len() <= 1 {
            return Ok(vec![batch]);
        }
        let capacity = batch.byte_size() + self.separator.len() * (batch.len() - 1);
        let mut joined = BytesMut::with_capacity(capacity);
        let mut merged: Option<Part> = None;
        for (i, part) in batch.iter().enumerate() {
            if i > 0 {
                joined.extend_from_slice(&self.separator);
            }
            joined.extend_from_slice(part.as_bytes());
            if merged.is_none() {
                merged = Some(part.clone());
            }
        }
        let mut merged = merged.unwrap_or_default();
        merged.set_bytes(joined.freeze());
        Ok(vec![Batch::from_parts(vec![merged])])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetadataConfig {
    #[serde(default)]
    set: BTreeMap<String, String>,
    #[serde(default)]
    remove: Vec<String>,
}

/// Sets and removes metadata keys on every part.
#[derive(Debug)]
pub struct Metadata {
    set: BTreeMap<String, String>,
    remove: Vec<String>,
}

impl Metadata {
    pub fn new(set: BTreeMap<String, String>) -> Self {
        Self {
            set,
            remove: Vec::new(),
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConnectorError> {
        let cfg: MetadataConfig = parse_config("metadata", config)?;
        Ok(Self {
            set: cfg.set,
            remove: cfg.remove,
        })
    }
}

impl Transform for Metadata {
    fn name(&self) -> &str {
        "metadata"
    }

    fn process(&self, mut batch: Batch) -> Result<Vec<Batch>, ConnectorError> {
        for part in batch.iter_mut() {
            for key in &self.remove {
                part.metadata_remove(key);
            }
            for (key, value) in &self.set {
                part.metadata_set(key.clone(), value.clone());
            }
        }
        Ok(vec![batch])
    }
}

/// Removes parts with an empty payload; drops the batch if none remain.
#[derive(Debug, Default)]
pub struct DropEmpty;

impl Transform for DropEmpty {
    fn name(&self) -> &str {
        "drop_empty"
    }

    fn process(&self, batch: Batch) -> Result<Vec<Batch>, ConnectorError> {
        let kept: Batch = batch.into_iter().filter(|p| p.byte_len() > 0).collect();
        if kept.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![kept])
        }
    }
}
