//! Local adapters available to pipelines run from the command line.

mod generate;
mod stdin;
mod stdout;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tributary_engine::adapter::Sink;
use tributary_engine::source::SourceKind;
use tributary_engine::Registry;
use tributary_types::error::ConnectorError;

pub use generate::Generate;
pub use stdin::Stdin;
pub use stdout::{Discard, Stdout};

/// Registry with the built-in transforms and every local adapter.
pub fn registry() -> Registry {
    let mut registry = Registry::with_builtin_transforms();
    registry
        .register_source("stdin", |cfg| {
            Ok(SourceKind::Serial(Box::new(Stdin::from_config(cfg)?)))
        })
        .register_source("generate", |cfg| {
            Ok(SourceKind::Concurrent(Box::new(Generate::from_config(cfg)?)))
        })
        .register_sink("stdout", |cfg| {
            Ok(Arc::new(Stdout::from_config(cfg)?) as Arc<dyn Sink>)
        })
        .register_sink("drop", |_| Ok(Arc::new(Discard) as Arc<dyn Sink>));
    registry
}

/// Deserialize an adapter's `config` block; a missing block means defaults.
fn parse_config<T: DeserializeOwned>(
    component: &str,
    config: &serde_json::Value,
) -> Result<T, ConnectorError> {
    let value = if config.is_null() {
        serde_json::json!({})
    } else {
        config.clone()
    };
    serde_json::from_value(value).map_err(|e| {
        ConnectorError::config("INVALID_CONFIG", format!("{component}: {e}"))
    })
}
