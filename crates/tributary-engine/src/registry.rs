//! Name to constructor lookup for pipeline components.
//!
//! A [`Registry`] is built by the caller and passed to pipeline assembly;
//! there is no global plugin table.

use std::collections::BTreeMap;
use std::sync::Arc;

use tributary_types::error::ConnectorError;

use crate::adapter::Sink;
use crate::predicate::{Predicate, PredicateFactory};
use crate::source::SourceKind;
use crate::transform::builtin::{Archive, DropEmpty, Metadata, Noop, Split};
use crate::transform::Transform;

type SourceCtor = Box<dyn Fn(&serde_json::Value) -> Result<SourceKind, ConnectorError> + Send + Sync>;
type SinkCtor = Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Sink>, ConnectorError> + Send + Sync>;
type TransformCtor =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Transform>, ConnectorError> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    sources: BTreeMap<String, SourceCtor>,
    sinks: BTreeMap<String, SinkCtor>,
    transforms: BTreeMap<String, TransformCtor>,
    predicates: Option<Arc<dyn PredicateFactory>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("sinks", &self.sinks.keys().collect::<Vec<_>>())
            .field("transforms", &self.transforms.keys().collect::<Vec<_>>())
            .field("predicates", &self.predicates.is_some())
            .finish()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in transform steps.
    pub fn with_builtin_transforms() -> Self {
        let mut registry = Self::new();
        registry.register_transform("noop", |_| Ok(Box::new(Noop) as Box<dyn Transform>));
        registry.register_transform("split", |cfg| {
            Ok(Box::new(Split::from_config(cfg)?) as Box<dyn Transform>)
        });
        registry.register_transform("archive", |cfg| {
            Ok(Box::new(Archive::from_config(cfg)?) as Box<dyn Transform>)
        });
        registry.register_transform("metadata", |cfg| {
            Ok(Box::new(Metadata::from_config(cfg)?) as Box<dyn Transform>)
        });
        registry.register_transform("drop_empty", |_| {
            Ok(Box::new(DropEmpty) as Box<dyn Transform>)
        });
        registry
    }

    pub fn register_source<F>(&mut self, name: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> Result<SourceKind, ConnectorError> + Send + Sync + 'static,
    {
        self.sources.insert(name.into(), Box::new(ctor));
        self
    }

    pub fn register_sink<F>(&mut self, name: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Sink>, ConnectorError> + Send + Sync + 'static,
    {
        self.sinks.insert(name.into(), Box::new(ctor));
        self
    }

    pub fn register_transform<F>(&mut self, name: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Transform>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.transforms.insert(name.into(), Box::new(ctor));
        self
    }

    pub fn set_predicate_factory(&mut self, factory: Arc<dyn PredicateFactory>) -> &mut Self {
        self.predicates = Some(factory);
        self
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn has_sink(&self, name: &str) -> bool {
        self.sinks.contains_key(name)
    }

    pub fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    pub fn has_predicate_factory(&self) -> bool {
        self.predicates.is_some()
    }

    /// Registered input names, sorted.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Registered output names, sorted.
    pub fn sink_names(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }

    /// Registered transform step names, sorted.
    pub fn transform_names(&self) -> impl Iterator<Item = &str> {
        self.transforms.keys().map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns a config error if `name` is unknown or the constructor rejects `config`.
    pub fn build_source(&self, name: &str, config: &serde_json::Value) -> Result<SourceKind, ConnectorError> {
        let ctor = self.sources.get(name).ok_or_else(|| unknown("input", name))?;
        ctor(config)
    }

    /// # Errors
    ///
    /// Returns a config error if `name` is unknown or the constructor rejects `config`.
    pub fn build_sink(&self, name: &str, config: &serde_json::Value) -> Result<Arc<dyn Sink>, ConnectorError> {
        let ctor = self.sinks.get(name).ok_or_else(|| unknown("output", name))?;
        ctor(config)
    }

    /// # Errors
    ///
    /// Returns a config error if `name` is unknown or the constructor rejects `config`.
    pub fn build_transform(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Transform>, ConnectorError> {
        let ctor = self.transforms.get(name).ok_or_else(|| unknown("transform", name))?;
        ctor(config)
    }

    /// # Errors
    ///
    /// Returns a config error if no predicate factory is registered or the
    /// expression does not compile.
    pub fn build_predicate(&self, expression: &str) -> Result<Arc<dyn Predicate>, ConnectorError> {
        let factory = self.predicates.as_ref().ok_or_else(|| {
            ConnectorError::config(
                "NO_PREDICATE_EVALUATOR",
                "batching.check requires a predicate evaluator, none is registered",
            )
        })?;
        factory.build(expression)
    }
}

fn unknown(kind: &str, name: &str) -> ConnectorError {
    ConnectorError::config("UNKNOWN_COMPONENT", format!("unknown {kind} '{name}'"))
}
