//! Name-to-factory lookup for source and sink connectors and job handlers.

use std::collections::BTreeMap;

use conduit_sdk::{ConnectorError, JobHandler, SinkConnector, SourceConnector};

use crate::connectors::{StreamSink, StreamSource};
use crate::errors::EngineError;

pub type SourceFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn SourceConnector>, ConnectorError> + Send + Sync>;
pub type SinkFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn SinkConnector>, ConnectorError> + Send + Sync>;
pub type HandlerFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn JobHandler>, ConnectorError> + Send + Sync>;

/// Connectors available to a job, keyed by the name used in `reader.use` /
/// `writer.use`.
#[derive(Default)]
pub struct ConnectorRegistry {
    sources: BTreeMap<String, SourceFactory>,
    sinks: BTreeMap<String, SinkFactory>,
    handlers: BTreeMap<String, HandlerFactory>,
}

impl ConnectorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in `stream` source and sink.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_source("stream", |params| {
            Ok(Box::new(StreamSource::from_params(params)?) as Box<dyn SourceConnector>)
        });
        registry.register_sink("stream", |params| {
            Ok(Box::new(StreamSink::from_params(params)?) as Box<dyn SinkConnector>)
        });
        registry
    }

    /// Register a source factory, replacing any previous one of that name.
    pub fn register_source<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn SourceConnector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.sources.insert(name.into(), Box::new(factory));
    }

    /// Register a sink factory, replacing any previous one of that name.
    pub fn register_sink<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn SinkConnector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.sinks.insert(name.into(), Box::new(factory));
    }

    /// Register a job handler factory, replacing any previous one of that name.
    pub fn register_handler<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn JobHandler>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(name.into(), Box::new(factory));
    }

    /// Build the source connector `name` from its parameters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PluginInit`] if `name` is unknown or the
    /// factory rejects `params`.
    pub fn source(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<Box<dyn SourceConnector>, EngineError> {
        let factory = self.sources.get(name).ok_or_else(|| {
            EngineError::PluginInit(format!(
                "unknown reader '{}' (available: {})",
                name,
                self.source_names().join(", ")
            ))
        })?;
        factory(params).map_err(|e| EngineError::PluginInit(format!("reader '{name}': {e}")))
    }

    /// Build the sink connector `name` from its parameters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PluginInit`] if `name` is unknown or the
    /// factory rejects `params`.
    pub fn sink(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<Box<dyn SinkConnector>, EngineError> {
        let factory = self.sinks.get(name).ok_or_else(|| {
            EngineError::PluginInit(format!(
                "unknown writer '{}' (available: {})",
                name,
                self.sink_names().join(", ")
            ))
        })?;
        factory(params).map_err(|e| EngineError::PluginInit(format!("writer '{name}': {e}")))
    }

    /// Build the job handler `name` from its parameters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PluginInit`] if `name` is unknown or the
    /// factory rejects `params`.
    pub fn handler(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<Box<dyn JobHandler>, EngineError> {
        let factory = self.handlers.get(name).ok_or_else(|| {
            EngineError::PluginInit(format!(
                "unknown job handler '{}' (available: {})",
                name,
                self.handler_names().join(", ")
            ))
        })?;
        factory(params).map_err(|e| EngineError::PluginInit(format!("job handler '{name}': {e}")))
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.keys().map(String::as_str).collect()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("sources", &self.source_names())
            .field("sinks", &self.sink_names())
            .field("handlers", &self.handler_names())
            .finish()
    }
}
