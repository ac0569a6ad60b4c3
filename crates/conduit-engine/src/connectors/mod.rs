//! Built-in connectors registered by [`crate::ConnectorRegistry::with_builtins`].

pub mod stream_sink;
pub mod stream_source;

pub use stream_sink::{StreamSink, StreamSinkConfig};
pub use stream_source::{StreamColumn, StreamSource, StreamSourceConfig};
