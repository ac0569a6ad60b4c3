//! Connector SPI for Conduit.
//!
//! Connector authors implement [`SourceConnector`]/[`SourceTask`] or
//! [`SinkConnector`]/[`SinkTask`] and register a factory with the engine.

pub mod connector;
pub mod context;
pub mod errors;
pub mod prelude;
pub mod transport;

pub use connector::{parse_config, JobHandler, SinkConnector, SinkTask, SourceConnector, SourceTask};
pub use context::{sleep_cancellable, CancellationToken, TaskCollector, TaskContext};
pub use errors::{ConnectorError, ConnectorErrorKind};
pub use transport::{RecordReceiver, RecordSender};
