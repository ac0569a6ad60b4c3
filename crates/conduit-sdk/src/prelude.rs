//! Convenience re-exports for connector authors.
//!
//! ```ignore
//! use conduit_sdk::prelude::*;
//! ```

// Connector traits
pub use crate::connector::{parse_config, JobHandler, SinkConnector, SinkTask, SourceConnector, SourceTask};

// Context and transport
pub use crate::context::{sleep_cancellable, CancellationToken, TaskCollector, TaskContext};
pub use crate::transport::{RecordReceiver, RecordSender};

// Errors
pub use crate::errors::{ConnectorError, ConnectorErrorKind};

// Data model
pub use conduit_types::{Column, ColumnKind, Record};
