//! Shared Conduit data model types.
//!
//! This crate is dependency-boundary-safe for both the engine and the
//! connector SDK: it carries the record model, the mergeable run statistics,
//! and the framework error taxonomy, and nothing that executes.

pub mod column;
pub mod communication;
pub mod error;
pub mod ids;
pub mod record;

pub use column::{Column, ColumnKind, ConversionError};
pub use communication::{Communication, Counters, State};
pub use error::{ErrorCategory, Failure};
pub use ids::{TaskGroupId, TaskId};
pub use record::{Message, Record, RecordError};
