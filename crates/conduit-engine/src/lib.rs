//! Batch job execution engine for Conduit.
//!
//! A job is split into reader/writer task pairs joined by bounded channels,
//! packed into task groups, and scheduled on OS threads. Statistics flow up
//! from tasks to groups to the job, where dirty-record limits are enforced.

pub mod assign;
pub mod channel;
pub mod collector;
pub mod communicator;
pub mod config;
pub mod connectors;
pub mod error_limit;
pub mod errors;
pub mod exchanger;
pub mod executor;
pub mod job;
pub mod monitor;
pub mod registry;
pub mod report;
pub mod result;
pub mod scheduler;
pub mod task_group;

// Re-export public API for convenience
pub use errors::EngineError;
pub use job::JobContainer;
pub use registry::ConnectorRegistry;
pub use result::{JobCounts, JobOutcome, JobResult};
pub use scheduler::KillHandle;
