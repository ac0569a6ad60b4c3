//! Source and sink connector traits.
//!
//! A connector has a job-level half ([`SourceConnector`] / [`SinkConnector`])
//! that validates, prepares, and splits the work, and a task-level half
//! ([`SourceTask`] / [`SinkTask`]) created once per split and per attempt.
//! Lifecycle hooks default to no-ops; the engine calls them in order
//! `pre_check` (dry run only), `prepare`, task execution, `post`, and finally
//! `destroy`, which always runs.

use conduit_types::Communication;
use serde::de::DeserializeOwned;

use crate::context::TaskContext;
use crate::errors::ConnectorError;
use crate::transport::{RecordReceiver, RecordSender};

/// Deserialize a connector's JSON parameters into its typed config.
///
/// # Errors
///
/// Returns a `config` error naming the connector if the parameters do not
/// match `C`.
pub fn parse_config<C: DeserializeOwned>(
    connector: &str,
    params: &serde_json::Value,
) -> Result<C, ConnectorError> {
    serde_json::from_value(params.clone()).map_err(|e| {
        ConnectorError::config("INVALID_CONFIG", format!("{connector}: {e}"))
    })
}

/// Job-level half of a source connector.
pub trait SourceConnector: Send + Sync {
    fn pre_check(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn prepare(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Split the read into task parameter blocks. `advice` is the desired
    /// parallelism; connectors may return more or fewer.
    fn split(&self, advice: usize) -> Result<Vec<serde_json::Value>, ConnectorError>;

    fn create_task(&self, params: &serde_json::Value) -> Result<Box<dyn SourceTask>, ConnectorError>;

    fn post(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn destroy(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Job-level half of a sink connector.
pub trait SinkConnector: Send + Sync {
    fn pre_check(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn prepare(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Split the write into exactly `mandatory` task parameter blocks.
    fn split(&self, mandatory: usize) -> Result<Vec<serde_json::Value>, ConnectorError>;

    fn create_task(&self, params: &serde_json::Value) -> Result<Box<dyn SinkTask>, ConnectorError>;

    fn post(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn destroy(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// One reader instance, bound to one split.
pub trait SourceTask: Send {
    fn prepare(&mut self, _ctx: &TaskContext) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn start_read(
        &mut self,
        sender: &mut dyn RecordSender,
        ctx: &TaskContext,
    ) -> Result<(), ConnectorError>;

    fn post(&mut self, _ctx: &TaskContext) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// One writer instance, bound to one split.
pub trait SinkTask: Send {
    fn prepare(&mut self, _ctx: &TaskContext) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn start_write(
        &mut self,
        receiver: &mut dyn RecordReceiver,
        ctx: &TaskContext,
    ) -> Result<(), ConnectorError>;

    fn post(&mut self, _ctx: &TaskContext) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Whether a failed attempt of this task may be retried in place.
    fn supports_fail_over(&self) -> bool {
        false
    }
}

/// Job-level hook run around a whole job, outside any connector.
///
/// `pre_handle` runs after validation and before the connectors are built;
/// an error aborts the job. `post_handle` runs after both connectors' `post`
/// on a job that is still SUCCEEDED; an error fails the job.
pub trait JobHandler: Send + Sync {
    fn pre_handle(&self, _job: &str) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn post_handle(&self, _job: &str, _communication: &Communication) -> Result<(), ConnectorError> {
        Ok(())
    }
}
