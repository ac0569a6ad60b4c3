//! `stream` sink: drains records and optionally prints them to stdout.

use std::io::{self, BufWriter, Write};

use conduit_sdk::prelude::*;
use serde::{Deserialize, Serialize};

const NAME: &str = "stream";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamSinkConfig {
    #[serde(default)]
    pub print: bool,
    #[serde(default = "default_field_delimiter")]
    pub field_delimiter: String,
}

fn default_field_delimiter() -> String {
    ",".to_string()
}

impl Default for StreamSinkConfig {
    fn default() -> Self {
        Self {
            print: false,
            field_delimiter: default_field_delimiter(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSink {
    config: StreamSinkConfig,
}

impl StreamSink {
    /// # Errors
    ///
    /// Returns a `config` error if the parameters do not match
    /// [`StreamSinkConfig`].
    pub fn from_params(params: &serde_json::Value) -> Result<Self, ConnectorError> {
        Ok(Self {
            config: parse_config(NAME, params)?,
        })
    }

    pub fn config(&self) -> &StreamSinkConfig {
        &self.config
    }
}

impl SinkConnector for StreamSink {
    fn split(&self, mandatory: usize) -> Result<Vec<serde_json::Value>, ConnectorError> {
        let params = serde_json::to_value(&self.config)
            .map_err(|e| ConnectorError::internal("SPLIT_SERIALIZE", format!("stream: {e}")))?;
        Ok(vec![params; mandatory])
    }

    fn create_task(&self, params: &serde_json::Value) -> Result<Box<dyn SinkTask>, ConnectorError> {
        Ok(Box::new(StreamSinkTask {
            config: parse_config(NAME, params)?,
        }))
    }
}

struct StreamSinkTask {
    config: StreamSinkConfig,
}

impl SinkTask for StreamSinkTask {
    fn start_write(&mut self, receiver: &mut dyn RecordReceiver, _ctx: &TaskContext) -> Result<(), ConnectorError> {
        if !self.config.print {
            while receiver.get_from_reader()?.is_some() {}
            return Ok(());
        }
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        drain_to(receiver, &mut out, &self.config.field_delimiter)
    }
}

/// Write every remaining record as one delimited line.
fn drain_to(
    receiver: &mut dyn RecordReceiver,
    out: &mut impl Write,
    delimiter: &str,
) -> Result<(), ConnectorError> {
    let io_err = |e: io::Error| ConnectorError::io("STDOUT_WRITE", e.to_string());
    while let Some(record) = receiver.get_from_reader()? {
        writeln!(out, "{}", format_record(&record, delimiter)).map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}

fn format_record(record: &Record, delimiter: &str) -> String {
    record
        .columns()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(delimiter)
}
