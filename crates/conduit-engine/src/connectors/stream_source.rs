//! `stream` source: emits synthetic records built from column templates.

use conduit_sdk::prelude::*;
use conduit_types::ConversionError;
use serde::{Deserialize, Serialize};

const NAME: &str = "stream";

/// One column template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamColumn {
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    #[serde(default)]
    pub value: serde_json::Value,
    /// Step added per emitted record; `long` columns only.
    #[serde(default)]
    pub incr: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamSourceConfig {
    pub columns: Vec<StreamColumn>,
    pub record_count: u64,
    /// Position of this slice's first record within the whole job.
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct StreamSource {
    config: StreamSourceConfig,
}

impl StreamSource {
    /// # Errors
    ///
    /// Returns a `config` error if the parameters do not describe at least
    /// one column or use `incr` on a non-`long` column.
    pub fn from_params(params: &serde_json::Value) -> Result<Self, ConnectorError> {
        let config: StreamSourceConfig = parse_config(NAME, params)?;
        validate(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StreamSourceConfig {
        &self.config
    }
}

fn validate(config: &StreamSourceConfig) -> Result<(), ConnectorError> {
    if config.columns.is_empty() {
        return Err(ConnectorError::config(
            "MISSING_COLUMNS",
            "stream: at least one column is required",
        ));
    }
    if let Some((index, column)) = config
        .columns
        .iter()
        .enumerate()
        .find(|(_, c)| c.incr.is_some() && c.kind != ColumnKind::Long)
    {
        return Err(ConnectorError::config(
            "INVALID_INCR",
            format!(
                "stream: column {} is {}, incr is only supported on long columns",
                index, column.kind
            ),
        ));
    }
    Ok(())
}

impl SourceConnector for StreamSource {
    /// Divide `record_count` into `advice` slices; the first slices take the
    /// remainder.
    fn split(&self, advice: usize) -> Result<Vec<serde_json::Value>, ConnectorError> {
        let slices = advice.max(1) as u64;
        let base = self.config.record_count / slices;
        let remainder = self.config.record_count % slices;
        let mut offset = self.config.offset;
        let mut out = Vec::with_capacity(slices as usize);
        for i in 0..slices {
            let record_count = base + u64::from(i < remainder);
            let slice = StreamSourceConfig {
                columns: self.config.columns.clone(),
                record_count,
                offset,
            };
            offset += record_count;
            out.push(serde_json::to_value(&slice).map_err(|e| {
                ConnectorError::internal("SPLIT_SERIALIZE", format!("stream: {e}"))
            })?);
        }
        Ok(out)
    }

    fn create_task(&self, params: &serde_json::Value) -> Result<Box<dyn SourceTask>, ConnectorError> {
        let config: StreamSourceConfig = parse_config(NAME, params)?;
        validate(&config)?;
        Ok(Box::new(StreamSourceTask { config }))
    }
}

struct StreamSourceTask {
    config: StreamSourceConfig,
}

impl StreamSourceTask {
    fn templates(&self) -> Result<Vec<Column>, ConversionError> {
        self.config
            .columns
            .iter()
            .map(|c| Column::from_json(&c.value).convert(c.kind))
            .collect()
    }

    fn raw_record(&self) -> Record {
        self.config
            .columns
            .iter()
            .map(|c| Column::from_json(&c.value))
            .collect::<Vec<_>>()
            .into()
    }

    fn build(
        &self,
        sender: &dyn RecordSender,
        templates: &[Column],
        position: u64,
    ) -> Result<Record, ConnectorError> {
        let mut record = sender.create_record();
        for (template, column) in templates.iter().zip(&self.config.columns) {
            let value = match (column.incr, template) {
                (Some(step), Column::Long(start)) => {
                    Column::Long(start.wrapping_add(step.wrapping_mul(position as i64)))
                }
                (Some(step), Column::Null) => Column::Long(step.wrapping_mul(position as i64)),
                _ => template.clone(),
            };
            record.push_column(value)?;
        }
        Ok(record)
    }
}

impl SourceTask for StreamSourceTask {
    fn start_read(&mut self, sender: &mut dyn RecordSender, ctx: &TaskContext) -> Result<(), ConnectorError> {
        let templates = self.templates();
        if let Err(e) = &templates {
            tracing::warn!(
                task = ctx.task_id().get(),
                error = %e,
                "Column template conversion failed, every record is dirty"
            );
        }

        for i in 0..self.config.record_count {
            if ctx.is_cancelled() {
                return Err(ConnectorError::cancelled("TASK_CANCELLED", "stream reader cancelled"));
            }
            match &templates {
                Ok(columns) => {
                    let record = self.build(sender, columns, self.config.offset + i)?;
                    sender.send_to_writer(record)?;
                }
                Err(e) => ctx.collector().collect_dirty_record(
                    &self.raw_record(),
                    Some(e),
                    Some("column template conversion failed"),
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct VecSender {
        records: Vec<Record>,
    }

    impl RecordSender for VecSender {
        fn send_to_writer(&mut self, record: Record) -> Result<(), ConnectorError> {
            self.records.push(record);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), ConnectorError> {
            Ok(())
        }

        fn terminate(&mut self) -> Result<(), ConnectorError> {
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    #[derive(Default)]
    struct CountingCollector {
        dirty: Mutex<u64>,
    }

    impl TaskCollector for CountingCollector {
        fn collect_dirty_record(
            &self,
            _record: &Record,
            _cause: Option<&(dyn std::error::Error + 'static)>,
            _message: Option<&str>,
        ) {
            *self.dirty.lock().unwrap() += 1;
        }

        fn collect_message(&self, _key: &str, _value: &str) {}
    }

    fn ctx(collector: Arc<CountingCollector>) -> TaskContext {
        TaskContext::new(
            "test",
            conduit_types::TaskGroupId::new(0),
            conduit_types::TaskId::new(0),
            CancellationToken::new(),
            collector,
        )
    }

    fn run(params: serde_json::Value) -> (Vec<Record>, u64) {
        let source = StreamSource::from_params(&params).unwrap();
        let slice = source.split(1).unwrap().remove(0);
        let mut task = source.create_task(&slice).unwrap();
        let collector = Arc::new(CountingCollector::default());
        let mut sender = VecSender::default();
        task.start_read(&mut sender, &ctx(Arc::clone(&collector))).unwrap();
        let dirty = *collector.dirty.lock().unwrap();
        (sender.records, dirty)
    }

    #[test]
    fn test_split_spreads_remainder_first() {
        let source = StreamSource::from_params(&serde_json::json!({
            "columns": [{ "type": "long", "value": 1 }],
            "record_count": 10,
        }))
        .unwrap();
        let slices = source.split(3).unwrap();
        let counts: Vec<u64> = slices
            .iter()
            .map(|s| s["record_count"].as_u64().unwrap())
            .collect();
        assert_eq!(counts, vec![4, 3, 3]);
        let offsets: Vec<u64> = slices.iter().map(|s| s["offset"].as_u64().unwrap()).collect();
        assert_eq!(offsets, vec![0, 4, 7]);
    }

    #[test]
    fn test_emits_converted_templates() {
        let (records, dirty) = run(serde_json::json!({
            "columns": [
                { "type": "long", "value": "42" },
                { "type": "string", "value": "hello" },
                { "type": "date", "value": "2024-02-29" },
            ],
            "record_count": 3,
        }));
        assert_eq!(dirty, 0);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].column(0), Some(&Column::Long(42)));
        assert_eq!(records[2].column(1), Some(&Column::String("hello".into())));
        assert_eq!(records[0].column(2).unwrap().kind(), ColumnKind::Date);
    }

    #[test]
    fn test_incr_column_counts_from_offset() {
        let source = StreamSource::from_params(&serde_json::json!({
            "columns": [{ "type": "long", "value": 100, "incr": 2 }],
            "record_count": 4,
        }))
        .unwrap();
        let slices = source.split(2).unwrap();
        let mut task = source.create_task(&slices[1]).unwrap();
        let mut sender = VecSender::default();
        task.start_read(&mut sender, &ctx(Arc::new(CountingCollector::default())))
            .unwrap();
        let values: Vec<i64> = sender
            .records
            .iter()
            .map(|r| r.column(0).unwrap().as_long().unwrap())
            .collect();
        assert_eq!(values, vec![104, 106]);
    }

    #[test]
    fn test_bad_template_collects_dirty_records() {
        let (records, dirty) = run(serde_json::json!({
            "columns": [{ "type": "long", "value": "not-a-number" }],
            "record_count": 5,
        }));
        assert!(records.is_empty());
        assert_eq!(dirty, 5);
    }

    #[test]
    fn test_config_errors() {
        let err = StreamSource::from_params(&serde_json::json!({
            "columns": [],
            "record_count": 1,
        }))
        .unwrap_err();
        assert_eq!(err.code, "MISSING_COLUMNS");

        let err = StreamSource::from_params(&serde_json::json!({
            "columns": [{ "type": "string", "value": "a", "incr": 1 }],
            "record_count": 1,
        }))
        .unwrap_err();
        assert_eq!(err.code, "INVALID_INCR");

        let err = StreamSource::from_params(&serde_json::json!({ "columns": [] })).unwrap_err();
        assert_eq!(err.code, "INVALID_CONFIG");
    }

    #[test]
    fn test_cancelled_reader_stops() {
        let source = StreamSource::from_params(&serde_json::json!({
            "columns": [{ "type": "long", "value": 1 }],
            "record_count": 1000,
        }))
        .unwrap();
        let mut task = source.create_task(&source.split(1).unwrap()[0]).unwrap();
        let context = ctx(Arc::new(CountingCollector::default()));
        context.cancellation().cancel();
        let mut sender = VecSender::default();
        let err = task.start_read(&mut sender, &context).unwrap_err();
        assert!(err.is_cancelled());
        assert!(sender.records.is_empty());
    }
}
