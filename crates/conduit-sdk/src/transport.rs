//! Record hand-off endpoints between a reader task and a writer task.

use conduit_types::Record;

use crate::errors::ConnectorError;

/// Producer-side endpoint given to a source task.
pub trait RecordSender {
    /// A new empty record for the reader to fill.
    fn create_record(&self) -> Record {
        Record::new()
    }

    /// Queue `record` for the writer. May block on transport backpressure.
    fn send_to_writer(&mut self, record: Record) -> Result<(), ConnectorError>;

    /// Push any locally buffered records into the transport.
    fn flush(&mut self) -> Result<(), ConnectorError>;

    /// Flush and signal end-of-stream to the writer.
    fn terminate(&mut self) -> Result<(), ConnectorError>;

    /// Stop accepting records; later calls fail.
    fn shutdown(&mut self);
}

/// Consumer-side endpoint given to a sink task.
pub trait RecordReceiver {
    /// The next record, or `None` once the reader has terminated the stream.
    fn get_from_reader(&mut self) -> Result<Option<Record>, ConnectorError>;

    /// Stop receiving; later calls fail.
    fn shutdown(&mut self);
}
