//! Buffered [`RecordSender`]/[`RecordReceiver`] endpoints over a [`Channel`].

use std::collections::VecDeque;
use std::sync::Arc;

use conduit_sdk::{ConnectorError, RecordReceiver, RecordSender, TaskCollector};
use conduit_types::{Message, Record};

use crate::channel::{Channel, ChannelError};

impl From<ChannelError> for ConnectorError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Aborted => ConnectorError::cancelled("CHANNEL_ABORTED", e.to_string()),
            ChannelError::Cancelled => ConnectorError::cancelled("TASK_CANCELLED", e.to_string()),
            ChannelError::Closed => ConnectorError::internal("CHANNEL_CLOSED", e.to_string()),
            ChannelError::Oversized { .. } => {
                ConnectorError::internal("CHANNEL_OVERSIZED", e.to_string())
            }
        }
    }
}

fn shut_down_error() -> ConnectorError {
    ConnectorError::cancelled("SHUT_DOWN_TASK", "task exchanger has been shut down")
}

/// Reader-side endpoint that batches records before pushing.
pub struct BufferedSender {
    channel: Arc<Channel>,
    collector: Arc<dyn TaskCollector>,
    buffer: Vec<Record>,
    buffer_bytes: u64,
    shut_down: bool,
}

impl BufferedSender {
    pub fn new(channel: Arc<Channel>, collector: Arc<dyn TaskCollector>) -> Self {
        let buffer_size = channel.config().buffer_size;
        Self {
            channel,
            collector,
            buffer: Vec::with_capacity(buffer_size),
            buffer_bytes: 0,
            shut_down: false,
        }
    }

    fn is_full_with(&self, record: &Record) -> bool {
        let config = self.channel.config();
        self.buffer.len() >= config.buffer_size
            || self.buffer_bytes + record.memory_size() as u64 > config.byte_capacity
    }
}

impl RecordSender for BufferedSender {
    fn send_to_writer(&mut self, record: Record) -> Result<(), ConnectorError> {
        if self.shut_down {
            return Err(shut_down_error());
        }
        let byte_capacity = self.channel.config().byte_capacity;
        if record.memory_size() as u64 > byte_capacity {
            let message = format!(
                "record of {} bytes exceeds channel byte capacity {}",
                record.memory_size(),
                byte_capacity
            );
            self.collector
                .collect_dirty_record(&record, None, Some(&message));
            return Ok(());
        }
        if self.is_full_with(&record) {
            self.flush()?;
        }
        self.buffer_bytes += record.memory_size() as u64;
        self.buffer.push(record);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ConnectorError> {
        if self.shut_down {
            return Err(shut_down_error());
        }
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffer);
        self.buffer_bytes = 0;
        self.channel.push_batch(batch)?;
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), ConnectorError> {
        self.flush()?;
        self.channel.close();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }
}

/// Writer-side endpoint that pulls batches and hands out one record at a time.
pub struct BufferedReceiver {
    channel: Arc<Channel>,
    buffer: VecDeque<Message>,
    shut_down: bool,
}

impl BufferedReceiver {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            buffer: VecDeque::new(),
            shut_down: false,
        }
    }
}

impl RecordReceiver for BufferedReceiver {
    fn get_from_reader(&mut self) -> Result<Option<Record>, ConnectorError> {
        if self.shut_down {
            return Err(shut_down_error());
        }
        if self.buffer.is_empty() {
            self.buffer = self.channel.pull_batch()?;
        }
        match self.buffer.pop_front() {
            Some(Message::Data(record)) => Ok(Some(record)),
            Some(Message::Terminate) | None => {
                // stay terminated on repeated calls
                self.buffer.push_back(Message::Terminate);
                Ok(None)
            }
        }
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::communicator::CommunicationHandle;
    use conduit_sdk::CancellationToken;
    use conduit_types::Column;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCollector {
        dirty: Mutex<Vec<String>>,
    }

    impl TaskCollector for RecordingCollector {
        fn collect_dirty_record(
            &self,
            _record: &Record,
            _cause: Option<&(dyn std::error::Error + 'static)>,
            message: Option<&str>,
        ) {
            self.dirty
                .lock()
                .unwrap()
                .push(message.unwrap_or_default().to_string());
        }

        fn collect_message(&self, _key: &str, _value: &str) {}
    }

    fn setup(buffer_size: usize, byte_capacity: u64) -> (Arc<Channel>, Arc<RecordingCollector>) {
        let config = ChannelConfig {
            buffer_size,
            byte_capacity,
            ..ChannelConfig::default()
        };
        let channel = Arc::new(Channel::new(
            config,
            CommunicationHandle::new(),
            CancellationToken::new(),
        ));
        (channel, Arc::new(RecordingCollector::default()))
    }

    #[test]
    fn test_sender_buffers_until_buffer_size() {
        let (channel, collector) = setup(3, 1 << 20);
        let mut sender = BufferedSender::new(Arc::clone(&channel), collector);
        for i in 0..3 {
            sender.send_to_writer(Record::from(vec![Column::Long(i)])).unwrap();
        }
        assert_eq!(channel.len(), 0);
        sender.send_to_writer(Record::from(vec![Column::Long(3)])).unwrap();
        assert_eq!(channel.len(), 3);
        sender.terminate().unwrap();
        assert_eq!(channel.len(), 4);
        assert!(channel.is_closed());
    }

    #[test]
    fn test_sender_flushes_before_byte_budget() {
        let one = Record::from(vec![Column::Bytes(vec![0; 10])]).memory_size() as u64;
        let (channel, collector) = setup(100, one * 2);
        let mut sender = BufferedSender::new(Arc::clone(&channel), collector);
        sender.send_to_writer(Record::from(vec![Column::Bytes(vec![0; 10])])).unwrap();
        sender.send_to_writer(Record::from(vec![Column::Bytes(vec![0; 10])])).unwrap();
        assert_eq!(channel.len(), 0);
        // third record would overflow the byte budget, so the first two are pushed
        sender.send_to_writer(Record::from(vec![Column::Bytes(vec![0; 10])])).unwrap();
        assert_eq!(channel.len(), 2);
        assert_eq!(channel.bytes(), one * 2);
    }

    #[test]
    fn test_oversized_record_becomes_dirty() {
        let (channel, collector) = setup(4, 64);
        let mut sender = BufferedSender::new(Arc::clone(&channel), collector.clone());
        sender
            .send_to_writer(Record::from(vec![Column::Bytes(vec![0; 100])]))
            .unwrap();
        sender.terminate().unwrap();
        assert_eq!(channel.len(), 0);
        let dirty = collector.dirty.lock().unwrap();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].contains("exceeds channel byte capacity"));
    }

    #[test]
    fn test_receiver_maps_terminate_to_none() {
        let (channel, collector) = setup(8, 1 << 20);
        let mut sender = BufferedSender::new(Arc::clone(&channel), collector);
        sender.send_to_writer(Record::from(vec![Column::Long(1)])).unwrap();
        sender.send_to_writer(Record::from(vec![Column::Long(2)])).unwrap();
        sender.terminate().unwrap();

        let mut receiver = BufferedReceiver::new(channel);
        let first = receiver.get_from_reader().unwrap().unwrap();
        assert_eq!(first.column(0), Some(&Column::Long(1)));
        assert!(receiver.get_from_reader().unwrap().is_some());
        assert!(receiver.get_from_reader().unwrap().is_none());
        assert!(receiver.get_from_reader().unwrap().is_none());
    }

    #[test]
    fn test_shutdown_rejects_calls() {
        let (channel, collector) = setup(8, 1 << 20);
        let mut sender = BufferedSender::new(Arc::clone(&channel), collector);
        sender.shutdown();
        let err = sender.send_to_writer(Record::new()).unwrap_err();
        assert_eq!(err.code, "SHUT_DOWN_TASK");

        let mut receiver = BufferedReceiver::new(channel);
        receiver.shutdown();
        assert!(receiver.get_from_reader().is_err());
    }

    #[test]
    fn test_aborted_channel_surfaces_as_cancelled() {
        let (channel, _) = setup(8, 1 << 20);
        channel.abort();
        let mut receiver = BufferedReceiver::new(channel);
        let err = receiver.get_from_reader().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.code, "CHANNEL_ABORTED");
    }
}
