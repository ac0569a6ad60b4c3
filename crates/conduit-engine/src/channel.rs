//! Bounded single-producer/single-consumer record channel.
//!
//! Admission is controlled on two independent dimensions: buffered record
//! count and buffered memory bytes. Both are checked and reserved in one
//! critical section, so a batch is either admitted whole or waits whole.
//!
//! Blocking waits are bounded by a tick; each tick re-checks the task's
//! [`CancellationToken`]. [`Channel::abort`] wakes every waiter at once.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use conduit_sdk::{sleep_cancellable, CancellationToken};
use conduit_types::{Message, Record};

use crate::communicator::CommunicationHandle;
use crate::config::types::TransportConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel aborted")]
    Aborted,
    #[error("channel wait cancelled")]
    Cancelled,
    #[error("channel closed for writing")]
    Closed,
    #[error(
        "batch of {records} records / {bytes} bytes can never fit a channel of {capacity} records / {byte_capacity} bytes"
    )]
    Oversized {
        records: usize,
        bytes: u64,
        capacity: usize,
        byte_capacity: u64,
    },
}

/// Resolved channel limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub capacity: usize,
    pub byte_capacity: u64,
    pub buffer_size: usize,
    pub byte_speed: Option<u64>,
    pub record_speed: Option<u64>,
    pub flow_control_interval: Duration,
    pub wait_tick: Duration,
}

impl ChannelConfig {
    /// Resolve from the job's transport section.
    ///
    /// # Errors
    ///
    /// Returns an error if `byte_capacity` is not a valid size.
    pub fn from_transport(transport: &TransportConfig) -> Result<Self> {
        Ok(Self {
            capacity: transport.capacity.max(1),
            byte_capacity: transport.byte_capacity_bytes()?.max(1),
            buffer_size: transport.buffer_size.clamp(1, transport.capacity.max(1)),
            byte_speed: transport.byte_speed,
            record_speed: transport.record_speed,
            flow_control_interval: Duration::from_millis(transport.flow_control_interval_ms.max(1)),
            wait_tick: Duration::from_millis(transport.wait_tick_ms.max(1)),
        })
    }

    fn is_rate_limited(&self) -> bool {
        self.byte_speed.is_some() || self.record_speed.is_some()
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 2048,
            byte_capacity: 8 * 1024 * 1024,
            buffer_size: 32,
            byte_speed: None,
            record_speed: None,
            flow_control_interval: Duration::from_millis(1000),
            wait_tick: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    queue: VecDeque<Record>,
    /// Sum of `memory_size` over `queue`.
    bytes: u64,
    closed: bool,
    aborted: bool,
}

#[derive(Debug)]
struct FlowWindow {
    started: Instant,
    bytes: u64,
    records: u64,
}

/// Bounded FIFO between one reader task and one writer task.
#[derive(Debug)]
pub struct Channel {
    config: ChannelConfig,
    state: Mutex<ChannelState>,
    not_full: Condvar,
    not_empty: Condvar,
    stats: CommunicationHandle,
    cancel: CancellationToken,
    flow: Mutex<FlowWindow>,
}

impl Channel {
    pub fn new(config: ChannelConfig, stats: CommunicationHandle, cancel: CancellationToken) -> Self {
        Self {
            config,
            state: Mutex::new(ChannelState::default()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            stats,
            cancel,
            flow: Mutex::new(FlowWindow {
                started: Instant::now(),
                bytes: 0,
                records: 0,
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push one record, blocking while either capacity would be exceeded.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the channel is closed, aborted, the wait is
    /// cancelled, or the record alone exceeds a capacity.
    pub fn push(&self, record: Record) -> Result<(), ChannelError> {
        self.push_batch(vec![record])
    }

    /// Push a batch atomically: all records are admitted together.
    ///
    /// # Errors
    ///
    /// See [`Channel::push`].
    pub fn push_batch(&self, records: Vec<Record>) -> Result<(), ChannelError> {
        if records.is_empty() {
            return Ok(());
        }
        let count = records.len();
        let memory: u64 = records.iter().map(|r| r.memory_size() as u64).sum();
        let payload: u64 = records.iter().map(|r| r.byte_size() as u64).sum();
        if count > self.config.capacity || memory > self.config.byte_capacity {
            return Err(ChannelError::Oversized {
                records: count,
                bytes: memory,
                capacity: self.config.capacity,
                byte_capacity: self.config.byte_capacity,
            });
        }

        let wait_started = Instant::now();
        let mut state = self.lock();
        loop {
            if state.aborted {
                return Err(ChannelError::Aborted);
            }
            if state.closed {
                return Err(ChannelError::Closed);
            }
            if state.queue.len() + count <= self.config.capacity
                && state.bytes + memory <= self.config.byte_capacity
            {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            state = self
                .not_full
                .wait_timeout(state, self.config.wait_tick)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.queue.extend(records);
        state.bytes += memory;
        drop(state);
        self.not_empty.notify_all();

        let waited = duration_nanos(wait_started.elapsed());
        self.stats.update(|c| {
            c.counters.read_succeed_records += count as u64;
            c.counters.read_succeed_bytes += payload;
            c.counters.wait_writer_nanos += waited;
        });
        self.throttle(count as u64, payload)
    }

    /// Pull one message, blocking while empty.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Aborted`] or [`ChannelError::Cancelled`].
    pub fn pull(&self) -> Result<Message, ChannelError> {
        let mut batch = self.drain(1)?;
        Ok(batch.pop_front().unwrap_or(Message::Terminate))
    }

    /// Pull up to `buffer_size` messages in one critical section.
    ///
    /// Never returns an empty batch. `Message::Terminate` appears exactly when
    /// the channel is closed and the batch drained the last record.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Aborted`] or [`ChannelError::Cancelled`].
    pub fn pull_batch(&self) -> Result<VecDeque<Message>, ChannelError> {
        self.drain(self.config.buffer_size)
    }

    fn drain(&self, max: usize) -> Result<VecDeque<Message>, ChannelError> {
        let wait_started = Instant::now();
        let mut state = self.lock();
        loop {
            if state.aborted {
                return Err(ChannelError::Aborted);
            }
            if !state.queue.is_empty() || state.closed {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            state = self
                .not_empty
                .wait_timeout(state, self.config.wait_tick)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let take = max.max(1).min(state.queue.len());
        let mut out: VecDeque<Message> = VecDeque::with_capacity(take + 1);
        let mut memory = 0u64;
        let mut payload = 0u64;
        for record in state.queue.drain(..take) {
            memory += record.memory_size() as u64;
            payload += record.byte_size() as u64;
            out.push_back(Message::Data(record));
        }
        state.bytes -= memory;
        if state.closed && state.queue.is_empty() {
            out.push_back(Message::Terminate);
        }
        drop(state);
        self.not_full.notify_all();

        let waited = duration_nanos(wait_started.elapsed());
        self.stats.update(|c| {
            c.counters.write_received_records += take as u64;
            c.counters.write_received_bytes += payload;
            c.counters.wait_reader_nanos += waited;
        });
        Ok(out)
    }

    /// Mark end-of-stream. Buffered records remain pullable. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Fail every pending and future push/pull. Idempotent.
    pub fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Buffered memory bytes.
    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Sleep the producer when the current window runs ahead of the speed limits.
    fn throttle(&self, records: u64, bytes: u64) -> Result<(), ChannelError> {
        if !self.config.is_rate_limited() {
            return Ok(());
        }
        let sleep = {
            let mut window = self.flow.lock().unwrap_or_else(PoisonError::into_inner);
            window.records += records;
            window.bytes += bytes;
            let elapsed = window.started.elapsed();
            if elapsed < self.config.flow_control_interval {
                return Ok(());
            }
            let sleep = flow_control_sleep(
                elapsed,
                window.bytes,
                window.records,
                self.config.byte_speed,
                self.config.record_speed,
            );
            window.started = Instant::now();
            window.bytes = 0;
            window.records = 0;
            sleep
        };
        if !sleep.is_zero() && sleep_cancellable(&self.cancel, sleep) {
            return Err(ChannelError::Cancelled);
        }
        Ok(())
    }
}

/// How long a producer must pause so that `bytes`/`records` moved over
/// `elapsed` average down to the configured speeds.
pub(crate) fn flow_control_sleep(
    elapsed: Duration,
    bytes: u64,
    records: u64,
    byte_speed: Option<u64>,
    record_speed: Option<u64>,
) -> Duration {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1);
    let limit_sleep = |moved: u64, speed: Option<u64>| -> u64 {
        match speed {
            Some(speed) if speed > 0 => {
                let current = moved.saturating_mul(1000) / elapsed_ms;
                if current > speed {
                    (current.saturating_mul(elapsed_ms) / speed).saturating_sub(elapsed_ms)
                } else {
                    0
                }
            }
            _ => 0,
        }
    };
    let ms = limit_sleep(bytes, byte_speed).max(limit_sleep(records, record_speed));
    Duration::from_millis(ms)
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::Column;
    use std::sync::Arc;

    fn record(payload: usize) -> Record {
        Record::from(vec![Column::Bytes(vec![0u8; payload])])
    }

    fn channel(capacity: usize, byte_capacity: u64) -> Channel {
        let config = ChannelConfig {
            capacity,
            byte_capacity,
            buffer_size: capacity,
            wait_tick: Duration::from_millis(10),
            ..ChannelConfig::default()
        };
        Channel::new(config, CommunicationHandle::new(), CancellationToken::new())
    }

    #[test]
    fn test_push_pull_fifo_then_terminate() {
        let ch = channel(8, 1 << 20);
        for i in 0..3 {
            ch.push(Record::from(vec![Column::Long(i)])).unwrap();
        }
        ch.close();
        let batch = ch.pull_batch().unwrap();
        let values: Vec<_> = batch
            .iter()
            .map(|m| match m {
                Message::Data(r) => r.column(0).cloned(),
                Message::Terminate => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![Some(Column::Long(0)), Some(Column::Long(1)), Some(Column::Long(2)), None]
        );
        assert!(ch.pull().unwrap().is_terminate());
    }

    #[test]
    fn test_close_is_idempotent_and_keeps_data() {
        let ch = channel(4, 1 << 20);
        ch.push(record(1)).unwrap();
        ch.close();
        ch.close();
        assert!(matches!(ch.pull().unwrap(), Message::Data(_)));
        assert!(ch.pull().unwrap().is_terminate());
        assert_eq!(ch.push(record(1)), Err(ChannelError::Closed));
    }

    #[test]
    fn test_oversized_rejected() {
        let ch = channel(2, 100);
        assert!(matches!(ch.push(record(200)), Err(ChannelError::Oversized { .. })));
        let batch = vec![record(1), record(1), record(1)];
        assert!(matches!(ch.push_batch(batch), Err(ChannelError::Oversized { .. })));
    }

    #[test]
    fn test_push_blocks_on_item_capacity_until_pull() {
        let ch = Arc::new(channel(2, 1 << 20));
        ch.push_batch(vec![record(1), record(1)]).unwrap();

        let producer = {
            let ch = Arc::clone(&ch);
            std::thread::spawn(move || ch.push(record(1)))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ch.len(), 2);

        ch.pull().unwrap();
        producer.join().unwrap().unwrap();
        assert_eq!(ch.len(), 2);
    }

    #[test]
    fn test_push_blocks_on_byte_capacity_until_pull() {
        let one = record(10).memory_size() as u64;
        let ch = Arc::new(channel(100, one * 2));
        ch.push_batch(vec![record(10), record(10)]).unwrap();
        assert_eq!(ch.bytes(), one * 2);

        let producer = {
            let ch = Arc::clone(&ch);
            std::thread::spawn(move || ch.push(record(10)))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ch.len(), 2);
        assert!(ch.bytes() <= one * 2);

        ch.pull().unwrap();
        producer.join().unwrap().unwrap();
        assert_eq!(ch.bytes(), one * 2);
    }

    #[test]
    fn test_abort_unblocks_consumer() {
        let ch = Arc::new(channel(2, 1 << 20));
        let consumer = {
            let ch = Arc::clone(&ch);
            std::thread::spawn(move || ch.pull())
        };
        std::thread::sleep(Duration::from_millis(30));
        ch.abort();
        assert_eq!(consumer.join().unwrap(), Err(ChannelError::Aborted));
    }

    #[test]
    fn test_cancel_unblocks_producer() {
        let cancel = CancellationToken::new();
        let config = ChannelConfig {
            capacity: 1,
            wait_tick: Duration::from_millis(10),
            ..ChannelConfig::default()
        };
        let ch = Arc::new(Channel::new(config, CommunicationHandle::new(), cancel.clone()));
        ch.push(record(1)).unwrap();
        let producer = {
            let ch = Arc::clone(&ch);
            std::thread::spawn(move || ch.push(record(1)))
        };
        std::thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        assert_eq!(producer.join().unwrap(), Err(ChannelError::Cancelled));
    }

    #[test]
    fn test_stats_recorded_on_push_and_pull() {
        let stats = CommunicationHandle::new();
        let ch = Channel::new(ChannelConfig::default(), stats.clone(), CancellationToken::new());
        ch.push_batch(vec![record(3), record(5)]).unwrap();
        ch.pull_batch().unwrap();
        let snap = stats.snapshot();
        assert_eq!(snap.counters.read_succeed_records, 2);
        assert_eq!(snap.counters.read_succeed_bytes, 8);
        assert_eq!(snap.counters.write_received_records, 2);
        assert_eq!(snap.counters.write_received_bytes, 8);
    }

    #[test]
    fn test_pull_batch_respects_buffer_size() {
        let config = ChannelConfig {
            buffer_size: 2,
            ..ChannelConfig::default()
        };
        let ch = Channel::new(config, CommunicationHandle::new(), CancellationToken::new());
        ch.push_batch((0..5).map(|_| record(1)).collect()).unwrap();
        assert_eq!(ch.pull_batch().unwrap().len(), 2);
        assert_eq!(ch.len(), 3);
    }

    #[test]
    fn test_flow_control_sleep() {
        let second = Duration::from_secs(1);
        assert_eq!(flow_control_sleep(second, 500, 0, Some(1000), None), Duration::ZERO);
        assert_eq!(
            flow_control_sleep(second, 2000, 0, Some(1000), None),
            Duration::from_millis(1000)
        );
        assert_eq!(
            flow_control_sleep(second, 2000, 300, Some(1000), Some(100)),
            Duration::from_millis(2000)
        );
        assert_eq!(flow_control_sleep(second, 9999, 9999, None, None), Duration::ZERO);
    }

    #[test]
    fn test_config_from_transport() {
        let transport = TransportConfig {
            byte_capacity: "1kb".into(),
            capacity: 16,
            buffer_size: 64,
            ..TransportConfig::default()
        };
        let config = ChannelConfig::from_transport(&transport).unwrap();
        assert_eq!(config.byte_capacity, 1024);
        assert_eq!(config.buffer_size, 16);
    }
}
