use std::sync::Arc;
use std::time::Duration;

use conduit_engine::channel::{Channel, ChannelConfig};
use conduit_engine::communicator::CommunicationHandle;
use conduit_sdk::CancellationToken;
use conduit_types::{Column, Message, Record};
use proptest::prelude::*;

fn channel(capacity: usize, buffer_size: usize, byte_capacity: u64) -> (Arc<Channel>, CommunicationHandle) {
    let stats = CommunicationHandle::new();
    let config = ChannelConfig {
        capacity,
        buffer_size,
        byte_capacity,
        wait_tick: Duration::from_millis(5),
        ..ChannelConfig::default()
    };
    (
        Arc::new(Channel::new(config, stats.clone(), CancellationToken::new())),
        stats,
    )
}

fn record(i: i64) -> Record {
    Record::from(vec![Column::Long(i)])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn fifo_order_and_bounds_hold(
        capacity in 1_usize..16,
        buffer_size in 1_usize..16,
        batches in prop::collection::vec(1_usize..16, 1..20),
    ) {
        let one = record(0).memory_size() as u64;
        let (channel, stats) = channel(capacity, buffer_size, one * capacity as u64);
        let total: usize = batches.iter().map(|b| (*b).min(capacity)).sum();

        let producer = {
            let channel = Arc::clone(&channel);
            std::thread::spawn(move || {
                let mut next = 0_i64;
                for size in batches {
                    let size = size.min(capacity);
                    let batch: Vec<Record> = (0..size).map(|_| {
                        let r = record(next);
                        next += 1;
                        r
                    }).collect();
                    channel.push_batch(batch).unwrap();
                }
                channel.close();
            })
        };

        let mut seen = Vec::with_capacity(total);
        let mut terminated = false;
        while !terminated {
            prop_assert!(channel.len() <= capacity);
            prop_assert!(channel.bytes() <= one * capacity as u64);
            let batch = channel.pull_batch().unwrap();
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.len() <= buffer_size.max(1) + 1);
            for message in batch {
                match message {
                    Message::Data(r) => seen.push(r.column(0).unwrap().as_long().unwrap()),
                    Message::Terminate => terminated = true,
                }
            }
        }
        producer.join().unwrap();

        let expected: Vec<i64> = (0..total as i64).collect();
        prop_assert_eq!(seen, expected);
        let counters = stats.snapshot().counters;
        prop_assert_eq!(counters.read_succeed_records, total as u64);
        prop_assert_eq!(counters.write_received_records, total as u64);
        prop_assert_eq!(channel.bytes(), 0);
    }

    #[test]
    fn oversized_batches_are_rejected_without_blocking(
        capacity in 1_usize..8,
        extra in 1_usize..8,
    ) {
        let (channel, _) = channel(capacity, capacity, u64::MAX);
        let batch: Vec<Record> = (0..(capacity + extra) as i64).map(record).collect();
        prop_assert!(channel.push_batch(batch).is_err());
        prop_assert!(channel.is_empty());
    }
}
