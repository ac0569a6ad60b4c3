//! Criterion benchmarks for the record channel.
//!
//! These measure batched push/pull throughput between one producer thread
//! and one consumer, the hot path of every task.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use conduit_engine::channel::{Channel, ChannelConfig};
use conduit_engine::communicator::CommunicationHandle;
use conduit_sdk::CancellationToken;
use conduit_types::{Column, Message, Record};

const RECORDS: usize = 10_000;

fn record(i: usize) -> Record {
    Record::from(vec![
        Column::Long(i as i64),
        Column::String(format!("user-{i}")),
        Column::Double(i as f64 * 0.5),
    ])
}

fn run_transfer(buffer_size: usize) {
    let config = ChannelConfig {
        capacity: 2048,
        buffer_size,
        wait_tick: Duration::from_millis(50),
        ..ChannelConfig::default()
    };
    let channel = Arc::new(Channel::new(
        config,
        CommunicationHandle::new(),
        CancellationToken::new(),
    ));

    let producer = {
        let channel = Arc::clone(&channel);
        std::thread::spawn(move || {
            let mut batch = Vec::with_capacity(buffer_size);
            for i in 0..RECORDS {
                batch.push(record(i));
                if batch.len() == buffer_size {
                    channel.push_batch(std::mem::take(&mut batch)).unwrap();
                }
            }
            channel.push_batch(batch).unwrap();
            channel.close();
        })
    };

    let mut received = 0;
    'outer: loop {
        for message in channel.pull_batch().unwrap() {
            match message {
                Message::Data(_) => received += 1,
                Message::Terminate => break 'outer,
            }
        }
    }
    producer.join().unwrap();
    assert_eq!(received, RECORDS);
}

fn bench_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel/transfer");
    group.throughput(Throughput::Elements(RECORDS as u64));

    for buffer_size in [1, 32, 256] {
        group.bench_with_input(
            BenchmarkId::new("buffer_size", buffer_size),
            &buffer_size,
            |b, &buffer_size| b.iter(|| run_transfer(buffer_size)),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_transfer);
criterion_main!(benches);
