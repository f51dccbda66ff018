//! Broker fan-out and delivery policy benchmarks.

use chatwire_core::broker::{Broker, BrokerEvent, LocalBroker};
use chatwire_core::memory::MemoryStore;
use chatwire_core::{DeliveryPipeline, Notifier, RecordingPushGateway};
use chatwire_protocol::{codec, DeliveredMessage};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Publish one message to N subscriptions and wait until each received it.
fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout");

    for subscribers in [1usize, 10, 100] {
        let broker = LocalBroker::new();
        let mut subs = rt.block_on(async {
            let mut subs = Vec::with_capacity(subscribers);
            for _ in 0..subscribers {
                subs.push(broker.subscribe(&["42".to_string()]).await.unwrap());
            }
            subs
        });
        let payload =
            codec::encode_message(&DeliveredMessage::text(42, "hello", 1, 0)).unwrap();

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    rt.block_on(async {
                        broker.publish("42", &payload).await.unwrap();
                        for sub in subs.iter_mut() {
                            black_box(sub.events.recv().await);
                        }
                    })
                })
            },
        );
    }

    group.finish();
}

/// Decode and classify one broker event.
fn bench_classify(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());
    let notifier = Notifier::new(
        store.clone(),
        store.clone(),
        Arc::new(RecordingPushGateway::new()),
    );
    let pipeline = DeliveryPipeline::new(
        Arc::new(LocalBroker::new()),
        store.clone(),
        store,
        notifier,
    );
    let message = DeliveredMessage::text(42, "hello", 1, 0).with_sender("alice");
    let event = BrokerEvent::new("42", codec::encode_message(&message).unwrap());

    let mut group = c.benchmark_group("classify");
    group.bench_function("deliver", |b| {
        b.iter(|| pipeline.classify(black_box(2), black_box(&event)))
    });
    group.bench_function("self_echo", |b| {
        b.iter(|| pipeline.classify(black_box(1), black_box(&event)))
    });
    group.finish();
}

criterion_group!(benches, bench_fanout, bench_classify);
criterion_main!(benches);
