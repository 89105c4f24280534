//! Inbound dispatch benchmarks.

use coinspro_client::pending::PendingTable;
use coinspro_client::subscription::{SubscriptionKey, SubscriptionTable};
use coinspro_client::{Dispatcher, Envelope};
use coinspro_protocol::{Encoder, EventClass, Frame, MessageType};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

fn setup(instruments: u64) -> (Dispatcher, Arc<PendingTable>, Arc<AtomicUsize>) {
    let pending = Arc::new(PendingTable::new());
    let subscriptions = Arc::new(SubscriptionTable::new());
    let delivered = Arc::new(AtomicUsize::new(0));

    for id in 1..=instruments {
        for class in [EventClass::Level1, EventClass::Level2, EventClass::Trades] {
            let counter = delivered.clone();
            subscriptions.insert(
                SubscriptionKey::new(class, Some(id)),
                Arc::new(move |_: &Envelope| {
                    counter.fetch_add(1, Ordering::Relaxed);
                }),
            );
        }
    }

    let dispatcher = Dispatcher::new(pending.clone(), subscriptions, Arc::new(OnceLock::new()));
    (dispatcher, pending, delivered)
}

fn encode(msg_type: MessageType, sequence: u64, name: &str, payload: &str) -> String {
    Encoder::encode(&Frame::new(msg_type, sequence, name, payload)).unwrap()
}

fn bench_feed_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed_dispatch");
    group.throughput(Throughput::Elements(1));

    for instruments in [1, 10, 100] {
        let (dispatcher, _, _) = setup(instruments);
        let level1 = encode(
            MessageType::Event,
            10,
            "Level1UpdateEvent",
            r#"{"OMSId":1,"InstrumentId":1,"BestBid":500000.0,"BestOffer":500100.0}"#,
        );
        let level2 = encode(
            MessageType::Event,
            12,
            "Level2UpdateEvent",
            "[[1,1,1598000000000,0,500000.0,1,500000.0,1,0.25,0]]",
        );

        group.bench_with_input(
            BenchmarkId::new("level1", instruments),
            &level1,
            |b, text| b.iter(|| black_box(dispatcher.dispatch_text(text).unwrap())),
        );
        group.bench_with_input(
            BenchmarkId::new("level2", instruments),
            &level2,
            |b, text| b.iter(|| black_box(dispatcher.dispatch_text(text).unwrap())),
        );
    }

    group.finish();
}

fn bench_reply_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_dispatch");
    group.throughput(Throughput::Elements(1));

    let (dispatcher, pending, _) = setup(0);
    let reply = encode(MessageType::Reply, 2, "GetProducts", r#"[{"ProductId":1}]"#);

    group.bench_function("matched", |b| {
        b.iter(|| {
            let rx = pending.register(2).unwrap();
            black_box(dispatcher.dispatch_text(&reply).unwrap());
            drop(rx);
        })
    });

    group.bench_function("unmatched", |b| {
        b.iter(|| black_box(dispatcher.dispatch_text(&reply).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_feed_dispatch, bench_reply_dispatch);

criterion_main!(benches);
