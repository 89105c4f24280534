//! Frame encoding/decoding and signing benchmarks.

use coinspro_protocol::{sign, Decoder, Encoder, Frame, MessageType, Payload};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn create_level2_rows(rows: usize) -> String {
    let rows: Vec<serde_json::Value> = (0..rows)
        .map(|i| {
            serde_json::json!([
                i,
                1,
                1598000000000u64,
                0,
                500000.0 + i as f64,
                1,
                500000.0,
                6,
                0.25,
                i % 2
            ])
        })
        .collect();
    serde_json::to_string(&rows).unwrap()
}

fn create_test_frame(rows: usize) -> Frame {
    Frame::new(
        MessageType::Event,
        1024,
        "Level2UpdateEvent",
        create_level2_rows(rows),
    )
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for rows in [1, 10, 100] {
        let frame = create_test_frame(rows);

        group.throughput(Throughput::Bytes(frame.payload.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &frame, |b, frame| {
            b.iter(|| black_box(Encoder::encode(frame).unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for rows in [1, 10, 100] {
        let encoded = Encoder::encode(&create_test_frame(rows)).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &encoded, |b, encoded| {
            b.iter(|| black_box(Decoder::decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_payload_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_parse");

    for rows in [1, 10, 100] {
        let payload = create_level2_rows(rows);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("json", rows), &payload, |b, payload| {
            b.iter(|| black_box(Payload::parse(payload)));
        });
    }

    let raw = "Endpoint Not Found".to_string();
    group.bench_with_input(BenchmarkId::new("raw", 0), &raw, |b, raw| {
        b.iter(|| black_box(Payload::parse(raw)));
    });

    group.finish();
}

fn bench_sign(c: &mut Criterion) {
    c.bench_function("sign", |b| {
        b.iter(|| {
            black_box(
                sign(
                    black_box("1598000000000"),
                    black_box("7"),
                    black_box("6fa4a2d8c6b0e0f1"),
                    black_box("0123456789abcdef0123456789abcdef"),
                )
                .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_payload_parse,
    bench_sign,
);

criterion_main!(benches);
