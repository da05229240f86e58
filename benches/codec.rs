use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sixp::network::{extract_sixtop_payload, wrap_sixtop_payload};
use sixp::protocol::packet::{cell_request_body, status_request_body};
use sixp::protocol::{Cell, CellOptions, Command, MessageType, PacketFrame, ReturnCode, SixpCodec};
use tokio_util::codec::{Decoder, Encoder};

fn frames() -> Vec<(&'static str, PacketFrame)> {
    let cells: Vec<Cell> = (0..8).map(|i| Cell::new(i * 3, i % 16)).collect();
    vec![
        (
            "add_request",
            PacketFrame::new(
                MessageType::Request,
                Command::Add,
                0xf1,
                3,
                1,
                2,
                cell_request_body(Command::Add, 0, CellOptions::TX, 2, &cells).unwrap(),
            ),
        ),
        (
            "status_request",
            PacketFrame::new(
                MessageType::Request,
                Command::Status,
                0xf1,
                4,
                0,
                0,
                status_request_body(0, CellOptions::RX).unwrap(),
            ),
        ),
        (
            "success_response",
            PacketFrame::new(
                MessageType::Response,
                ReturnCode::Success,
                0xf1,
                3,
                2,
                1,
                Cell::encode_list(&cells[..2]),
            ),
        ),
    ]
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    for (name, frame) in frames() {
        let encoded = frame.encode();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", name), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode()));
        });
        group.bench_with_input(BenchmarkId::new("decode", name), &encoded, |b, encoded| {
            b.iter(|| black_box(PacketFrame::decode(black_box(encoded)).unwrap()));
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for (name, frame) in frames() {
        group.bench_with_input(BenchmarkId::new("round_trip", name), &frame, |b, frame| {
            let mut codec = SixpCodec::new();
            let mut buf = BytesMut::with_capacity(64);
            b.iter(|| {
                codec.encode(frame.clone(), &mut buf).unwrap();
                black_box(codec.decode(&mut buf).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_information_elements(c: &mut Criterion) {
    let mut group = c.benchmark_group("information_elements");

    for (name, frame) in frames() {
        let payload = frame.encode();
        let psdu = wrap_sixtop_payload(&payload).unwrap();
        group.bench_with_input(BenchmarkId::new("wrap", name), &payload, |b, payload| {
            b.iter(|| black_box(wrap_sixtop_payload(black_box(payload)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("extract", name), &psdu, |b, psdu| {
            b.iter(|| black_box(extract_sixtop_payload(black_box(psdu))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame, bench_codec, bench_information_elements);

criterion_main!(benches);
