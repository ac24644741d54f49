use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use vidcast_protocol::packet::{Datagram, Frame, Packet, MAX_PAYLOAD_SIZE};
use vidcast_protocol::reorder::ReorderTracker;
use vidcast_protocol::sequence::SeqNumber;

fn bench_packet_encode(c: &mut Criterion) {
    let packet = Packet::new(SeqNumber::new(1000), Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE])).unwrap();

    c.bench_function("packet_encode", |b| {
        b.iter(|| {
            let bytes = black_box(&packet).to_bytes();
            black_box(bytes);
        });
    });
}

fn bench_datagram_classify(c: &mut Criterion) {
    let packet = Packet::new(SeqNumber::new(1000), Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE])).unwrap();
    let bytes = packet.to_bytes();

    c.bench_function("datagram_classify", |b| {
        b.iter(|| {
            let datagram = Datagram::classify(black_box(&bytes)).unwrap();
            black_box(datagram);
        });
    });
}

fn bench_reorder_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("reorder");
    const PACKETS: u32 = 1000;
    group.throughput(Throughput::Elements(PACKETS as u64));

    // Adjacent pairs swapped: every other packet waits in the buffer
    let frames: Vec<Packet> = (0..PACKETS)
        .map(|i| {
            let seq = if i % 2 == 0 { i + 2 } else { i };
            Packet::new(SeqNumber::new(seq), Bytes::from_static(b"payload")).unwrap()
        })
        .collect();

    group.bench_function("swapped_pairs", |b| {
        b.iter(|| {
            let mut tracker = ReorderTracker::default();
            for packet in &frames {
                tracker.push(packet.clone());
                while let Some(p) = tracker.pop_ready() {
                    black_box(p);
                }
            }
        });
    });
    group.finish();

    let bytes = Packet::new(SeqNumber::new(7), Bytes::from_static(b"x")).unwrap().to_bytes();
    c.bench_function("frame_decode_small", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&bytes)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_packet_encode,
    bench_datagram_classify,
    bench_reorder_throughput
);
criterion_main!(benches);
