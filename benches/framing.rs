//! Framing and buffer hot-path benchmarks
//!
//! Measures encode/decode of wire frames and the circular-buffer lease cycle
//! without network I/O.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use igtl_connector::io::CircularBuffer;
use igtl_connector::protocol::{FramedMessage, Header};

fn bench_transform_pack(c: &mut Criterion) {
    c.bench_function("transform_frame_pack", |b| {
        let mut frame = FramedMessage::from_parts("Tracker", "TRANSFORM", vec![0x5A; 48]).unwrap();
        b.iter(|| black_box(frame.pack()));
    });
}

fn bench_image_pack(c: &mut Criterion) {
    // 512x512 8-bit image body; dominated by the CRC pass
    c.bench_function("image_frame_pack", |b| {
        let mut frame =
            FramedMessage::from_parts("Scanner", "IMAGE", vec![0x33; 512 * 512]).unwrap();
        b.iter(|| black_box(frame.pack()));
    });
}

fn bench_transform_unpack(c: &mut Criterion) {
    c.bench_function("transform_frame_unpack", |b| {
        let mut source = FramedMessage::from_parts("Tracker", "TRANSFORM", vec![0x5A; 48]).unwrap();
        let wire = source.pack();
        b.iter(|| {
            let mut frame = FramedMessage::new();
            frame.unpack_header(&wire[..Header::SIZE]).unwrap();
            frame.allocate_body(frame.body_size()).unwrap();
            frame.body_mut().copy_from_slice(&wire[Header::SIZE..]);
            frame.unpack_body(true).unwrap();
            black_box(&frame);
        });
    });
}

fn bench_buffer_cycle(c: &mut Criterion) {
    c.bench_function("circular_buffer_push_pull", |b| {
        let buffer = CircularBuffer::new();
        let body = [0xA5u8; 48];
        b.iter(|| {
            buffer.start_push();
            {
                let mut slot = buffer.push_slot().unwrap();
                slot.initialize_for_receive();
                slot.allocate_body(body.len()).unwrap();
                slot.body_mut().copy_from_slice(&body);
            }
            buffer.end_push();
            buffer.start_pull().unwrap();
            let len = buffer.pull_slot().unwrap().body().len();
            buffer.end_pull();
            black_box(len)
        });
    });
}

criterion_group!(
    benches,
    bench_transform_pack,
    bench_image_pack,
    bench_transform_unpack,
    bench_buffer_cycle
);
criterion_main!(benches);
