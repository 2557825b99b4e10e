//! Benchmarks for the pooled payload codec

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use warren_core::codec::{self, BufferPool};

#[derive(Clone, PartialEq, prost::Message)]
struct Payload {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(bytes = "vec", tag = "2")]
    data: Vec<u8>,
    #[prost(int64, repeated, tag = "3")]
    values: Vec<i64>,
}

fn payload(size: usize) -> Payload {
    Payload {
        name: "bench".to_string(),
        data: vec![7u8; size],
        values: (0..size as i64 / 64).collect(),
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [64, 1024, 16 * 1024].iter() {
        let message = payload(*size);
        let pool = BufferPool::default();

        group.bench_with_input(BenchmarkId::new("pooled", size), &message, |b, message| {
            b.iter(|| pool.encode(black_box(message)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("per_call_alloc", size), &message, |b, message| {
            b.iter(|| prost::Message::encode_to_vec(black_box(message)));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [64, 1024, 16 * 1024].iter() {
        let bytes = codec::encode(&payload(*size)).unwrap();
        group.bench_with_input(BenchmarkId::new("fresh", size), &bytes, |b, bytes| {
            b.iter(|| codec::decode::<Payload>(black_box(bytes)).unwrap());
        });

        let mut reused = Payload::default();
        group.bench_with_input(BenchmarkId::new("into_reused", size), &bytes, |b, bytes| {
            b.iter(|| codec::decode_into(black_box(bytes), &mut reused).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
