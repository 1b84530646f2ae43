use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parley_audio::{decode, encode, DEFAULT_BLOCKSIZE};

fn block(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i as f32) * 0.01).sin() * 0.8).collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for len in [DEFAULT_BLOCKSIZE, 16000] {
        let samples = block(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &samples, |b, s| {
            b.iter(|| encode(black_box(s)))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    // Typical response chunk sizes at 24kHz
    let mut group = c.benchmark_group("decode");
    for len in [960, 24000] {
        let payload = encode(&block(len));
        group.bench_with_input(BenchmarkId::from_parameter(len), &payload, |b, p| {
            b.iter(|| decode(black_box(p), 24000, 1))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
