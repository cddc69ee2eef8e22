use criterion::{black_box, criterion_group, criterion_main, Criterion};

use gastrack_core::{aggregate, Observation, Timeframe};

fn history(len: usize) -> Vec<Observation> {
    (0..len as u64)
        .map(|i| Observation::new(1_700_000_000_000 + i * 12_000, 20.0 + (i % 7) as f64, 2.0))
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let full = history(96);
    let large = history(10_000);

    c.bench_function("aggregate_96_15m", |b| {
        b.iter(|| aggregate(black_box(&full), Timeframe::Min15.millis()))
    });
    c.bench_function("aggregate_10k_1m", |b| {
        b.iter(|| aggregate(black_box(&large), Timeframe::Min1.millis()))
    });
}

criterion_group!(benches, bench_aggregate);
criterion_main!(benches);
