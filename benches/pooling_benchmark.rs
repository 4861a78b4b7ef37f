//! Pooling and normalization benchmarks.
//!
//! ```bash
//! cargo bench -- mean_pool
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ember::inference::{l2_normalize, mean_pool};
use ndarray::Array3;

const HIDDEN: usize = 384;

#[allow(clippy::cast_precision_loss)]
fn hidden_states(batch: usize, seq: usize) -> Array3<f32> {
    Array3::from_shape_fn((batch, seq, HIDDEN), |(b, p, h)| {
        ((b * 31 + p * 7 + h) % 97) as f32 / 97.0
    })
}

fn half_mask(batch: usize, seq: usize) -> Vec<Vec<i64>> {
    (0..batch)
        .map(|_| (0..seq).map(|p| i64::from(p < seq / 2)).collect())
        .collect()
}

fn bench_mean_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("mean_pool");

    for &(batch, seq) in &[(1, 128), (8, 128), (32, 256)] {
        let hidden = hidden_states(batch, seq);
        let mask = half_mask(batch, seq);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{batch}x{seq}")),
            &(hidden, mask),
            |b, (hidden, mask)| b.iter(|| mean_pool(black_box(hidden.view()), black_box(mask))),
        );
    }

    group.finish();
}

fn bench_l2_normalize(c: &mut Criterion) {
    let vector: Vec<f32> = (0..HIDDEN).map(|i| (i % 13) as f32).collect();

    c.bench_function("l2_normalize_384", |b| {
        b.iter(|| {
            let mut v = vector.clone();
            l2_normalize(black_box(&mut v));
            v
        });
    });
}

criterion_group!(benches, bench_mean_pool, bench_l2_normalize);
criterion_main!(benches);
