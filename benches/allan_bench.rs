//! Criterion benchmarks for the Allan deviation estimators.
//!
//! A long overnight run at a 10 ms gate produces millions of readings, so
//! the estimators have to stay linear in the input for octave spacing.
//!
//! Run with: cargo bench --bench allan_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sr620_daq::data::allan::{deviation_series, AllanEstimator, TauSpacing};

/// Deterministic white-ish frequency noise around 10 MHz.
fn readings(len: usize) -> Vec<f64> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            1.0e7 + (state % 1_000) as f64 * 1e-6
        })
        .collect()
}

fn estimators_octave(c: &mut Criterion) {
    let mut group = c.benchmark_group("allan_octave");

    for len in [1_000usize, 10_000, 100_000] {
        let data = readings(len);
        group.throughput(Throughput::Elements(len as u64));
        for estimator in AllanEstimator::ALL {
            group.bench_with_input(
                BenchmarkId::new(estimator.symbol(), len),
                &data,
                |b, data| {
                    b.iter(|| {
                        deviation_series(black_box(data), 0.01, estimator, TauSpacing::Octave)
                    })
                },
            );
        }
    }

    group.finish();
}

fn overlapping_all_taus(c: &mut Criterion) {
    let data = readings(2_000);
    c.bench_function("oadev_all_2000", |b| {
        b.iter(|| {
            deviation_series(
                black_box(&data),
                0.1,
                AllanEstimator::Overlapping,
                TauSpacing::All,
            )
        })
    });
}

criterion_group!(benches, estimators_octave, overlapping_all_taus);
criterion_main!(benches);
