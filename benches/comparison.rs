//! Benchmarks for the alignment search and pulse extraction

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use synctester::analysis::compare::best_alignment;
use synctester::capture::repackage::Channel;
use synctester::detect::pulse::pulse_centers;
use synctester::Pin;

/// Irregularly spaced pattern of `n` events
fn pattern(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| i as f64 * 0.5 + (i as f64 * 1.3).sin() * 0.1)
        .collect()
}

fn bench_alignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_alignment");

    for size in [100, 1_000, 5_000].iter() {
        group.bench_with_input(BenchmarkId::new("expected", size), size, |b, &size| {
            let expected = pattern(size);
            // A typical capture sees around 20 s of a 2 Hz pattern
            let observed: Vec<f64> = expected[size / 2..size / 2 + 40]
                .iter()
                .map(|e| e + 0.012)
                .collect();

            b.iter(|| black_box(best_alignment(black_box(&observed), black_box(&expected))));
        });
    }

    group.finish();
}

fn bench_pulse_extraction(c: &mut Criterion) {
    // Longest single pin capture the device buffer holds
    let len = 46_000;
    let mut max = vec![30u8; len];
    for start in (250..len - 50).step_by(500) {
        for v in max.iter_mut().skip(start).take(17) {
            *v = 220;
        }
    }
    let channel = Channel {
        pin: Pin::Light0,
        modality: Pin::Light0.modality(),
        min: vec![30; len],
        max,
        event_duration: Some(0.017),
    };

    c.bench_function("pulse_centers_46s_light", |b| {
        b.iter(|| black_box(pulse_centers(black_box(&channel))))
    });
}

criterion_group!(benches, bench_alignment, bench_pulse_extraction);
criterion_main!(benches);
