//! Criterion benchmarks for NLF core operations.
//!
//! Run with: cargo bench -p nlf_core
//! Run specific: cargo bench -p nlf_core -- collect_statistics

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array3, ArrayView3};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use nlf_core::{
    collect_statistics, denoise_image, process_burst, Alignment, Execution, FrameFusion,
    ModelFitter, NlfConfig, NoiseModel, NullSink, StatisticsConfig,
};

// =============================================================================
// Helper Functions for Test Data Generation
// =============================================================================

/// Ramp image with `variance = a + b·mean` Gaussian noise.
fn noisy_image_f32(channels: usize, size: usize, seed: u64) -> Array3<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let unit = Normal::new(0.0, 1.0).unwrap();
    Array3::from_shape_fn((channels, size, size), |(ch, r, c)| {
        let clean = 0.05 + 0.4 * ((r + c + ch) as f64 / (2 * size) as f64);
        (clean + (1e-6 + 2e-4 * clean).sqrt() * unit.sample(&mut rng)) as f32
    })
}

fn noisy_image_f64(channels: usize, size: usize, seed: u64) -> Array3<f64> {
    noisy_image_f32(channels, size, seed).mapv(f64::from)
}

// =============================================================================
// Estimation Benchmarks
// =============================================================================

fn bench_collect_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect_statistics");
    let config = StatisticsConfig::default();

    for size in [64, 128, 256, 512] {
        let image = noisy_image_f32(3, size, 42);
        group.throughput(Throughput::Elements((3 * size * size) as u64));

        for (name, execution) in [("seq", Execution::Sequential), ("par", Execution::Parallel)] {
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, _| {
                b.iter(|| collect_statistics(black_box(image.view()), &config, execution))
            });
        }
    }

    group.finish();
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit");
    let image = noisy_image_f32(3, 256, 7);
    let stats = collect_statistics(image.view(), &StatisticsConfig::default(), Execution::Parallel)
        .unwrap();

    let fitters = [
        ("two_pass", ModelFitter::default()),
        ("least_median", ModelFitter::LeastMedian(Default::default())),
    ];
    for (name, fitter) in fitters {
        group.bench_function(name, |b| {
            b.iter(|| fitter.fit(black_box(&stats), 1.0, &NullSink))
        });
    }

    group.finish();
}

// =============================================================================
// Denoise Benchmarks
// =============================================================================

fn bench_denoise_image(c: &mut Criterion) {
    let mut group = c.benchmark_group("denoise_image");
    group.sample_size(10);
    let config = NlfConfig::default();
    let prior = NoiseModel::uniform(3, 1e-6, 2e-4);

    for size in [128, 256, 512] {
        let image = noisy_image_f32(3, size, 3);
        group.throughput(Throughput::Elements((3 * size * size) as u64));
        group.bench_with_input(BenchmarkId::new("f32", size), &size, |b, _| {
            b.iter(|| denoise_image(black_box(image.view()), &config, &prior, &NullSink))
        });
    }

    group.finish();
}

// =============================================================================
// Fusion Benchmarks
// =============================================================================

fn bench_fusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusion");
    group.sample_size(20);
    let model = NoiseModel::uniform(3, 1e-6, 2e-4);
    let frames: Vec<Array3<f32>> = (0..4).map(|i| noisy_image_f32(3, 256, 100 + i)).collect();
    let alignments = [
        Alignment::identity(),
        Alignment::translation(0.5, 0.0),
        Alignment::translation(0.0, 0.5),
        Alignment::translation(0.5, 0.5),
    ];

    group.bench_function("add_frames_256", |b| {
        b.iter(|| {
            let mut fusion = FrameFusion::new(Default::default(), Execution::Parallel).unwrap();
            for (frame, alignment) in frames.iter().zip(&alignments) {
                fusion
                    .add_frame(black_box(frame.view()), alignment, &model, &NullSink)
                    .unwrap();
            }
            fusion.snapshot()
        })
    });

    group.finish();
}

fn bench_burst_full(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst_full");
    group.sample_size(10);
    let config = NlfConfig::default();
    let prior = NoiseModel::uniform(3, 1e-6, 2e-4);
    let frames: Vec<Array3<f64>> = (0..4).map(|i| noisy_image_f64(3, 256, 200 + i)).collect();
    let views: Vec<ArrayView3<f64>> = frames.iter().map(|f| f.view()).collect();
    let alignments = vec![Alignment::identity(); views.len()];

    group.bench_function("f64_4x256", |b| {
        b.iter(|| process_burst(black_box(&views), &alignments, &config, &prior, &NullSink))
    });

    group.finish();
}

// =============================================================================
// Criterion Configuration
// =============================================================================

criterion_group!(
    benches,
    bench_collect_statistics,
    bench_fit,
    bench_denoise_image,
    bench_fusion,
    bench_burst_full,
);

criterion_main!(benches);
