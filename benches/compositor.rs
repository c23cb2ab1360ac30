//! Compositor Benchmarks
//!
//! Measures the per-frame cost of cropping and resampling source frames onto
//! the vertical canvas.
//!
//! # Running Benchmarks
//! ```bash
//! cargo bench --bench compositor
//! ```

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::imageops::FilterType;
use verticut::adapters::synthetic::codec::render_pattern;
use verticut::engine::{compute_crop, Compositor};

/// Composite landscape, square and portrait sources onto a 1080x1920 canvas.
fn bench_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    let sources = [(1920, 1080), (1280, 720), (1080, 1080), (1080, 1920)];
    for (width, height) in sources {
        let frame = render_pattern(width, height, 7);
        let compositor = Compositor::new(1080, 1920);
        group.bench_with_input(
            BenchmarkId::new("1080x1920", format!("{}x{}", width, height)),
            &frame,
            |b, frame| b.iter(|| compositor.composite(black_box(frame))),
        );
    }

    group.finish();
}

/// Compare resampling filters on the common 1080p landscape case.
fn bench_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite_filter");
    group.measurement_time(Duration::from_secs(5));

    let frame = render_pattern(1920, 1080, 11);
    for (name, filter) in [
        ("triangle", FilterType::Triangle),
        ("catmull_rom", FilterType::CatmullRom),
        ("lanczos3", FilterType::Lanczos3),
    ] {
        let compositor = Compositor::new(720, 1280).with_filter(filter);
        group.bench_function(name, |b| b.iter(|| compositor.composite(black_box(&frame))));
    }

    group.finish();
}

fn bench_compute_crop(c: &mut Criterion) {
    c.bench_function("compute_crop", |b| {
        b.iter(|| compute_crop(black_box(1920), black_box(1080), black_box(1080), black_box(1920)))
    });
}

criterion_group!(benches, bench_composite, bench_filters, bench_compute_crop);
criterion_main!(benches);
