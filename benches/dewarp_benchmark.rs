use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dewarp::{DewarpConfig, Dewarper};
use image::{DynamicImage, Rgb, RgbImage};

/// Rows of dark bars on light paper, bowed downwards by `sag` px at the centre.
fn synthetic_page(width: u32, height: u32, sag: f64) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let u = x as f64 / width as f64 - 0.5;
        let yy = y as f64 - sag * (1.0 - 4.0 * u * u);
        let row = ((yy - 80.0) / 40.0).floor();
        let col = ((x as f64 - 60.0) / 60.0).floor();
        let in_text = row >= 0.0 && row < 8.0 && col >= 0.0 && col < 8.0;
        let in_bar = (yy - 80.0).rem_euclid(40.0) < 6.0 && (x as f64 - 60.0).rem_euclid(60.0) < 48.0;
        if in_text && in_bar {
            Rgb([20, 20, 20])
        } else {
            Rgb([235, 235, 230])
        }
    });
    DynamicImage::ImageRgb8(img)
}

fn benchmark_full_dewarp(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_dewarp");
    group.sample_size(10);

    let dewarper = Dewarper::new(DewarpConfig {
        optimizer_max_iterations: Some(10),
        ..DewarpConfig::default()
    })
    .expect("Failed to create dewarper");

    for sag in [0.0, 12.0] {
        let page = synthetic_page(640, 480, sag);
        group.bench_with_input(BenchmarkId::from_parameter(sag), &page, |b, page| {
            b.iter(|| dewarper.dewarp(black_box(page)).expect("Dewarp failed"));
        });
    }

    group.finish();
}

fn benchmark_fallback(c: &mut Criterion) {
    let mut group = c.benchmark_group("fallback");
    group.sample_size(20);

    let dewarper = Dewarper::new(DewarpConfig::default()).expect("Failed to create dewarper");
    let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(1280, 700, Rgb([240, 240, 240])));
    group.bench_function("blank_1280x700", |b| {
        b.iter(|| dewarper.dewarp(black_box(&blank)).expect("Dewarp failed"));
    });

    group.finish();
}

criterion_group!(benches, benchmark_full_dewarp, benchmark_fallback);
criterion_main!(benches);
