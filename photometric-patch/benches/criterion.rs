use criterion::{criterion_group, criterion_main, Criterion};
use photometric_patch::{interpolate, Raster, ZnccPatch};

fn texture() -> Raster {
    Raster::from_fn(640, 480, |x, y| ((x * 31 + y * 17) % 251) as f32 / 251.0)
}

fn bench_interpolate(c: &mut Criterion) {
    let image = texture();
    c.bench_function("interpolate", |b| {
        b.iter(|| interpolate(&image, 320.37f64, 240.81, 0.0, 0.0))
    });
}

fn bench_zncc(c: &mut Criterion) {
    let image = texture();
    let reference = ZnccPatch::from_image(&image, 2, [320.0, 240.0]);
    let mut patch = ZnccPatch::new(2);
    c.bench_function("zncc_set_and_score", |b| {
        b.iter(|| patch.set(&image, [320.4, 240.6]).score(&reference))
    });
}

criterion_group!(
    name = patch;
    config = Criterion::default().sample_size(50);
    targets = bench_interpolate, bench_zncc
);

criterion_main!(patch);
