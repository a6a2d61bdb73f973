//! Block processing benchmarks

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rf_ambi_cropac::hoa::sh_coefficients;
use rf_ambi_cropac::{AmbiCropac, EngineConfig, Position3D};

fn engine(frame_size: usize, hop_size: usize) -> AmbiCropac {
    let (engine, _control) = AmbiCropac::new(EngineConfig {
        frame_size,
        hop_size,
        background_rebuild: false,
        ..Default::default()
    })
    .unwrap();
    engine
}

fn input(frame_size: usize) -> Vec<Vec<f32>> {
    let gains = sh_coefficients(&Position3D::from_spherical(60.0, 15.0, 1.0));
    gains
        .iter()
        .map(|g| (0..frame_size).map(|i| g * (i as f32 * 0.07).sin()).collect())
        .collect()
}

fn bench_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_block");

    for &(frame_size, hop_size) in &[(128, 64), (512, 128), (1024, 256)] {
        let mut engine = engine(frame_size, hop_size);
        let input = input(frame_size);
        let frame: Vec<&[f32]> = input.iter().map(|c| c.as_slice()).collect();
        let mut left = vec![0.0f32; frame_size];
        let mut right = vec![0.0f32; frame_size];

        group.bench_with_input(
            BenchmarkId::new("frame", format!("{frame_size}/{hop_size}")),
            &frame_size,
            |b, _| {
                b.iter(|| {
                    let mut out: Vec<&mut [f32]> = vec![left.as_mut_slice(), right.as_mut_slice()];
                    engine.process(black_box(&frame), &mut out).unwrap();
                })
            },
        );
    }

    group.finish();
}

fn bench_rotation(c: &mut Criterion) {
    let mut engine = engine(512, 128);
    engine.params().set_rotation_enabled(true);
    engine.params().set_yaw(45.0);
    engine.params().set_pitch(-10.0);

    let input = input(512);
    let frame: Vec<&[f32]> = input.iter().map(|c| c.as_slice()).collect();
    let mut left = vec![0.0f32; 512];
    let mut right = vec![0.0f32; 512];

    c.bench_function("process_block_rotated_512", |b| {
        b.iter(|| {
            let mut out: Vec<&mut [f32]> = vec![left.as_mut_slice(), right.as_mut_slice()];
            engine.process(black_box(&frame), &mut out).unwrap();
        })
    });
}

criterion_group!(benches, bench_process, bench_rotation);
criterion_main!(benches);
