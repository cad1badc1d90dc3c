use bevy_pbf_fluid::{PBFConfig, SdfGenerator, SimulationState, TriangleMesh};
use criterion::{criterion_group, criterion_main, Criterion};
use glam::Vec3;

fn bench_step(c: &mut Criterion) {
    let config = PBFConfig {
        particle_count: 5000,
        max_particle_count: 10_000,
        solver_iterations: 4,
        ..PBFConfig::default()
    };
    let mut state = match SimulationState::initialize(config) {
        Ok(state) => state,
        Err(err) => panic!("bench setup failed: {err}"),
    };
    let gravity = [Vec3::new(0.0, -9.81, 0.0)];

    c.bench_function("step_5k", |b| {
        b.iter(|| state.step(1.0 / 60.0, &gravity, None))
    });
}

fn bench_sdf(c: &mut Criterion) {
    let mesh = TriangleMesh::cuboid(Vec3::new(0.5, 0.25, 0.5));
    let generator = SdfGenerator::new(32, 0.1);

    c.bench_function("sdf_cuboid_32", |b| b.iter(|| generator.generate(&mesh)));
}

criterion_group!(benches, bench_step, bench_sdf);
criterion_main!(benches);
