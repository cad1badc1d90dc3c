use std::sync::Arc;

use bevy_pbf_fluid::cpu::grid::SpatialHashGrid;
use bevy_pbf_fluid::cpu::integrator::NoVelocityCorrection;
use bevy_pbf_fluid::cpu::kernels::w_poly6;
use bevy_pbf_fluid::cpu::neighbors::NeighborTable;
use bevy_pbf_fluid::cpu::pbf3d::fill_cube;
use bevy_pbf_fluid::{
    Field, ObstacleTransform, PBFConfig, PBFError, Particle, SdfField, SimulationState, SpawnRegion,
    Stage, StepInputs,
};
use glam::{UVec3, Vec3};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn empty_config(capacity: usize) -> PBFConfig {
    PBFConfig {
        particle_count: 0,
        max_particle_count: capacity,
        bounding_box: [Vec3::splat(-1.0), Vec3::splat(1.0)],
        ..PBFConfig::default()
    }
}

fn run_stages(state: &mut SimulationState, stages: &[Stage]) {
    let inputs = StepInputs { dt: 1.0 / 60.0, force: Vec3::ZERO };
    for &stage in stages {
        state.run_stage(stage, &inputs);
    }
}

fn lattice(n: usize, spacing: f32) -> Vec<Particle> {
    let offset = (n - 1) as f32 * spacing * 0.5;
    let mut out = Vec::with_capacity(n * n * n);
    for iz in 0..n {
        for iy in 0..n {
            for ix in 0..n {
                let p = Vec3::new(ix as f32, iy as f32, iz as f32) * spacing - offset;
                out.push(Particle::at_rest(p));
            }
        }
    }
    out
}

#[test]
fn initial_spawn_fills_regions() {
    let config = PBFConfig { particle_count: 500, max_particle_count: 1000, ..PBFConfig::default() };
    let region = config.spawn_regions[0];
    let state = SimulationState::initialize(config).unwrap();

    assert_eq!(state.particle_count(), 500);
    assert_eq!(state.capacity(), 1000);
    for p in state.particles() {
        assert!(p.position.cmpge(region.min).all() && p.position.cmple(region.max).all());
        assert_eq!(p.predicted_position, p.position);
        assert_eq!(p.color, region.color.extend(1.0));
    }
}

#[test]
fn spawn_beyond_capacity_is_rejected() {
    let config = PBFConfig { particle_count: 101, max_particle_count: 100, ..PBFConfig::default() };
    assert!(matches!(
        SimulationState::initialize(config),
        Err(PBFError::CapacityExceeded { requested: 101, available: 100 })
    ));
}

#[test]
fn injection_is_all_or_nothing() {
    let mut state = SimulationState::initialize(empty_config(20)).unwrap();

    state.inject(&fill_cube(Vec3::ZERO, 18)).unwrap();
    assert_eq!(state.particle_count(), 18);
    let before: Vec<Particle> = state.particles().to_vec();

    let err = state.inject(&fill_cube(Vec3::ONE, 5)).unwrap_err();
    assert!(matches!(err, PBFError::CapacityExceeded { requested: 5, available: 2 }));
    assert_eq!(state.particle_count(), 18);
    assert_eq!(state.particles(), &before[..]);

    state.inject(&fill_cube(Vec3::ONE, 2)).unwrap();
    assert_eq!(state.particle_count(), 20);
    assert!(state.inject(&fill_cube(Vec3::ONE, 1)).is_err());
    assert!(state.particle_count() <= state.capacity());
}

#[test]
fn fill_cube_respects_target_count() {
    let batch = fill_cube(Vec3::new(0.0, 3.0, 0.0), 3000);
    assert_eq!(batch.len(), 3000);
    for p in &batch {
        assert!((p.position - Vec3::new(0.0, 3.0, 0.0)).abs().max_element() <= 0.25 + 1e-5);
    }
    assert!(fill_cube(Vec3::ZERO, 0).is_empty());
}

#[test]
fn fill_cube_stays_off_the_upper_faces() {
    for target in [1, 8, 27, 64, 125, 216, 343, 1000, 3000, 3375, 4096] {
        let batch = fill_cube(Vec3::ZERO, target);
        assert_eq!(batch.len(), target);
        for p in &batch {
            assert!(p.position.max_element() < 0.25 - 1e-6, "{target}: {}", p.position);
            assert!(p.position.min_element() >= -0.25 - 1e-6);
        }
    }
}

#[test]
fn cell_start_points_at_first_sorted_entry() {
    let mut grid = SpatialHashGrid::new(Vec3::ZERO, 1.0, UVec3::splat(4), 8);
    let positions = [
        Vec3::new(0.5, 0.5, 0.5),   // cell 0
        Vec3::new(1.5, 0.5, 0.5),   // cell 1
        Vec3::new(0.2, 0.7, 0.1),   // cell 0
        Vec3::new(3.5, 3.5, 3.5),   // cell 63
        Vec3::new(10.0, 10.0, 10.0), // clamped into cell 63
        Vec3::new(-5.0, 0.5, 0.5),  // clamped into cell 0
    ];
    grid.rebuild(&positions);

    let hashes: Vec<u32> = grid.sorted_entries().iter().map(|e| e.cell_hash).collect();
    assert_eq!(hashes, vec![0, 0, 0, 1, 63, 63]);
    for e in grid.sorted_entries() {
        assert_eq!(e.cell_hash, grid.hash(positions[e.particle_index as usize]));
    }

    assert_eq!(grid.cell_start(0), Some(0));
    assert_eq!(grid.cell_start(1), Some(3));
    assert_eq!(grid.cell_start(63), Some(4));
    assert_eq!(grid.cell_start(2), None);
    assert_eq!(grid.cell_start(62), None);

    let mut cell0: Vec<u32> = grid.cell_particles(0).collect();
    cell0.sort();
    assert_eq!(cell0, vec![0, 2, 5]);
    assert_eq!(grid.cell_particles(2).count(), 0);
}

#[test]
fn neighbors_are_within_radius_and_complete() {
    let h = 0.1;
    let mut rng = StdRng::seed_from_u64(7);
    let positions: Vec<Vec3> = (0..600)
        .map(|_| Vec3::new(rng.gen_range(0.0..0.5), rng.gen_range(0.0..0.5), rng.gen_range(0.0..0.5)))
        .collect();

    let mut grid = SpatialHashGrid::new(Vec3::ZERO, h, UVec3::splat(5), positions.len());
    grid.rebuild(&positions);
    let mut table = NeighborTable::new(positions.len(), 512);
    let truncated = table.find_neighbors(&grid, &positions, |&p| p);
    assert_eq!(truncated, 0);

    for i in 0..positions.len() {
        let mut found: Vec<u32> = table.neighbors(i).to_vec();
        for &j in &found {
            assert_ne!(j as usize, i);
            assert!((positions[i] - positions[j as usize]).length() < h);
        }
        let mut expected: Vec<u32> = (0..positions.len())
            .filter(|&j| j != i && (positions[i] - positions[j]).length_squared() < h * h)
            .map(|j| j as u32)
            .collect();
        found.sort();
        expected.sort();
        assert_eq!(found, expected);
    }
}

#[test]
fn neighbor_lists_are_truncated_at_the_cap() {
    let h = 0.1;
    let positions: Vec<Vec3> = (0..20).map(|i| Vec3::splat(0.5 + i as f32 * 1e-3)).collect();
    let mut grid = SpatialHashGrid::new(Vec3::ZERO, h, UVec3::splat(10), positions.len());
    grid.rebuild(&positions);

    let mut table = NeighborTable::new(positions.len(), 4);
    let truncated = table.find_neighbors(&grid, &positions, |&p| p);
    assert_eq!(truncated, positions.len());
    for i in 0..positions.len() {
        assert_eq!(table.count(i), 4);
        for &j in table.neighbors(i) {
            assert!((positions[i] - positions[j as usize]).length() < h);
        }
    }
}

#[test]
fn lonely_particle_gets_the_relaxed_lambda() {
    let config = empty_config(4);
    let (h, rho_0, epsilon) = (config.radius, config.rho_rest, config.epsilon);
    let mut state = SimulationState::initialize(config).unwrap();
    state.inject(&[Particle::at_rest(Vec3::ZERO)]).unwrap();

    run_stages(&mut state, &Stage::ALL[..5]);
    assert_eq!(state.neighbors().count(0), 0);

    let c = w_poly6(0.0, h) / rho_0 - 1.0;
    let lambda = state.particles()[0].lambda;
    assert!(lambda.is_finite());
    assert!((lambda - (-c / epsilon)).abs() < 1e-6);
}

#[test]
fn zero_epsilon_with_no_neighbors_does_not_blow_up() {
    let config = PBFConfig { epsilon: 0.0, ..empty_config(4) };
    let mut state = SimulationState::initialize(config).unwrap();
    state.inject(&[Particle::at_rest(Vec3::ZERO)]).unwrap();

    run_stages(&mut state, &Stage::ALL[..5]);
    assert_eq!(state.particles()[0].lambda, 0.0);
}

#[test]
fn solver_adds_no_net_drift_at_rest() {
    let config = PBFConfig { solver_iterations: 4, ..empty_config(512) };
    let spacing = config.radius * 0.5;
    let mut state = SimulationState::initialize(config).unwrap();
    state.inject(&lattice(6, spacing)).unwrap();

    let before: Vec<Vec3> = state.particles().iter().map(|p| p.position).collect();
    state.step(1.0 / 60.0, &[], None).unwrap();

    let n = before.len() as f32;
    let mean_shift = state
        .particles()
        .iter()
        .zip(&before)
        .map(|(p, &x0)| p.position - x0)
        .sum::<Vec3>()
        / n;
    assert!(mean_shift.length() < 1e-5, "mean shift {mean_shift}");

    // the solver did move the lattice, it just did not translate it
    assert!(state.particles().iter().zip(&before).any(|(p, &x0)| (p.position - x0).length() > 1e-5));
}

#[test]
fn particle_is_pushed_out_of_a_planar_obstacle() {
    let config = empty_config(4);
    let offset = config.surface_offset;
    let mut state = SimulationState::initialize(config).unwrap();

    // solid below y = 0
    let field = SdfField::from_fn(16, Vec3::splat(-1.0), Vec3::splat(1.0), |c| Field {
        normal: Vec3::Y,
        distance: c.y,
        inside: c.y < 0.0,
    });
    state.set_collision_field(Arc::new(field));
    state.add_obstacle(ObstacleTransform::default());

    let depth = 0.05;
    state.inject(&[Particle::at_rest(Vec3::new(0.1, -depth, 0.2))]).unwrap();
    run_stages(&mut state, &Stage::ALL[..7]);

    let p = state.particles()[0].predicted_position;
    let distance = state.collision_field().unwrap().sample(p).distance;
    assert!(distance >= -1e-5, "still penetrating: {distance}");
    assert!((distance - offset).abs() < 1e-4);
}

#[test]
fn moving_obstacle_is_tested_in_its_own_frame() {
    let mut state = SimulationState::initialize(empty_config(4)).unwrap();
    let field = SdfField::from_fn(16, Vec3::splat(-1.0), Vec3::splat(1.0), |c| Field {
        normal: Vec3::Y,
        distance: c.y,
        inside: c.y < 0.0,
    });
    state.set_collision_field(Arc::new(field));
    state.inject(&[Particle::at_rest(Vec3::new(0.0, 0.45, 0.0))]).unwrap();

    // floor raised to y = 0.5 for this step only
    let raised = [ObstacleTransform::from_translation(Vec3::new(0.0, 0.5, 0.0))];
    state.step(1e-3, &[], Some(&raised)).unwrap();
    assert!(state.particles()[0].position.y >= 0.5 - 1e-4);
    assert_eq!(state.obstacles(), &raised);

    state.set_obstacle_transforms(&[]);
    assert!(state.obstacles().is_empty());
}

#[test]
fn gravity_pulls_the_block_down() {
    let config = PBFConfig {
        particle_count: 400,
        max_particle_count: 800,
        ..PBFConfig::default()
    };
    let mut state = SimulationState::initialize(config).unwrap();
    let mean_y = |s: &SimulationState| s.particles().iter().map(|p| p.position.y).sum::<f32>() / 400.0;

    let y0 = mean_y(&state);
    let gravity = [Vec3::new(0.0, -9.81, 0.0)];
    for _ in 0..5 {
        state.step(1.0 / 60.0, &gravity, None).unwrap();
    }
    assert!(mean_y(&state) < y0);
    assert!(state.particles().iter().all(|p| p.position.is_finite() && p.velocity.is_finite()));
    assert!((0..state.particle_count()).all(|i| state.neighbors().count(i) <= 128));
}

#[test]
fn non_positive_time_step_is_rejected() {
    let mut state = SimulationState::initialize(empty_config(4)).unwrap();
    state.inject(&[Particle::at_rest(Vec3::ZERO)]).unwrap();
    assert!(matches!(state.step(0.0, &[], None), Err(PBFError::InvalidTimeStep(_))));
    assert!(state.step(f32::NAN, &[], None).is_err());
    assert_eq!(state.particles()[0].position, Vec3::ZERO);
}

#[test]
fn gpu_export_matches_particles() {
    let mut state = SimulationState::initialize(empty_config(8)).unwrap();
    state.inject(&fill_cube(Vec3::ZERO, 8)).unwrap();

    let gpu = state.gpu_particles();
    assert_eq!(std::mem::size_of::<bevy_pbf_fluid::gpu::ffi::GPUParticle>(), 96);
    assert_eq!(gpu.len(), 8);
    assert_eq!(bytemuck::cast_slice::<_, u8>(&gpu).len(), 8 * 96);
    for (g, p) in gpu.iter().zip(state.particles()) {
        assert_eq!(g.position, p.position.to_array());
        assert_eq!(g.color, p.color.to_array());
    }
}

#[test]
fn velocity_correction_can_be_switched_off() {
    let base = PBFConfig {
        particle_count: 300,
        max_particle_count: 300,
        seed: 3,
        spawn_regions: vec![SpawnRegion {
            min: Vec3::new(-0.15, 1.0, -0.15),
            max: Vec3::new(0.15, 1.3, 0.15),
            color: Vec3::ONE,
        }],
        ..PBFConfig::default()
    };
    // confinement disabled by swapping the correction out
    let mut swapped = SimulationState::initialize(PBFConfig { vorticity_epsilon: 0.5, ..base.clone() }).unwrap();
    swapped.set_velocity_correction(Box::new(NoVelocityCorrection));
    // confinement disabled through its own strength
    let mut zeroed = SimulationState::initialize(PBFConfig { vorticity_epsilon: 0.0, ..base.clone() }).unwrap();
    let mut confined = SimulationState::initialize(PBFConfig { vorticity_epsilon: 0.5, ..base }).unwrap();

    let gravity = [Vec3::new(0.0, -9.81, 0.0)];
    for _ in 0..3 {
        swapped.step(1.0 / 60.0, &gravity, None).unwrap();
        zeroed.step(1.0 / 60.0, &gravity, None).unwrap();
        confined.step(1.0 / 60.0, &gravity, None).unwrap();
    }

    for (a, b) in swapped.particles().iter().zip(zeroed.particles()) {
        assert!((a.velocity - b.velocity).length() < 1e-4);
        assert!((a.position - b.position).length() < 1e-5);
    }
    let diverged = swapped
        .particles()
        .iter()
        .zip(confined.particles())
        .any(|(a, b)| (a.velocity - b.velocity).length() > 1e-4);
    assert!(diverged);
}
