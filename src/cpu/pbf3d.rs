// position based fluids in 3D (host threads)
use std::sync::Arc;

use bevy::log::{debug, info, warn};
use bevy::prelude::Resource;
use glam::{Vec3, Vec4};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::PBFConfig;
use crate::error::PBFError;
use crate::gpu::ffi::GPUParticle;

use super::collision::ObstacleTransform;
use super::grid::SpatialHashGrid;
use super::integrator::{self, VelocityCorrection, VorticityConfinement};
use super::kernels::TensileCorrection;
use super::neighbors::NeighborTable;
use super::particle::Particle;
use super::sdf::{SdfField, SdfGenerator, TriangleMesh};
use super::solver::{Colliders, ConstraintSolver, SolverParams};

/// Per-step inputs every stage may read.
#[derive(Clone, Copy, Debug)]
pub struct StepInputs {
    pub dt: f32,
    pub force: Vec3, // sum of the externally supplied forces
}

pub type StageFn = fn(&mut SimulationState, &StepInputs);

/// Pipeline stages in execution order. Each stage finishes for all particles before the next starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    ApplyForcePredict,
    ComputeGridHash,
    SortAndBuildCellStart,
    FindNeighbors,
    ComputeLambda,
    ComputeDeltaPCollision,
    UpdatePredictedPosition,
    UpdateVelocityVorticityPosition,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::ApplyForcePredict,
        Stage::ComputeGridHash,
        Stage::SortAndBuildCellStart,
        Stage::FindNeighbors,
        Stage::ComputeLambda,
        Stage::ComputeDeltaPCollision,
        Stage::UpdatePredictedPosition,
        Stage::UpdateVelocityVorticityPosition,
    ];

    /// One Jacobi sweep.
    pub const SWEEP: [Stage; 3] = [
        Stage::ComputeLambda,
        Stage::ComputeDeltaPCollision,
        Stage::UpdatePredictedPosition,
    ];

    fn routine(self) -> StageFn {
        match self {
            Stage::ApplyForcePredict => apply_force_predict,
            Stage::ComputeGridHash => compute_grid_hash,
            Stage::SortAndBuildCellStart => sort_and_build_cell_start,
            Stage::FindNeighbors => find_neighbors,
            Stage::ComputeLambda => compute_lambda,
            Stage::ComputeDeltaPCollision => compute_delta_p_collision,
            Stage::UpdatePredictedPosition => update_predicted_position,
            Stage::UpdateVelocityVorticityPosition => update_velocity_vorticity_position,
        }
    }
}

/// Owns every per-particle and per-cell buffer of the simulation for its whole lifetime.
#[derive(Resource)]
pub struct SimulationState {
    pub config: PBFConfig,
    particles: Vec<Particle>, // fixed capacity, first `current_count` are live
    current_count: usize,
    grid: SpatialHashGrid,
    neighbors: NeighborTable,
    solver: ConstraintSolver,
    velocity_scratch: Vec<Vec3>,
    velocity_correction: Box<dyn VelocityCorrection>,
    sdf: Option<Arc<SdfField>>,
    obstacles: Vec<ObstacleTransform>,
    stages: [StageFn; 8],
    truncated_neighborhoods: usize,
}

impl SimulationState {
    pub fn initialize(config: PBFConfig) -> Result<Self, PBFError> {
        config.validate()?;
        let capacity = config.max_particle_count;
        if config.particle_count > capacity {
            warn!("{} particles requested, capacity is {}", config.particle_count, capacity);
            return Err(PBFError::CapacityExceeded {
                requested: config.particle_count,
                available: capacity,
            });
        }

        let h = config.radius;
        let dims = config.grid_dims();
        let grid = SpatialHashGrid::new(config.min_bbox(), h, dims, capacity);
        let neighbors = NeighborTable::new(capacity, config.max_neighbor_count);
        let solver = ConstraintSolver::new(
            SolverParams {
                h,
                rho_0: config.rho_rest,
                epsilon: config.epsilon,
                tensile: TensileCorrection::new(config.scorr_k, config.scorr_n, config.scorr_delta_q, h),
                surface_offset: config.surface_offset,
            },
            capacity,
        );

        let mut state = Self {
            particles: vec![Particle::default(); capacity],
            current_count: 0,
            grid,
            neighbors,
            solver,
            velocity_scratch: vec![Vec3::ZERO; capacity],
            velocity_correction: Box::new(VorticityConfinement { epsilon: config.vorticity_epsilon }),
            sdf: None,
            obstacles: Vec::new(),
            stages: Stage::ALL.map(Stage::routine),
            truncated_neighborhoods: 0,
            config,
        };
        state.spawn_initial();

        info!(
            "PBF initialized: {} / {} particles, grid {}x{}x{} ({} cells)",
            state.current_count,
            capacity,
            dims.x,
            dims.y,
            dims.z,
            state.grid.cell_count()
        );
        Ok(state)
    }

    // particle i goes into region i % regions
    fn spawn_initial(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let regions = &self.config.spawn_regions;
        let count = self.config.particle_count;

        for (i, slot) in self.particles[..count].iter_mut().enumerate() {
            let region = &regions[i % regions.len()];
            let position = Vec3::new(
                rng.gen_range(region.min.x..=region.max.x),
                rng.gen_range(region.min.y..=region.max.y),
                rng.gen_range(region.min.z..=region.max.z),
            );
            *slot = Particle::new(position, Vec3::ZERO, region.color.extend(1.0));
        }
        self.current_count = count;
    }

    /// Appends a batch after the live particles. All or nothing.
    pub fn inject(&mut self, batch: &[Particle]) -> Result<(), PBFError> {
        let available = self.capacity() - self.current_count;
        if batch.len() > available {
            warn!("Particle buffer overflow! {} injected, {} slots free", batch.len(), available);
            return Err(PBFError::CapacityExceeded { requested: batch.len(), available });
        }

        let start = self.current_count;
        for (slot, p) in self.particles[start..start + batch.len()].iter_mut().zip(batch) {
            *slot = Particle {
                predicted_position: p.position,
                delta_p: Vec3::ZERO,
                lambda: 0.0,
                ..*p
            };
        }
        self.current_count += batch.len();
        Ok(())
    }

    /// Injects a cube of `inject_particles_count` particles around `center`.
    pub fn inject_cube(&mut self, center: Vec3) -> Result<(), PBFError> {
        let batch = fill_cube(center, self.config.inject_particles_count);
        self.inject(&batch)
    }

    /// Runs one full step. `obstacles`, when given, replaces the obstacle table for this and later steps.
    pub fn step(
        &mut self,
        dt: f32,
        forces: &[Vec3],
        obstacles: Option<&[ObstacleTransform]>,
    ) -> Result<(), PBFError> {
        if !(dt.is_finite() && dt > 0.0) {
            warn!("step skipped, dt = {}", dt);
            return Err(PBFError::InvalidTimeStep(dt));
        }
        if let Some(obstacles) = obstacles {
            self.set_obstacle_transforms(obstacles);
        }
        if self.current_count == 0 {
            return Ok(());
        }

        let inputs = StepInputs { dt, force: forces.iter().copied().sum() };

        for stage in &Stage::ALL[..4] {
            self.run_stage(*stage, &inputs);
        }
        for _ in 0..self.config.solver_iterations {
            for stage in Stage::SWEEP {
                self.run_stage(stage, &inputs);
            }
        }
        self.run_stage(Stage::UpdateVelocityVorticityPosition, &inputs);

        if self.truncated_neighborhoods > 0 {
            debug!(
                "{} particles hit the neighbor cap of {}",
                self.truncated_neighborhoods, self.config.max_neighbor_count
            );
        }
        Ok(())
    }

    pub fn run_stage(&mut self, stage: Stage, inputs: &StepInputs) {
        let routine = self.stages[stage as usize];
        routine(self, inputs);
    }

    /// Consumes the state and frees every buffer it owns.
    pub fn release(self) {
        info!(
            "PBF released: {} particle slots, {} grid cells, {} neighbor slots",
            self.capacity(),
            self.grid.cell_count(),
            self.capacity() * self.neighbors.max_neighbors
        );
    }

    // ==================== obstacles ======================================

    pub fn set_collision_field(&mut self, field: Arc<SdfField>) {
        self.sdf = Some(field);
    }

    /// Builds the obstacle SDF with the configured resolution and publishes it.
    pub fn generate_collision_field(&mut self, mesh: &TriangleMesh) -> Result<Arc<SdfField>, PBFError> {
        let field = Arc::new(SdfGenerator::new(self.config.resolution, self.config.sdf_padding).generate(mesh)?);
        self.sdf = Some(field.clone());
        Ok(field)
    }

    pub fn collision_field(&self) -> Option<&Arc<SdfField>> {
        self.sdf.as_ref()
    }

    pub fn add_obstacle(&mut self, transform: ObstacleTransform) {
        self.obstacles.push(transform);
    }

    pub fn set_obstacle_transforms(&mut self, transforms: &[ObstacleTransform]) {
        self.obstacles.clear();
        self.obstacles.extend_from_slice(transforms);
    }

    pub fn obstacles(&self) -> &[ObstacleTransform] {
        &self.obstacles
    }

    // ==================== accessors ======================================

    pub fn set_velocity_correction(&mut self, correction: Box<dyn VelocityCorrection>) {
        self.velocity_correction = correction;
    }

    pub fn capacity(&self) -> usize {
        self.particles.len()
    }

    pub fn particle_count(&self) -> usize {
        self.current_count
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles[..self.current_count]
    }

    /// Live particles, for edits between steps.
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles[..self.current_count]
    }

    pub fn grid(&self) -> &SpatialHashGrid {
        &self.grid
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn truncated_neighborhoods(&self) -> usize {
        self.truncated_neighborhoods
    }

    pub fn gpu_particles(&self) -> Vec<GPUParticle> {
        self.particles().iter().map(GPUParticle::from).collect()
    }
}

/// Lattice-filled 0.5 cube around `center`, at most `target_count` particles.
pub fn fill_cube(center: Vec3, target_count: usize) -> Vec<Particle> {
    const CUBE_SIZE: f32 = 0.5;
    if target_count == 0 {
        return Vec::new();
    }
    let spacing = (CUBE_SIZE.powi(3) / target_count as f32).cbrt();
    // smallest n with n^3 >= target_count, in integers so no layer lands on the upper face
    let mut per_axis = (target_count as f32).cbrt().round() as usize;
    while per_axis.pow(3) < target_count {
        per_axis += 1;
    }
    while per_axis > 1 && (per_axis - 1).pow(3) >= target_count {
        per_axis -= 1;
    }
    let half = CUBE_SIZE / 2.0;

    let mut particles = Vec::with_capacity(target_count);
    'fill: for ix in 0..per_axis {
        for iy in 0..per_axis {
            for iz in 0..per_axis {
                if particles.len() >= target_count {
                    break 'fill;
                }
                let offset = Vec3::new(ix as f32, iy as f32, iz as f32) * spacing - half;
                particles.push(Particle::new(center + offset, Vec3::ZERO, Vec4::new(0.0, 0.0, 0.0, 1.0)));
            }
        }
    }
    particles
}

// ========================== stages ===================================

fn apply_force_predict(s: &mut SimulationState, inputs: &StepInputs) {
    let n = s.current_count;
    integrator::apply_force_predict(&mut s.particles[..n], inputs.force, inputs.dt);
}

fn compute_grid_hash(s: &mut SimulationState, _: &StepInputs) {
    let n = s.current_count;
    s.grid.compute_hashes(&s.particles[..n], |p| p.predicted_position);
}

fn sort_and_build_cell_start(s: &mut SimulationState, _: &StepInputs) {
    s.grid.sort_entries();
    s.grid.build_cell_start();
}

fn find_neighbors(s: &mut SimulationState, _: &StepInputs) {
    let n = s.current_count;
    s.truncated_neighborhoods =
        s.neighbors.find_neighbors(&s.grid, &s.particles[..n], |p| p.predicted_position);
}

fn compute_lambda(s: &mut SimulationState, _: &StepInputs) {
    let n = s.current_count;
    s.solver.compute_lambda(&mut s.particles[..n], &s.neighbors);
}

fn compute_delta_p_collision(s: &mut SimulationState, _: &StepInputs) {
    let n = s.current_count;
    let colliders = match &s.sdf {
        Some(field) if !s.obstacles.is_empty() => Some(Colliders { field, obstacles: &s.obstacles }),
        _ => None,
    };
    s.solver.compute_delta_p(&mut s.particles[..n], &s.neighbors, colliders);
}

fn update_predicted_position(s: &mut SimulationState, _: &StepInputs) {
    let n = s.current_count;
    s.solver.update_predicted_positions(&mut s.particles[..n]);
}

fn update_velocity_vorticity_position(s: &mut SimulationState, inputs: &StepInputs) {
    let n = s.current_count;
    let h = s.config.radius;
    let particles = &mut s.particles[..n];

    integrator::update_velocity(particles, inputs.dt);
    integrator::apply_xsph_viscosity(particles, &s.neighbors, h, s.config.viscosity, &mut s.velocity_scratch);
    s.velocity_correction.apply(particles, &s.neighbors, h, inputs.dt);
    integrator::finalize_positions(particles);
}
