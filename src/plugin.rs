// Bevy wiring: owns the SimulationState resource and steps it once per frame
use std::sync::Arc;

use bevy::prelude::*;

use crate::config::PBFConfig;
use crate::cpu::collision::ObstacleTransform;
use crate::cpu::pbf3d::SimulationState;
use crate::cpu::sdf::TriangleMesh;

// ==================== resources ======================================

#[derive(Resource, Clone)]
pub struct PBFSettings(pub PBFConfig);

/// Forces summed into every particle's acceleration each step.
#[derive(Resource, Clone)]
pub struct ExternalForces(pub Vec<glam::Vec3>);

impl Default for ExternalForces {
    fn default() -> Self {
        Self(vec![glam::Vec3::new(0.0, -9.81, 0.0)])
    }
}

/// Mesh every `Obstacle` entity is an instance of; its SDF is built at startup.
#[derive(Resource, Clone)]
pub struct ObstacleMesh(pub Arc<TriangleMesh>);

/// Tags an entity whose GlobalTransform places one copy of the obstacle mesh.
#[derive(Component, Default, Clone, Copy)]
pub struct Obstacle;

/// Request to inject a cube of particles around a world position.
#[derive(Event, Clone, Copy, Debug)]
pub struct InjectCube {
    pub center: glam::Vec3,
}

// =====================================================================

// ========================== systems ==================================

fn init_simulation(mut commands: Commands, settings: Res<PBFSettings>, mesh: Option<Res<ObstacleMesh>>) {
    let mut state = match SimulationState::initialize(settings.0.clone()) {
        Ok(state) => state,
        Err(err) => {
            error!("PBF setup failed: {err}");
            return;
        }
    };

    if let Some(mesh) = mesh {
        if let Err(err) = state.generate_collision_field(&mesh.0) {
            error!("obstacle SDF generation failed: {err}");
        }
    }
    commands.insert_resource(state);
}

fn handle_injections(mut requests: EventReader<InjectCube>, state: Option<ResMut<SimulationState>>) {
    let Some(mut state) = state else {
        requests.clear();
        return;
    };
    for request in requests.read() {
        if let Err(err) = state.inject_cube(request.center) {
            debug!("cube at {} dropped: {err}", request.center);
        }
    }
}

fn step_simulation(
    time: Res<Time>,
    forces: Res<ExternalForces>,
    state: Option<ResMut<SimulationState>>,
    obstacles: Query<&GlobalTransform, With<Obstacle>>,
) {
    let Some(mut state) = state else { return };
    let dt = time.delta_secs();
    if dt <= 0.0 {
        return; // first frame
    }

    // bevy's glam and ours may differ, go through plain arrays
    let transforms: Vec<ObstacleTransform> = obstacles
        .iter()
        .map(|gt| {
            let m = glam::Mat4::from_cols_array(&gt.compute_matrix().to_cols_array());
            ObstacleTransform::from_local_to_world(m)
        })
        .collect();

    if let Err(err) = state.step(dt, &forces.0, Some(&transforms)) {
        warn!("PBF step rejected: {err}");
    }
}

fn release_on_exit(mut commands: Commands, exit: EventReader<AppExit>) {
    if exit.is_empty() {
        return;
    }
    commands.queue(|world: &mut World| {
        if let Some(state) = world.remove_resource::<SimulationState>() {
            state.release();
        }
    });
}

// =====================================================================

// Plugin

pub struct PBFPlugin {
    pub config: PBFConfig,
}

impl Default for PBFPlugin {
    fn default() -> Self {
        Self { config: PBFConfig::default() }
    }
}

impl Plugin for PBFPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(PBFSettings(self.config.clone()))
            .init_resource::<ExternalForces>()
            .add_event::<InjectCube>()
            .add_systems(Startup, init_simulation)
            .add_systems(Update, (handle_injections, step_simulation).chain())
            .add_systems(Last, release_on_exit);
    }
}
