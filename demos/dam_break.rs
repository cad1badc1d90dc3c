// headless dam break against a moving box, prints a few stats per second
use std::sync::Arc;

use bevy::log::LogPlugin;
use bevy::transform::TransformPlugin;
use bevy::prelude::*;
use bevy_pbf_fluid::plugin::{InjectCube, Obstacle, ObstacleMesh};
use bevy_pbf_fluid::{PBFConfig, PBFPlugin, SimulationState, TriangleMesh};

const RUN_FRAMES: u32 = 600;
const INJECT_EVERY: u32 = 200;

fn main() {
    App::new()
        .add_plugins((MinimalPlugins, LogPlugin::default(), TransformPlugin))
        .insert_resource(ObstacleMesh(Arc::new(TriangleMesh::cuboid(glam::Vec3::new(0.3, 0.2, 0.3)))))
        .add_plugins(PBFPlugin { config: PBFConfig::demo_dam_break() })
        .add_systems(Startup, spawn_obstacle)
        .add_systems(Update, (slide_obstacle, drive, report))
        .run();
}

fn spawn_obstacle(mut commands: Commands) {
    commands.spawn((Obstacle, Transform::from_xyz(0.4, 0.2, 0.0)));
}

fn slide_obstacle(time: Res<Time>, mut q: Query<&mut Transform, With<Obstacle>>) {
    for mut t in &mut q {
        t.translation.z = 0.4 * time.elapsed_secs().sin();
    }
}

fn drive(mut frame: Local<u32>, mut inject: EventWriter<InjectCube>, mut exit: EventWriter<AppExit>) {
    *frame += 1;
    if *frame % INJECT_EVERY == 0 {
        inject.write(InjectCube { center: glam::Vec3::new(0.0, 2.5, 0.0) });
    }
    if *frame >= RUN_FRAMES {
        exit.write(AppExit::Success);
    }
}

fn report(time: Res<Time>, state: Option<Res<SimulationState>>, mut timer: Local<f32>) {
    let Some(state) = state else { return };
    *timer += time.delta_secs();
    if *timer < 1.0 {
        return;
    }
    *timer = 0.0;

    let n = state.particle_count().max(1) as f32;
    let mean_y = state.particles().iter().map(|p| p.position.y).sum::<f32>() / n;
    let max_speed = state
        .particles()
        .iter()
        .map(|p| p.velocity.length())
        .fold(0.0, f32::max);
    info!(
        "particles {} | mean height {:.3} | max speed {:.3} | truncated {}",
        state.particle_count(),
        mean_y,
        max_speed,
        state.truncated_neighborhoods()
    );
}
