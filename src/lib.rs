pub mod config;
pub mod error;
pub mod plugin;

pub mod cpu {
    pub mod collision;
    pub mod grid;
    pub mod integrator;
    pub mod kernels;
    pub mod neighbors;
    pub mod particle;
    pub mod pbf3d;
    pub mod sdf;
    pub mod solver;
}

pub mod gpu {
    pub mod ffi;
}

pub use config::{PBFConfig, SpawnRegion};
pub use cpu::collision::ObstacleTransform;
pub use cpu::particle::Particle;
pub use cpu::pbf3d::{SimulationState, Stage, StepInputs};
pub use cpu::sdf::{Field, SdfField, SdfGenerator, TriangleMesh};
pub use error::PBFError;
pub use plugin::PBFPlugin;
