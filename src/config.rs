// simulation parameters, defaults follow the reference water scene
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::PBFError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnRegion {
    pub min: Vec3,
    pub max: Vec3,
    pub color: Vec3, // rgb, alpha is always 1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PBFConfig {
    pub particle_count: usize,
    pub max_particle_count: usize,
    pub max_neighbor_count: usize,
    pub solver_iterations: u32,
    pub rho_rest: f32,
    pub radius: f32, // kernel support h, also the hash cell size
    pub epsilon: f32, // constraint relaxation
    pub viscosity: f32, // XSPH blend
    pub bounding_box: [Vec3; 2],
    pub spawn_regions: Vec<SpawnRegion>,
    pub inject_particles_count: usize,
    pub resolution: usize, // SDF voxels per axis

    pub seed: u64,
    pub surface_offset: f32,
    pub scorr_k: f32,
    pub scorr_n: i32,
    pub scorr_delta_q: f32, // fraction of h
    pub vorticity_epsilon: f32,
    pub sdf_padding: f32, // fraction of the mesh extent added on each side
}

impl Default for PBFConfig {
    fn default() -> Self {
        Self {
            particle_count: 20_000,
            max_particle_count: 50_000,
            max_neighbor_count: 128,
            solver_iterations: 5,
            rho_rest: 6378.0,
            radius: 0.1,
            epsilon: 600.0,
            viscosity: 5e-5,
            bounding_box: [Vec3::new(-1.5, 0.0, -1.5), Vec3::new(1.5, 10.0, 1.5)],
            spawn_regions: vec![SpawnRegion {
                min: Vec3::new(-1.0, 1.0, -1.0),
                max: Vec3::new(1.0, 3.0, 1.0),
                color: Vec3::new(0.0, 0.0, 1.0),
            }],
            inject_particles_count: 3000,
            resolution: 64,
            seed: 0,
            surface_offset: 0.01,
            scorr_k: 0.1,
            scorr_n: 4,
            scorr_delta_q: 0.2,
            vorticity_epsilon: 1e-4,
            sdf_padding: 0.1,
        }
    }
}

impl PBFConfig {
    pub fn from_json(text: &str) -> Result<Self, PBFError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn min_bbox(&self) -> Vec3 {
        self.bounding_box[0]
    }

    pub fn max_bbox(&self) -> Vec3 {
        self.bounding_box[1]
    }

    /// Checks every setup-time precondition. Nothing here is re-checked mid-step.
    pub fn validate(&self) -> Result<(), PBFError> {
        let invalid = |msg: &str| Err(PBFError::InvalidConfig(msg.to_string()));

        if !(self.radius.is_finite() && self.radius > 0.0) {
            return invalid("radius must be positive");
        }
        if !(self.rho_rest.is_finite() && self.rho_rest > 0.0) {
            return invalid("rhoRest must be positive");
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return invalid("epsilon must not be negative");
        }
        if self.max_particle_count == 0 {
            return invalid("maxParticleCount must be at least 1");
        }
        if self.max_neighbor_count == 0 {
            return invalid("maxNeighborCount must be at least 1");
        }
        let (min, max) = (self.min_bbox(), self.max_bbox());
        if !min.is_finite() || !max.is_finite() || max.cmple(min).any() {
            return invalid("boundingBox max must exceed min on every axis");
        }
        if self.particle_count > 0 && self.spawn_regions.is_empty() {
            return invalid("particleCount > 0 needs at least one spawn region");
        }
        if self.spawn_regions.iter().any(|r| r.max.cmplt(r.min).any()) {
            return invalid("spawn region max must not be below min");
        }
        if self.resolution < 2 {
            return invalid("SDF resolution must be at least 2");
        }
        if !self.sdf_padding.is_finite() || self.sdf_padding < 0.0 {
            return invalid("sdfPadding must not be negative");
        }
        if !self.viscosity.is_finite() || self.viscosity < 0.0 {
            return invalid("viscosity must not be negative");
        }
        if !self.surface_offset.is_finite() || self.surface_offset < 0.0 {
            return invalid("surfaceOffset must not be negative");
        }
        if !self.scorr_k.is_finite() || self.scorr_k < 0.0 {
            return invalid("scorrK must not be negative");
        }
        if self.scorr_n < 1 {
            return invalid("scorrN must be at least 1");
        }
        if !(self.scorr_delta_q > 0.0 && self.scorr_delta_q < 1.0) {
            return invalid("scorrDeltaQ must lie in (0, 1)");
        }
        if !self.vorticity_epsilon.is_finite() || self.vorticity_epsilon < 0.0 {
            return invalid("vorticityEpsilon must not be negative");
        }
        if self.cell_count().is_none() {
            return invalid("boundingBox / radius gives more hash cells than a u32 can index");
        }
        Ok(())
    }

    /// Hash grid cells per axis covering the bounding box.
    pub fn grid_dims(&self) -> glam::UVec3 {
        ((self.max_bbox() - self.min_bbox()) / self.radius)
            .ceil()
            .max(Vec3::ONE)
            .as_uvec3()
    }

    /// Total hash cell count, None when it does not fit the u32 cell hash.
    pub fn cell_count(&self) -> Option<u32> {
        let extent = ((self.max_bbox() - self.min_bbox()) / self.radius).ceil();
        // as_uvec3 saturates, so check the float extent first
        if !extent.is_finite() || extent.max_element() > u32::MAX as f32 {
            return None;
        }
        let dims = self.grid_dims();
        let cells = (dims.x as u64)
            .checked_mul(dims.y as u64)?
            .checked_mul(dims.z as u64)?;
        u32::try_from(cells).ok()
    }

    // demo function ----------------------------------------------
    pub fn demo_dam_break() -> Self {
        Self {
            particle_count: 4000,
            max_particle_count: 20_000,
            bounding_box: [Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 4.0, 1.0)],
            spawn_regions: vec![SpawnRegion {
                min: Vec3::new(-0.9, 0.1, -0.9),
                max: Vec3::new(-0.3, 1.0, -0.3),
                color: Vec3::new(0.1, 0.4, 1.0),
            }],
            ..Self::default()
        }
    }
    // ------------------------------------------------------------
}
