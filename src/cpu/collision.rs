// particle vs. obstacle push-out against a mesh-local SDF
use glam::{Mat4, Vec3};

use super::sdf::SdfField;

/// World <-> mesh-local pair for one live obstacle instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObstacleTransform {
    pub world_to_local: Mat4,
    pub local_to_world: Mat4,
}

impl Default for ObstacleTransform {
    fn default() -> Self {
        Self { world_to_local: Mat4::IDENTITY, local_to_world: Mat4::IDENTITY }
    }
}

impl ObstacleTransform {
    pub fn from_local_to_world(local_to_world: Mat4) -> Self {
        Self { world_to_local: local_to_world.inverse(), local_to_world }
    }

    pub fn from_translation(t: Vec3) -> Self {
        Self::from_local_to_world(Mat4::from_translation(t))
    }
}

/// Summed push-out of `p` from every obstacle it penetrates or comes closer than `offset` to.
pub fn collision_correction(
    field: &SdfField,
    obstacles: &[ObstacleTransform],
    p: Vec3,
    offset: f32,
) -> Vec3 {
    let mut correction = Vec3::ZERO;

    for obstacle in obstacles {
        let local = obstacle.world_to_local.transform_point3(p);
        let sample = field.sample(local);

        // only the linear part of local_to_world acts on the normal
        let n = obstacle.local_to_world.transform_vector3(sample.normal);
        let scale = n.length();
        if scale <= f32::EPSILON {
            continue;
        }
        let distance = sample.distance * scale;
        if distance < offset {
            correction += n / scale * (offset - distance);
        }
    }
    correction
}
