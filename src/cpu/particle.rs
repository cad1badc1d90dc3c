use glam::{Vec3, Vec4};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Particle {
    pub position: Vec3, // authoritative position at step start
    pub velocity: Vec3,
    pub predicted_position: Vec3, // solver working position
    pub delta_p: Vec3, // correction of the current sweep
    pub lambda: f32, // density constraint multiplier
    pub color: Vec4,
}

impl Particle {
    pub fn new(position: Vec3, velocity: Vec3, color: Vec4) -> Self {
        Self {
            position,
            velocity,
            predicted_position: position,
            delta_p: Vec3::ZERO,
            lambda: 0.0,
            color,
        }
    }

    pub fn at_rest(position: Vec3) -> Self {
        Self::new(position, Vec3::ZERO, Vec4::new(0.0, 0.0, 0.0, 1.0))
    }
}
