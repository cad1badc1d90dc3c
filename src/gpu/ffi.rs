use bytemuck::{Pod, Zeroable};

use crate::cpu::particle::Particle;
use crate::cpu::sdf::Field;

// vec3 members are padded to 16 bytes to match std430 storage buffers

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GPUParticle {
    // not using glam to make sure WGSL compatibility
    pub position: [f32; 3],
    pub _pad0: f32,
    pub velocity: [f32; 3],
    pub _pad1: f32,
    pub predicted_position: [f32; 3],
    pub _pad2: f32,
    pub delta_p: [f32; 3],
    pub _pad3: f32,
    pub lambda: f32,
    pub _pad4: [f32; 3],
    pub color: [f32; 4],
}

impl From<&Particle> for GPUParticle {
    fn from(p: &Particle) -> Self {
        Self {
            position: p.position.to_array(),
            velocity: p.velocity.to_array(),
            predicted_position: p.predicted_position.to_array(),
            delta_p: p.delta_p.to_array(),
            lambda: p.lambda,
            color: p.color.to_array(),
            ..Zeroable::zeroed()
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GPUField {
    pub normal: [f32; 4],
    pub distance: f32,
    pub inside: i32,
    pub _pad: [f32; 2],
}

impl From<&Field> for GPUField {
    fn from(f: &Field) -> Self {
        Self {
            normal: f.normal.extend(0.0).to_array(),
            // f32::MAX stands in for "no triangle found" on the device side
            distance: if f.distance.is_finite() { f.distance } else { f32::MAX },
            inside: f.inside as i32,
            _pad: [0.0; 2],
        }
    }
}
