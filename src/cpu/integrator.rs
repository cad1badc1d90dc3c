// force prediction before the solve, velocity/position finalization after it
use glam::Vec3;
use rayon::prelude::*;

use super::kernels::{grad_spiky_kernel, w_poly6};
use super::neighbors::NeighborTable;
use super::particle::Particle;

/// Symplectic Euler prediction: v += f * dt, x* = x + v * dt.
pub fn apply_force_predict(particles: &mut [Particle], force: Vec3, dt: f32) {
    particles.par_iter_mut().for_each(|p| {
        p.velocity += force * dt;
        p.predicted_position = p.position + p.velocity * dt;
        p.delta_p = Vec3::ZERO;
    });
}

/// Velocity from the solved displacement.
pub fn update_velocity(particles: &mut [Particle], dt: f32) {
    let inv_dt = 1.0 / dt;
    particles
        .par_iter_mut()
        .for_each(|p| p.velocity = (p.predicted_position - p.position) * inv_dt);
}

/// XSPH: blend each velocity towards its kernel-weighted neighborhood average.
pub fn apply_xsph_viscosity(
    particles: &mut [Particle],
    neighbors: &NeighborTable,
    h: f32,
    c: f32,
    scratch: &mut [Vec3],
) {
    if c == 0.0 {
        return;
    }
    let n = particles.len();
    let view: &[Particle] = particles;
    scratch[..n].par_iter_mut().enumerate().for_each(|(i, out)| {
        let p_i = &view[i];
        let mut blend = Vec3::ZERO;
        for &j in neighbors.neighbors(i) {
            let p_j = &view[j as usize];
            let r2 = (p_i.predicted_position - p_j.predicted_position).length_squared();
            blend += (p_j.velocity - p_i.velocity) * w_poly6(r2, h);
        }
        *out = p_i.velocity + c * blend;
    });

    particles
        .par_iter_mut()
        .zip(scratch[..n].par_iter())
        .for_each(|(p, &v)| p.velocity = v);
}

/// Commits the solved positions.
pub fn finalize_positions(particles: &mut [Particle]) {
    particles
        .par_iter_mut()
        .for_each(|p| p.position = p.predicted_position);
}

/// Velocity adjustment run after viscosity to give back some of the energy it damped.
pub trait VelocityCorrection: Send + Sync {
    fn apply(&self, particles: &mut [Particle], neighbors: &NeighborTable, h: f32, dt: f32);
}

pub struct NoVelocityCorrection;

impl VelocityCorrection for NoVelocityCorrection {
    fn apply(&self, _: &mut [Particle], _: &NeighborTable, _: f32, _: f32) {}
}

/// Curl-based vorticity confinement: f = epsilon * (N x omega), N = grad|omega| / |grad|omega||.
pub struct VorticityConfinement {
    pub epsilon: f32,
}

impl VorticityConfinement {
    /// Discrete curl of the velocity field at every particle.
    pub fn vorticity(particles: &[Particle], neighbors: &NeighborTable, h: f32) -> Vec<Vec3> {
        (0..particles.len())
            .into_par_iter()
            .map(|i| {
                let p_i = &particles[i];
                neighbors.neighbors(i).iter().fold(Vec3::ZERO, |omega, &j| {
                    let p_j = &particles[j as usize];
                    let grad = grad_spiky_kernel(p_i.predicted_position - p_j.predicted_position, h);
                    omega + grad.cross(p_j.velocity - p_i.velocity)
                })
            })
            .collect()
    }
}

impl VelocityCorrection for VorticityConfinement {
    fn apply(&self, particles: &mut [Particle], neighbors: &NeighborTable, h: f32, dt: f32) {
        if self.epsilon == 0.0 {
            return;
        }
        let omega = Self::vorticity(particles, neighbors, h);

        let view: &[Particle] = particles;
        let impulses: Vec<Vec3> = (0..view.len())
            .into_par_iter()
            .map(|i| {
                let mag_i = omega[i].length();
                let mut eta = Vec3::ZERO;
                for &j in neighbors.neighbors(i) {
                    let j = j as usize;
                    let grad = grad_spiky_kernel(view[i].predicted_position - view[j].predicted_position, h);
                    eta += (omega[j].length() - mag_i) * grad;
                }
                match eta.try_normalize() {
                    Some(n) => self.epsilon * n.cross(omega[i]) * dt,
                    None => Vec3::ZERO,
                }
            })
            .collect();

        particles
            .par_iter_mut()
            .zip(impulses)
            .for_each(|(p, dv)| p.velocity += dv);
    }
}
