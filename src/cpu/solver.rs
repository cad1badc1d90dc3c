//! PBF density-constraint projection (Macklin & Mueller 2013), one Jacobi sweep at a time.
//!
//! A sweep is three phases: [`ConstraintSolver::compute_lambda`],
//! [`ConstraintSolver::compute_delta_p`] and [`ConstraintSolver::update_predicted_positions`].
//! Each phase reads only what the previous phase finished writing: results go to a scratch
//! buffer first and are copied into the particles once every particle is done.

use glam::Vec3;
use rayon::prelude::*;

use super::collision::{collision_correction, ObstacleTransform};
use super::kernels::{grad_spiky_kernel, w_poly6, TensileCorrection};
use super::neighbors::NeighborTable;
use super::particle::Particle;
use super::sdf::SdfField;

#[derive(Clone, Copy, Debug)]
pub struct SolverParams {
    pub h: f32,
    pub rho_0: f32,
    pub epsilon: f32,
    pub tensile: TensileCorrection,
    pub surface_offset: f32,
}

/// Obstacles the delta-p phase pushes particles out of.
#[derive(Clone, Copy)]
pub struct Colliders<'a> {
    pub field: &'a SdfField,
    pub obstacles: &'a [ObstacleTransform],
}

pub struct ConstraintSolver {
    pub params: SolverParams,
    lambdas: Vec<f32>,
    deltas: Vec<Vec3>,
}

impl ConstraintSolver {
    pub fn new(params: SolverParams, capacity: usize) -> Self {
        Self {
            params,
            lambdas: vec![0.0; capacity],
            deltas: vec![Vec3::ZERO; capacity],
        }
    }

    pub fn compute_lambda(&mut self, particles: &mut [Particle], neighbors: &NeighborTable) {
        let n = particles.len();
        let params = self.params;
        let view: &[Particle] = particles;
        self.lambdas[..n]
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, l)| *l = lambda_of(&params, view, neighbors, i));

        particles
            .par_iter_mut()
            .zip(self.lambdas[..n].par_iter())
            .for_each(|(p, &l)| p.lambda = l);
    }

    pub fn compute_delta_p(
        &mut self,
        particles: &mut [Particle],
        neighbors: &NeighborTable,
        colliders: Option<Colliders<'_>>,
    ) {
        let n = particles.len();
        let params = self.params;
        let view: &[Particle] = particles;
        self.deltas[..n]
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, d)| *d = delta_p_of(&params, view, neighbors, colliders, i));

        particles
            .par_iter_mut()
            .zip(self.deltas[..n].par_iter())
            .for_each(|(p, &d)| p.delta_p = d);
    }

    pub fn update_predicted_positions(&self, particles: &mut [Particle]) {
        particles
            .par_iter_mut()
            .for_each(|p| p.predicted_position += p.delta_p);
    }
}

/// Lambda of one particle from its neighborhood. Self counts towards the density with r = 0.
pub fn lambda_of(params: &SolverParams, particles: &[Particle], neighbors: &NeighborTable, i: usize) -> f32 {
    let SolverParams { h, rho_0, epsilon, .. } = *params;
    let p_i = particles[i].predicted_position;

    let mut rho = w_poly6(0.0, h);
    let mut grad_i = Vec3::ZERO;
    let mut grad_sum = 0.0;
    for &j in neighbors.neighbors(i) {
        let r = p_i - particles[j as usize].predicted_position;
        rho += w_poly6(r.length_squared(), h);
        let grad_j = grad_spiky_kernel(r, h) / rho_0;
        grad_sum += grad_j.length_squared();
        grad_i += grad_j;
    }
    grad_sum += grad_i.length_squared();

    let c = rho / rho_0 - 1.0;
    let denom = grad_sum + epsilon;
    if denom > 0.0 { -c / denom } else { 0.0 }
}

/// Density correction plus obstacle push-out for one particle.
pub fn delta_p_of(
    params: &SolverParams,
    particles: &[Particle],
    neighbors: &NeighborTable,
    colliders: Option<Colliders<'_>>,
    i: usize,
) -> Vec3 {
    let SolverParams { h, rho_0, tensile, surface_offset, .. } = *params;
    let p_i = &particles[i];

    let mut delta = Vec3::ZERO;
    for &j in neighbors.neighbors(i) {
        let p_j = &particles[j as usize];
        let r = p_i.predicted_position - p_j.predicted_position;
        let s_corr = tensile.s_corr(r.length_squared(), h);
        delta += (p_i.lambda + p_j.lambda + s_corr) * grad_spiky_kernel(r, h);
    }
    delta /= rho_0;

    if let Some(Colliders { field, obstacles }) = colliders {
        delta += collision_correction(field, obstacles, p_i.predicted_position, surface_offset);
    }
    delta
}
